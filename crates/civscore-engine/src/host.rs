//! Synthetic host: wandering agents that build and dig around themselves.
//!
//! Drives the engine the way a game server would. Every step some agents
//! place or break a block near where they stand, then every agent takes a
//! random stroll. Breaking a block occasionally knocks loose the block
//! above it, which is reported as a cascade change.

use civscore_core::presence::ActiveAgent;
use civscore_core::world::MutationOrigin;
use civscore_types::{AgentKey, BlockPos, WorldPos};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::world::SyntheticWorld;

/// Blocks agents place, weighted and unweighted alike.
const BUILDING_BLOCKS: &[&str] = &[
    "torch",
    "crafting_table",
    "furnace",
    "chest",
    "bed",
    "oak_planks",
    "stone_bricks",
    "glass",
    "cobblestone",
    "dirt",
];

/// Y level agents walk on.
const GROUND_Y: f64 = 64.0;

/// Configuration for the host driver, read from the `host` section of the
/// config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostConfig {
    /// Simulation steps to run.
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Number of wandering agents.
    #[serde(default = "default_agent_count")]
    pub agent_count: u64,

    /// Block changes attempted per step.
    #[serde(default = "default_mutations_per_tick")]
    pub mutations_per_tick: u32,

    /// Probability that breaking a block also drops the one above it.
    #[serde(default = "default_cascade_chance")]
    pub cascade_chance: f64,

    /// Half-width, in blocks, of the square agents spawn in.
    #[serde(default = "default_spawn_radius")]
    pub spawn_radius: i32,

    /// RNG seed, for reproducible runs.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Real-time pause between steps, in milliseconds.
    #[serde(default)]
    pub tick_pause_ms: u64,

    /// Log agent scores every this many steps.
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            agent_count: default_agent_count(),
            mutations_per_tick: default_mutations_per_tick(),
            cascade_chance: default_cascade_chance(),
            spawn_radius: default_spawn_radius(),
            seed: default_seed(),
            tick_pause_ms: 0,
            report_every: default_report_every(),
        }
    }
}

const fn default_ticks() -> u64 {
    1_200
}

const fn default_agent_count() -> u64 {
    6
}

const fn default_mutations_per_tick() -> u32 {
    4
}

const fn default_cascade_chance() -> f64 {
    0.25
}

const fn default_spawn_radius() -> i32 {
    64
}

const fn default_seed() -> u64 {
    7
}

const fn default_report_every() -> u64 {
    200
}

/// The agents and the RNG that moves them.
pub struct Host {
    config: HostConfig,
    rng: StdRng,
    agents: Vec<ActiveAgent>,
}

impl Host {
    /// Spawn `agent_count` agents at random ground positions.
    pub fn new(config: HostConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let radius = f64::from(config.spawn_radius.max(1));
        let agents = (0..config.agent_count)
            .map(|key| {
                let x = rng.random_range(-radius..radius);
                let z = rng.random_range(-radius..radius);
                ActiveAgent::new(AgentKey(key), WorldPos::new(x, GROUND_Y, z))
            })
            .collect();
        Self { config, rng, agents }
    }

    /// Current agent samples.
    pub fn agents(&self) -> &[ActiveAgent] {
        &self.agents
    }

    /// The driver configuration.
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Move every agent a short random step along the ground.
    pub fn wander(&mut self) {
        for agent in &mut self.agents {
            let dx = self.rng.random_range(-1.5..=1.5);
            let dz = self.rng.random_range(-1.5..=1.5);
            agent.pos = WorldPos::new(agent.pos.x + dx, GROUND_Y, agent.pos.z + dz);
        }
    }

    /// Let random agents place or break blocks next to them. Returns every
    /// position whose content changed, with its origin.
    pub fn build(&mut self, world: &mut SyntheticWorld) -> Vec<(BlockPos, MutationOrigin)> {
        let mut changes = Vec::new();
        if self.agents.is_empty() {
            return changes;
        }
        for _ in 0..self.config.mutations_per_tick {
            let index = self.rng.random_range(0..self.agents.len());
            let Some(agent) = self.agents.get(index) else {
                continue;
            };
            let base = agent.pos.block();
            let pos = BlockPos::new(
                base.x.saturating_add(self.rng.random_range(-3..=3)),
                base.y.saturating_add(self.rng.random_range(0..=3)),
                base.z.saturating_add(self.rng.random_range(-3..=3)),
            );

            if self.rng.random_bool(0.75) {
                let block = BUILDING_BLOCKS
                    .get(self.rng.random_range(0..BUILDING_BLOCKS.len()))
                    .copied();
                if world.set(pos, block) {
                    changes.push((pos, MutationOrigin::Primary));
                }
            } else if world.set(pos, None) {
                changes.push((pos, MutationOrigin::Primary));
                let above = BlockPos::new(pos.x, pos.y.saturating_add(1), pos.z);
                if self.rng.random_bool(self.config.cascade_chance.clamp(0.0, 1.0))
                    && world.set(above, None)
                {
                    changes.push((above, MutationOrigin::Cascade));
                }
            }
        }
        changes
    }
}
