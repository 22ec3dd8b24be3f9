//! Active-time clock.
//!
//! Decay is measured in *active* milliseconds: time that passes while the
//! simulation is running. The counter advances once per simulation step,
//! is persisted, and is restored at startup, so process downtime never
//! counts as absence.
//!
//! TTLs, in contrast, use wall-clock milliseconds, since they bound memory
//! rather than model the world.
//!
//! The [`Clock`] trait lets tests substitute [`ManualClock`] and move either
//! time source explicitly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::config::ClockConfig;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The active-time counter would overflow.
    #[error("active time overflow: cannot advance beyond i64::MAX")]
    Overflow,
}

/// Source of active and wall-clock time.
pub trait Clock: Send {
    /// Current active time in milliseconds.
    fn active_ms(&self) -> i64;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn wall_ms(&self) -> i64;

    /// Advance active time by one simulation step.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Overflow`] if the counter would overflow.
    fn tick(&mut self) -> Result<i64, ClockError>;

    /// Restore active time from durable storage.
    fn restore(&mut self, active_ms: i64);
}

/// Both time sources sampled once, so a whole operation sees one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Now {
    /// Active milliseconds, used for decay.
    pub active_ms: i64,
    /// Wall-clock milliseconds, used for TTLs.
    pub wall_ms: i64,
}

impl Now {
    /// Sample `clock`.
    pub fn of(clock: &dyn Clock) -> Self {
        Self {
            active_ms: clock.active_ms(),
            wall_ms: clock.wall_ms(),
        }
    }
}

/// The production clock: active time advances by a fixed step per tick,
/// wall time comes from the system clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveClock {
    active_ms: i64,
    step_ms: i64,
}

impl ActiveClock {
    /// Create a clock at active time 0.
    pub const fn new(config: &ClockConfig) -> Self {
        Self {
            active_ms: 0,
            step_ms: config.step_ms,
        }
    }

    /// Return the active milliseconds added per tick.
    pub const fn step_ms(&self) -> i64 {
        self.step_ms
    }
}

impl Clock for ActiveClock {
    fn active_ms(&self) -> i64 {
        self.active_ms
    }

    fn wall_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn tick(&mut self) -> Result<i64, ClockError> {
        self.active_ms = self
            .active_ms
            .checked_add(self.step_ms)
            .ok_or(ClockError::Overflow)?;
        Ok(self.active_ms)
    }

    fn restore(&mut self, active_ms: i64) {
        // Never run backwards.
        self.active_ms = self.active_ms.max(active_ms);
    }
}

/// A clock moved only by hand. Ticks add `step_ms` to both time sources.
///
/// Clones share the same counters, so a test can keep a handle to a clock
/// it has handed to the engine.
#[derive(Debug, Clone)]
pub struct ManualClock {
    active_ms: Arc<AtomicI64>,
    wall_ms: Arc<AtomicI64>,
    step_ms: i64,
}

impl ManualClock {
    /// Create a clock with both time sources at `start_ms`.
    pub fn new(start_ms: i64, step_ms: i64) -> Self {
        Self {
            active_ms: Arc::new(AtomicI64::new(start_ms)),
            wall_ms: Arc::new(AtomicI64::new(start_ms)),
            step_ms,
        }
    }

    /// Advance active time only (wall time stands still).
    pub fn advance_active(&self, ms: i64) {
        add_saturating(&self.active_ms, ms);
    }

    /// Advance wall time only (active time stands still).
    pub fn advance_wall(&self, ms: i64) {
        add_saturating(&self.wall_ms, ms);
    }

    /// Advance both time sources.
    pub fn advance(&self, ms: i64) {
        self.advance_active(ms);
        self.advance_wall(ms);
    }
}

fn add_saturating(counter: &AtomicI64, ms: i64) {
    // Single writer in practice; the update closure never fails.
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_add(ms))
    });
}

impl Clock for ManualClock {
    fn active_ms(&self) -> i64 {
        self.active_ms.load(Ordering::SeqCst)
    }

    fn wall_ms(&self) -> i64 {
        self.wall_ms.load(Ordering::SeqCst)
    }

    fn tick(&mut self) -> Result<i64, ClockError> {
        let next = self
            .active_ms()
            .checked_add(self.step_ms)
            .ok_or(ClockError::Overflow)?;
        self.active_ms.store(next, Ordering::SeqCst);
        self.advance_wall(self.step_ms);
        Ok(next)
    }

    fn restore(&mut self, active_ms: i64) {
        self.active_ms.fetch_max(active_ms, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn active_clock_starts_at_zero_and_steps() {
        let mut clock = ActiveClock::new(&ClockConfig { step_ms: 50 });
        assert_eq!(clock.active_ms(), 0);
        assert_eq!(clock.tick().unwrap(), 50);
        assert_eq!(clock.tick().unwrap(), 100);
        assert_eq!(clock.step_ms(), 50);
    }

    #[test]
    fn restore_resumes_from_persisted_time() {
        let mut clock = ActiveClock::new(&ClockConfig { step_ms: 50 });
        clock.restore(10_000);
        assert_eq!(clock.active_ms(), 10_000);
        clock.tick().unwrap();
        assert_eq!(clock.active_ms(), 10_050);
    }

    #[test]
    fn restore_never_moves_backwards() {
        let mut clock = ActiveClock::new(&ClockConfig { step_ms: 50 });
        clock.restore(500);
        clock.restore(100);
        assert_eq!(clock.active_ms(), 500);
    }

    #[test]
    fn overflow_is_reported() {
        let mut clock = ActiveClock::new(&ClockConfig { step_ms: 50 });
        clock.restore(i64::MAX);
        assert!(matches!(clock.tick(), Err(ClockError::Overflow)));
    }

    #[test]
    fn wall_clock_is_after_2020() {
        let clock = ActiveClock::new(&ClockConfig::default());
        assert!(clock.wall_ms() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_moves_sources_independently() {
        let mut clock = ManualClock::new(1_000, 50);
        let handle = clock.clone();
        handle.advance_active(500);
        assert_eq!((clock.active_ms(), clock.wall_ms()), (1_500, 1_000));
        handle.advance_wall(200);
        assert_eq!((clock.active_ms(), clock.wall_ms()), (1_500, 1_200));
        clock.tick().unwrap();
        assert_eq!((handle.active_ms(), handle.wall_ms()), (1_550, 1_250));
        assert_eq!(
            Now::of(&handle),
            Now {
                active_ms: 1_550,
                wall_ms: 1_250
            }
        );
    }
}
