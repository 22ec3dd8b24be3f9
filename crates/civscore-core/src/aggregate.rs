//! Neighborhood aggregation.
//!
//! A result entry is a weighted sum of info scores over the cube window of
//! `detection_radius` cells around its center. Cells inside the smaller
//! core box add to the non-decaying core sum; the rest add to the outer sum.
//! Full aggregation and delta propagation share [`Aggregation::weight`] and
//! [`Aggregation::is_core`], so a delta applied to a cached entry changes its
//! sums exactly as a full recompute would.

use civscore_types::CellId;

use crate::config::AggregationConfig;
use crate::grid::{window, GridIndex, Offset};

/// Logistic exponents are clamped to this magnitude.
const MAX_EXPONENT: f64 = 50.0;

/// Snapshot of the tunables a cached result entry was computed under.
///
/// An entry is valid only while the current signature equals its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigSignature {
    /// Detection radius at compute time.
    pub detection_radius: i32,
    /// Core radius at compute time.
    pub core_radius: i32,
    /// Bit pattern of the distance falloff at compute time.
    pub distance_alpha_bits: u64,
}

impl ConfigSignature {
    /// Signature of `config`.
    pub const fn of(config: &AggregationConfig) -> Self {
        Self {
            detection_radius: config.detection_radius,
            core_radius: config.core_radius,
            distance_alpha_bits: config.distance_alpha.to_bits(),
        }
    }
}

/// Core and outer weighted sums.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sums {
    /// Weighted sum inside the core box.
    pub core: f64,
    /// Weighted sum outside the core box.
    pub outer: f64,
}

/// Aggregation tunables with their derived constants.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    config: AggregationConfig,
    signature: ConfigSignature,
    /// `logistic(0)`, the offset that makes `normalize(0) == 0`.
    baseline: f64,
}

impl Aggregation {
    /// Derive constants for `config`.
    pub fn new(config: AggregationConfig) -> Self {
        let baseline = logistic(0.0, config.logistic_k, config.logistic_mid);
        Self {
            signature: ConfigSignature::of(&config),
            config,
            baseline,
        }
    }

    /// The tunables.
    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Signature stamped on entries computed under these tunables.
    pub const fn signature(&self) -> ConfigSignature {
        self.signature
    }

    /// Distance weight `1 / (1 + alpha * d^2)`.
    pub fn weight(&self, offset: Offset) -> f64 {
        1.0 / self.config.distance_alpha.mul_add(offset.dist_sq(), 1.0)
    }

    /// Whether `offset` falls in the core box.
    pub const fn is_core(&self, offset: Offset) -> bool {
        offset.within_box(self.config.core_radius)
    }

    /// Add `score` seen at `offset` from the center into `sums`.
    pub fn accumulate(&self, sums: &mut Sums, offset: Offset, score: f64) {
        let weighted = score * self.weight(offset);
        if self.is_core(offset) {
            sums.core += weighted;
        } else {
            sums.outer += weighted;
        }
    }

    /// Reference aggregation around `center`. Cells outside the world's
    /// vertical bounds are skipped; `lookup` supplies every other score.
    pub fn aggregate<F>(&self, center: CellId, grid: &GridIndex, mut lookup: F) -> Sums
    where
        F: FnMut(CellId) -> f64,
    {
        let mut sums = Sums::default();
        for offset in window(self.config.detection_radius) {
            let cell = center.offset(offset.dx, offset.dy, offset.dz);
            if !grid.contains(cell) {
                continue;
            }
            self.accumulate(&mut sums, offset, lookup(cell));
        }
        sums
    }

    /// Map a raw weighted sum to `[0, 1]` along a logistic curve rescaled
    /// so that `normalize(0) == 0`.
    pub fn normalize(&self, raw: f64) -> f64 {
        let span = 1.0 - self.baseline;
        let value = (logistic(raw, self.config.logistic_k, self.config.logistic_mid)
            - self.baseline)
            / span;
        if value.is_nan() {
            return 0.0;
        }
        value.clamp(0.0, 1.0)
    }
}

fn logistic(x: f64, k: f64, mid: f64) -> f64 {
    let exponent = (-k * (x - mid)).clamp(-MAX_EXPONENT, MAX_EXPONENT);
    if exponent.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + exponent.exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;

    fn aggregation(detection_radius: i32, core_radius: i32) -> Aggregation {
        Aggregation::new(AggregationConfig {
            detection_radius,
            core_radius,
            ..AggregationConfig::default()
        })
    }

    fn grid() -> GridIndex {
        GridIndex::new(&GridConfig::default())
    }

    #[test]
    fn weight_follows_inverse_square_falloff() {
        let agg = aggregation(3, 1);
        let at = |dx, dy, dz| agg.weight(Offset { dx, dy, dz });
        assert!((at(0, 0, 0) - 1.0).abs() < 1e-12);
        assert!((at(2, 0, 0) - 1.0 / 3.0).abs() < 1e-12);
        assert!((at(1, 1, 1) - 1.0 / 2.5).abs() < 1e-12);
    }

    #[test]
    fn core_box_is_checked_per_axis() {
        let agg = aggregation(3, 1);
        assert!(agg.is_core(Offset { dx: 1, dy: -1, dz: 1 }));
        assert!(!agg.is_core(Offset { dx: 2, dy: 0, dz: 0 }));
    }

    #[test]
    fn single_scored_cell_fills_the_core() {
        let agg = aggregation(1, 0);
        let center = CellId::new(0, 0, 0);
        let sums = agg.aggregate(center, &grid(), |cell| if cell == center { 1.0 } else { 0.0 });
        assert!((sums.core - 1.0).abs() < 1e-12);
        assert!(sums.outer.abs() < 1e-12);
    }

    #[test]
    fn neighbors_land_in_the_outer_sum() {
        let agg = aggregation(2, 0);
        let center = CellId::new(0, 0, 0);
        let sums = agg.aggregate(center, &grid(), |cell| {
            if cell == CellId::new(2, 0, 0) { 0.6 } else { 0.0 }
        });
        assert!(sums.core.abs() < 1e-12);
        assert!((sums.outer - 0.2).abs() < 1e-12);
    }

    #[test]
    fn out_of_bounds_cells_are_never_looked_up() {
        let agg = aggregation(2, 0);
        let grid = grid();
        let top = CellId::new(0, 0, grid.max_sy());
        let mut seen = Vec::new();
        let _ = agg.aggregate(top, &grid, |cell| {
            seen.push(cell);
            0.0
        });
        assert!(seen.iter().all(|cell| grid.contains(*cell)));
        // 5 x 5 columns, 3 layers inside the world.
        assert_eq!(seen.len(), 75);
    }

    #[test]
    fn normalize_pins_zero_and_saturates() {
        let agg = aggregation(3, 1);
        assert!(agg.normalize(0.0).abs() < 1e-12);
        assert!(agg.normalize(-10.0).abs() < 1e-12);
        assert!((agg.normalize(1e9) - 1.0).abs() < 1e-9);
        assert!(agg.normalize(f64::NAN).abs() < 1e-12);
        let one = agg.normalize(1.0);
        assert!(one > 0.0 && one < 1.0);
        assert!(agg.normalize(2.0) > one);
    }

    #[test]
    fn normalize_matches_rescaled_logistic() {
        let agg = aggregation(3, 1);
        let raw = |x: f64| 1.0 / (1.0 + (-2.0 * (x - 1.5)).exp());
        let expected = (raw(1.0) - raw(0.0)) / (1.0 - raw(0.0));
        assert!((agg.normalize(1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn signature_tracks_radii_and_falloff() {
        let base = AggregationConfig::default();
        let wider = AggregationConfig {
            detection_radius: base.detection_radius + 1,
            ..base.clone()
        };
        let softer = AggregationConfig {
            distance_alpha: 0.25,
            ..base.clone()
        };
        let steeper = AggregationConfig {
            logistic_k: 4.0,
            ..base.clone()
        };
        let sig = ConfigSignature::of(&base);
        assert_ne!(sig, ConfigSignature::of(&wider));
        assert_ne!(sig, ConfigSignature::of(&softer));
        // The curve applies at read time, so it does not invalidate sums.
        assert_eq!(sig, ConfigSignature::of(&steeper));
    }
}
