//! Quality-to-parameter table.

use serde::{Deserialize, Serialize};

use super::QualityLevel;
use crate::config::{Bounds, GovernorConfig};

/// Tunables handed to running sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveParameterSet {
    pub concurrency: usize,
    pub piece_size: u64,
    pub max_retries: u32,
    pub quality_level: QualityLevel,
}

/// Manual override; `None` fields keep the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterOverride {
    pub concurrency: Option<usize>,
    pub piece_size: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Piecewise-linear: `t = 0` is min, `0.5` default, `1` max.
fn interpolate(b: Bounds<u64>, t: f64) -> u64 {
    let t = t.clamp(0.0, 1.0);
    let (lo, hi, f) = if t >= 0.5 {
        (b.default, b.max, (t - 0.5) * 2.0)
    } else {
        (b.min, b.default, t * 2.0)
    };
    (lo as f64 + (hi as f64 - lo as f64) * f).round() as u64
}

fn widen<T: Copy + Into<u64>>(b: Bounds<T>) -> Bounds<u64> {
    Bounds {
        min: b.min.into(),
        default: b.default.into(),
        max: b.max.into(),
    }
}

fn concurrency_bounds(config: &GovernorConfig) -> Bounds<u64> {
    let b = config.concurrency.normalized();
    Bounds {
        min: b.min.max(1) as u64,
        default: b.default.max(1) as u64,
        max: b.max.max(1) as u64,
    }
}

/// Parameters for `quality`. Concurrency and piece size rise with quality,
/// the retry budget falls.
pub fn parameters_for(quality: QualityLevel, config: &GovernorConfig) -> AdaptiveParameterSet {
    let t = quality.position();
    AdaptiveParameterSet {
        concurrency: interpolate(concurrency_bounds(config), t) as usize,
        piece_size: interpolate(config.piece_size.normalized(), t),
        max_retries: interpolate(widen(config.max_retries.normalized()), 1.0 - t) as u32,
        quality_level: quality,
    }
}

impl AdaptiveParameterSet {
    /// Apply `ovr` on top of `self`, clamped to the configured bounds.
    pub fn with_override(&self, ovr: &ParameterOverride, config: &GovernorConfig) -> Self {
        let c = config.concurrency.normalized();
        let p = config.piece_size.normalized();
        let r = config.max_retries.normalized();
        Self {
            concurrency: c.clamp(ovr.concurrency.unwrap_or(self.concurrency)).max(1),
            piece_size: p.clamp(ovr.piece_size.unwrap_or(self.piece_size)).max(1),
            max_retries: r.clamp(ovr.max_retries.unwrap_or(self.max_retries)),
            quality_level: self.quality_level,
        }
    }
}
