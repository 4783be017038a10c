use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::QualityThresholds;

/// Discretised link quality, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    Bad,
    Offline,
}

impl QualityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
            QualityLevel::Bad => "bad",
            QualityLevel::Offline => "offline",
        }
    }

    /// Position in the parameter table: 1.0 best, 0.0 worst.
    pub(super) fn position(self) -> f64 {
        match self {
            QualityLevel::Excellent => 1.0,
            QualityLevel::Good => 0.75,
            QualityLevel::Fair => 0.5,
            QualityLevel::Poor => 0.25,
            QualityLevel::Bad | QualityLevel::Offline => 0.0,
        }
    }

    /// Multiplier applied to the probe sample size after a probe at this level.
    pub(super) fn sample_factor(self) -> f64 {
        match self {
            QualityLevel::Excellent | QualityLevel::Good => 1.5,
            QualityLevel::Fair => 0.8,
            QualityLevel::Poor | QualityLevel::Bad | QualityLevel::Offline => 0.5,
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level for an average upload rate in kbps. Zero (or negative) is Offline.
pub fn classify(avg_kbps: f64, thresholds: &QualityThresholds) -> QualityLevel {
    if avg_kbps.is_nan() || avg_kbps <= 0.0 {
        QualityLevel::Offline
    } else if avg_kbps >= thresholds.excellent_kbps {
        QualityLevel::Excellent
    } else if avg_kbps >= thresholds.good_kbps {
        QualityLevel::Good
    } else if avg_kbps >= thresholds.fair_kbps {
        QualityLevel::Fair
    } else if avg_kbps >= thresholds.poor_kbps {
        QualityLevel::Poor
    } else {
        QualityLevel::Bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_buckets() {
        let t = QualityThresholds::default();
        assert_eq!(classify(12_000.0, &t), QualityLevel::Excellent);
        assert_eq!(classify(10_000.0, &t), QualityLevel::Excellent);
        assert_eq!(classify(6_000.0, &t), QualityLevel::Good);
        assert_eq!(classify(2_000.0, &t), QualityLevel::Fair);
        assert_eq!(classify(800.0, &t), QualityLevel::Poor);
        assert_eq!(classify(100.0, &t), QualityLevel::Bad);
        assert_eq!(classify(0.0, &t), QualityLevel::Offline);
        assert_eq!(classify(f64::NAN, &t), QualityLevel::Offline);
    }
}
