use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One probe result. Rates are kilobits per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSample {
    pub timestamp_ms: u64,
    pub upload_rate_kbps: f64,
    pub download_rate_kbps: f64,
    pub rtt_ms: Option<u64>,
}

impl NetworkSample {
    /// Sample recorded for a failed probe.
    pub fn offline(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            upload_rate_kbps: 0.0,
            download_rate_kbps: 0.0,
            rtt_ms: None,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.upload_rate_kbps <= 0.0 && self.download_rate_kbps <= 0.0
    }

    /// Rate used for classification: upload, or download when no upload was measured.
    pub fn effective_kbps(&self) -> f64 {
        if self.upload_rate_kbps > 0.0 {
            self.upload_rate_kbps
        } else {
            self.download_rate_kbps
        }
    }
}

/// Kilobits per second for `bytes` moved in `elapsed` (bits per millisecond).
pub fn rate_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let ms = (elapsed.as_secs_f64() * 1000.0).max(1.0);
    (bytes as f64 * 8.0) / ms
}

/// Most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    samples: VecDeque<NetworkSample>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: NetworkSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&NetworkSample> {
        self.samples.back()
    }

    /// Average classification rate; `None` before the first sample.
    pub fn average_kbps(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(NetworkSample::effective_kbps).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_vec(&self) -> Vec<NetworkSample> {
        self.samples.iter().copied().collect()
    }
}
