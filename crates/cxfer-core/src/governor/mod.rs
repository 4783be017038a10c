//! Network condition governor: samples link quality through the transport and
//! turns it into concurrency, piece size and retry budget.

mod engine;
mod params;
mod probe;
mod quality;
mod sample;

pub use engine::NetworkGovernor;
pub use params::{parameters_for, AdaptiveParameterSet, ParameterOverride};
pub use probe::Prober;
pub use quality::{classify, QualityLevel};
pub use sample::{rate_kbps, NetworkSample, SampleWindow};
