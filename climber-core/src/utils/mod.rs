//! Utility re-exports for the Climber sensing core.
//!
//! - `config`: tunable classifier thresholds and ToF boot timing
//! - `controllers`: spectral color manager, calibration store, ToF array, LED indicator
//! - `math`: spectral sample filtering, distances and color conversions

pub mod config;
pub mod controllers;
pub mod math;

pub use config::{ClassifierConfig, TofTiming};
pub use controllers::{ColorManager, SensorCommand, SensorHub, TofArray};
pub use math::spectral::SpectralSample;
