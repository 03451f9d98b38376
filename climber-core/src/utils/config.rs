//! Tunable parameters for the classifier and the ToF boot sequence.
//!
//! Both sections deserialize with per-field defaults, so a host can override a
//! single threshold from a JSON file and leave everything else untouched.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Thresholds and filter settings used by the spectral color classifier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// EMA smoothing factor, tuned for a ~28 ms integration time
    #[serde(default = "defaults::ema_alpha")]
    pub ema_alpha: f32,

    /// Sample sum above `white.sum * silver_ratio` is a specular (silver) reflection
    #[serde(default = "defaults::silver_ratio")]
    pub silver_ratio: f32,

    /// Below this sum there is not enough signal to trust any shape
    #[serde(default = "defaults::absolute_min_sum")]
    pub absolute_min_sum: f32,

    /// Shadow zone upper bound is `black.sum * shadow_scale + shadow_offset`
    #[serde(default = "defaults::shadow_scale")]
    pub shadow_scale: f32,

    #[serde(default = "defaults::shadow_offset")]
    pub shadow_offset: f32,

    /// Maximum shape distance accepted for red/blue inside the shadow zone
    #[serde(default = "defaults::shape_confidence")]
    pub shape_confidence: f32,

    /// Mixed brightness below which the visual RGB stays black
    #[serde(default = "defaults::visual_min_brightness")]
    pub visual_min_brightness: f32,

    /// Keep the sensor's illumination LED on for thermal and light stability
    #[serde(default = "defaults::illumination")]
    pub illumination: bool,

    /// Illumination LED drive level, 0 (lowest) to 3 (highest)
    #[serde(default = "defaults::led_current")]
    pub led_current: u8,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ema_alpha: defaults::ema_alpha(),
            silver_ratio: defaults::silver_ratio(),
            absolute_min_sum: defaults::absolute_min_sum(),
            shadow_scale: defaults::shadow_scale(),
            shadow_offset: defaults::shadow_offset(),
            shape_confidence: defaults::shape_confidence(),
            visual_min_brightness: defaults::visual_min_brightness(),
            illumination: defaults::illumination(),
            led_current: defaults::led_current(),
        }
    }
}

/// Bounded delays and bus rates used while addressing the ToF array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TofTiming {
    /// Hold time with every XSHUT low, lets the supply capacitors discharge
    #[serde(default = "defaults::xshut_settle_ms")]
    pub xshut_settle_ms: u32,

    /// Wait after raising one XSHUT before the sensor firmware answers
    #[serde(default = "defaults::firmware_boot_ms")]
    pub firmware_boot_ms: u32,

    /// Bus clock while sensors are acknowledged and re-addressed (Hz)
    #[serde(default = "defaults::boot_bus_hz")]
    pub boot_bus_hz: u32,

    /// Bus clock for steady-state polling (Hz)
    #[serde(default = "defaults::run_bus_hz")]
    pub run_bus_hz: u32,
}

impl Default for TofTiming {
    fn default() -> Self {
        Self {
            xshut_settle_ms: defaults::xshut_settle_ms(),
            firmware_boot_ms: defaults::firmware_boot_ms(),
            boot_bus_hz: defaults::boot_bus_hz(),
            run_bus_hz: defaults::run_bus_hz(),
        }
    }
}

impl TofTiming {
    pub fn xshut_settle(&self) -> Duration {
        Duration::from_millis(self.xshut_settle_ms as u64)
    }

    pub fn firmware_boot(&self) -> Duration {
        Duration::from_millis(self.firmware_boot_ms as u64)
    }
}

/// Default value functions for serde deserialization.
mod defaults {
    pub fn ema_alpha() -> f32 {
        0.6
    }

    pub fn silver_ratio() -> f32 {
        1.5
    }

    pub fn absolute_min_sum() -> f32 {
        15.0
    }

    pub fn shadow_scale() -> f32 {
        1.5
    }

    pub fn shadow_offset() -> f32 {
        10.0
    }

    pub fn shape_confidence() -> f32 {
        0.15
    }

    pub fn visual_min_brightness() -> f32 {
        5.0
    }

    pub fn illumination() -> bool {
        true
    }

    pub fn led_current() -> u8 {
        3
    }

    pub fn xshut_settle_ms() -> u32 {
        20
    }

    pub fn firmware_boot_ms() -> u32 {
        10
    }

    pub fn boot_bus_hz() -> u32 {
        100_000
    }

    pub fn run_bus_hz() -> u32 {
        400_000
    }
}
