//! Spectral floor-color classification.
//!
//! `ColorManager` owns the 6-channel sensor driver, the EMA-filtered sample and
//! the calibrated reference profiles. `update()` is polled every loop iteration
//! and only touches the sensor when an integration has completed, so it never
//! blocks the control loop.
//!
//! Classification is a priority cascade (first match wins):
//!
//! 1. silver: total light far above the white reference (specular reflection)
//! 2. black: total light below the absolute noise floor
//! 3. shadow zone: dim readings are red/blue only with a clean spectral shape,
//!    black otherwise
//! 4. bright zone: nearest reference shape among white, red and blue

use core::fmt::Write;

use smart_leds_trait::RGB8;

use crate::utils::{
    config::ClassifierConfig,
    controllers::calibration::{
        CalibrationError, CalibrationStore, CalibrationTarget, ReferenceProfiles,
    },
    math::spectral::{self, EmaFilter, SpectralSample, CHANNEL_COUNT},
};

/// Driver interface for a 6-channel spectral sensor (AS7262-class).
///
/// Register-level configuration (integration time, gain) belongs to the
/// implementation. Every method is expected to return promptly.
pub trait SpectralSensor {
    type Error: core::fmt::Debug;

    /// Detect and configure the sensor.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Start one integration cycle.
    fn start_measurement(&mut self) -> Result<(), Self::Error>;

    /// Non-blocking check for a completed integration.
    fn data_ready(&mut self) -> Result<bool, Self::Error>;

    /// Calibrated channel values, violet to red.
    fn read_calibrated(&mut self) -> Result<[f32; CHANNEL_COUNT], Self::Error>;

    /// Switch the on-board illumination LED.
    fn set_illumination(
        &mut self,
        on: bool,
    ) -> Result<(), Self::Error>;

    fn set_led_current(
        &mut self,
        current: LedCurrent,
    ) -> Result<(), Self::Error>;

    /// Temperature of the sensor die in degrees Celsius.
    fn die_temperature(&mut self) -> Result<f32, Self::Error>;
}

/// Illumination LED drive current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedCurrent {
    Ma12_5 = 0,
    Ma25 = 1,
    Ma50 = 2,
    Ma100 = 3,
}

impl LedCurrent {
    /// Map a 0..=3 level to a drive current; larger levels saturate at 100 mA.
    pub const fn from_level(level: u8) -> Self {
        match level {
            0 => LedCurrent::Ma12_5,
            1 => LedCurrent::Ma25,
            2 => LedCurrent::Ma50,
            _ => LedCurrent::Ma100,
        }
    }
}

/// Floor classes reported to the motion controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorClass {
    /// No sample has been consumed yet.
    Unknown,
    /// Void or black tape.
    Black,
    /// Checkpoint (specular reflection).
    Silver,
    White,
    Red,
    Blue,
}

impl ColorClass {
    pub const fn name(self) -> &'static str {
        match self {
            ColorClass::Unknown => "unknown",
            ColorClass::Black => "black",
            ColorClass::Silver => "silver",
            ColorClass::White => "white",
            ColorClass::Red => "red",
            ColorClass::Blue => "blue",
        }
    }
}

/// Errors raised by the color manager outside the polling path.
#[derive(Debug)]
pub enum ColorError<E: core::fmt::Debug> {
    /// Sensor absent or rejected initialization.
    NotDetected(E),
    /// Illumination LED could not be configured.
    Configuration(E),
    /// Measurement could not be started or read.
    Measurement(E),
}

/// Upper bound of the shadow zone for the given black reference.
pub fn shadow_threshold(
    black: &SpectralSample,
    config: &ClassifierConfig,
) -> f32 {
    black.sum() * config.shadow_scale + config.shadow_offset
}

/// Classify one filtered sample against the reference profiles.
pub fn classify(
    sample: &SpectralSample,
    refs: &ReferenceProfiles,
    config: &ClassifierConfig,
) -> ColorClass {
    // Checked first: a specular shape can otherwise pass for white.
    if sample.sum() > refs.white.sum() * config.silver_ratio {
        return ColorClass::Silver;
    }

    if sample.sum() < config.absolute_min_sum {
        return ColorClass::Black;
    }

    let d_white = spectral::spectral_distance(sample, &refs.white);
    let d_red = spectral::spectral_distance(sample, &refs.red);
    let d_blue = spectral::spectral_distance(sample, &refs.blue);

    if sample.sum() < shadow_threshold(&refs.black, config) {
        // Dim: only a clean red or blue signature beats black tape.
        if d_red < config.shape_confidence && d_red < d_blue && d_red < d_white {
            return ColorClass::Red;
        }
        if d_blue < config.shape_confidence && d_blue < d_red && d_blue < d_white {
            return ColorClass::Blue;
        }
        return ColorClass::Black;
    }

    // Ties resolve white, then red, then blue.
    if d_white <= d_red && d_white <= d_blue {
        ColorClass::White
    } else if d_red <= d_blue {
        ColorClass::Red
    } else {
        ColorClass::Blue
    }
}

/// Spectral classifier bound to one sensor and one calibration store.
pub struct ColorManager<S, St> {
    sensor: S,
    store: St,
    config: ClassifierConfig,
    filter: EmaFilter,
    references: ReferenceProfiles,
    ready: bool,
    measuring: bool,
    samples: u32,
}

impl<S, St> ColorManager<S, St>
where
    S: SpectralSensor,
    St: CalibrationStore,
{
    /// Create a manager; the sensor is untouched until [`ColorManager::begin`].
    pub fn new(
        sensor: S,
        store: St,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            sensor,
            store,
            filter: EmaFilter::new(config.ema_alpha),
            config,
            references: ReferenceProfiles::default(),
            ready: false,
            measuring: false,
            samples: 0,
        }
    }

    /// Initialize the sensor, load calibration and start the first integration.
    pub fn begin(&mut self) -> Result<(), ColorError<S::Error>> {
        self.sensor.init().map_err(ColorError::NotDetected)?;

        self.set_illumination(self.config.illumination)?;
        self.set_led_current(self.config.led_current)?;

        self.references = ReferenceProfiles::load(&mut self.store);
        tracing::info!(
            white_sum = self.references.white.sum(),
            black_sum = self.references.black.sum(),
            "color calibration loaded"
        );

        self.sensor
            .start_measurement()
            .map_err(ColorError::Measurement)?;
        self.measuring = true;
        // Polling stays off unless every step above succeeded.
        self.ready = true;
        Ok(())
    }

    /// Consume a completed integration if there is one.
    ///
    /// Returns `true` when a new sample was folded into the filter. Driver
    /// errors keep the previous filtered value.
    pub fn update(&mut self) -> bool {
        if !self.ready {
            return false;
        }
        if !self.measuring {
            // A failed restart is retried here instead of waiting on the sensor.
            match self.sensor.start_measurement() {
                Ok(()) => self.measuring = true,
                Err(e) => tracing::warn!("spectral restart failed: {:?}", e),
            }
            return false;
        }

        match self.sensor.data_ready() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!("spectral ready check failed: {:?}", e);
                return false;
            }
        }

        let consumed = match self.sensor.read_calibrated() {
            Ok(raw) => {
                self.filter.apply(&raw);
                self.samples = self.samples.saturating_add(1);
                true
            }
            Err(e) => {
                tracing::warn!("spectral read failed: {:?}", e);
                false
            }
        };

        // Hardware integrates the next sample while the loop carries on.
        if let Err(e) = self.sensor.start_measurement() {
            tracing::warn!("spectral restart failed: {:?}", e);
            self.measuring = false;
        }
        consumed
    }

    /// Capture the current filtered sample as the reference for `target` and persist it.
    ///
    /// Refused until a lit sample has been consumed. The in-memory reference
    /// only changes once the store accepted every key.
    pub fn calibrate(
        &mut self,
        target: CalibrationTarget,
    ) -> Result<(), CalibrationError<St::Error>> {
        let sample = *self.filter.state();
        if self.samples == 0 || sample.sum() <= 0.0 {
            tracing::warn!(color = target.name(), "no signal, calibration skipped");
            return Err(CalibrationError::NoSignal);
        }

        let mut updated = self.references;
        updated.set(target, sample);
        updated
            .save(&mut self.store, target)
            .map_err(CalibrationError::Storage)?;
        self.references = updated;
        tracing::info!(color = target.name(), sum = sample.sum(), "calibrated");
        Ok(())
    }

    /// Write all reference profiles as pasteable constants.
    pub fn export_calibration<W: Write>(
        &self,
        out: &mut W,
    ) -> core::fmt::Result {
        self.references.export(out)
    }

    /// Latest classification, `Unknown` until the first sample arrives.
    pub fn dominant_color(&self) -> ColorClass {
        if self.samples == 0 {
            return ColorClass::Unknown;
        }
        classify(self.filter.state(), &self.references, &self.config)
    }

    pub fn is_black(&self) -> bool {
        self.dominant_color() == ColorClass::Black
    }

    pub fn is_silver(&self) -> bool {
        self.dominant_color() == ColorClass::Silver
    }

    pub fn is_white(&self) -> bool {
        self.dominant_color() == ColorClass::White
    }

    pub fn is_red(&self) -> bool {
        self.dominant_color() == ColorClass::Red
    }

    pub fn is_blue(&self) -> bool {
        self.dominant_color() == ColorClass::Blue
    }

    /// Copy of the latest filtered sample.
    pub fn current_data(&self) -> SpectralSample {
        *self.filter.state()
    }

    /// Number of samples consumed since start-up.
    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    pub fn visual_rgb(&self) -> RGB8 {
        spectral::visual_rgb(self.filter.state(), self.config.visual_min_brightness)
    }

    /// Approximate color temperature of the reflected light (K).
    pub fn color_temperature(&self) -> f32 {
        spectral::color_temperature(self.filter.state())
    }

    /// Temperature of the sensor die, for drift diagnostics.
    pub fn sensor_die_temperature(&mut self) -> Result<f32, ColorError<S::Error>> {
        self.sensor
            .die_temperature()
            .map_err(ColorError::Measurement)
    }

    pub fn shadow_threshold(&self) -> f32 {
        shadow_threshold(&self.references.black, &self.config)
    }

    pub fn references(&self) -> &ReferenceProfiles {
        &self.references
    }

    /// Replace the in-memory references, e.g. with constants from a previous export.
    ///
    /// Nothing is persisted.
    pub fn set_references(
        &mut self,
        references: ReferenceProfiles,
    ) {
        self.references = references;
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn set_illumination(
        &mut self,
        on: bool,
    ) -> Result<(), ColorError<S::Error>> {
        self.sensor
            .set_illumination(on)
            .map_err(ColorError::Configuration)
    }

    /// Set the illumination drive level (0..=3, clamped).
    pub fn set_led_current(
        &mut self,
        level: u8,
    ) -> Result<(), ColorError<S::Error>> {
        self.sensor
            .set_led_current(LedCurrent::from_level(level))
            .map_err(ColorError::Configuration)
    }

    /// Hand back the driver and the store.
    pub fn release(self) -> (S, St) {
        (self.sensor, self.store)
    }
}
