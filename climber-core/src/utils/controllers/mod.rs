//! Sensor controllers
//!
//! - `color`: spectral floor-color classifier.
//! - `calibration`: reference profiles and their persistence.
//! - `tof`: time-of-flight array boot and polling on the shared I2C bus.
//! - `leds`: status LED mirroring the detected floor color.

pub mod calibration;
pub mod color;
pub mod leds;
pub mod tof;

use core::fmt::Debug;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embedded_hal::{digital::OutputPin, i2c::I2c};
use heapless::String;
use serde::{Deserialize, Serialize};
use smart_leds_trait::RGB8;

pub use calibration::{
    CalibrationError, CalibrationStore, CalibrationTarget, MemoryStore, ReferenceProfiles,
};
pub use color::{ColorClass, ColorError, ColorManager, SpectralSensor};
pub use leds::ColorIndicator;
pub use tof::{RangingDevice, TofArray, TofPosition, TofReading, TofReadings};

use crate::utils::math::spectral::SpectralSample;

/// Channel used to receive sensor commands (`SensorCommand` messages).
pub static SENSOR_CHANNEL: Channel<CriticalSectionRawMutex, SensorCommand, 8> = Channel::new();

/// Capacity of the text produced by an export command.
pub const EXPORT_CAPACITY: usize = 1024;

/// Operator commands for the sensing core.
///
/// Serialized as JSON with tag `"sc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "sc", rename_all = "snake_case")] // sc = sensor command
pub enum SensorCommand {
    /// Store the current filtered sample as the reference for `target`.
    Calibrate { target: CalibrationTarget },
    /// Print every reference profile as pasteable constants.
    Export,
    Illumination { on: bool },
    /// Illumination drive level, 0 to 3.
    LedCurrent { level: u8 },
}

/// Result of a successfully executed [`SensorCommand`].
#[derive(Debug, PartialEq)]
pub enum CommandOutcome {
    Calibrated(CalibrationTarget),
    Exported(String<EXPORT_CAPACITY>),
    Done,
}

#[derive(Debug)]
pub enum HubError<E: Debug, SE: Debug> {
    Color(ColorError<E>),
    Calibration(CalibrationError<SE>),
    /// Export text did not fit in [`EXPORT_CAPACITY`].
    ExportOverflow,
}

/// Everything the navigation layer reads in one cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorSnapshot {
    pub color: ColorClass,
    pub sample: SpectralSample,
    pub visual: RGB8,
    pub tof: TofReadings,
}

/// Color classifier and ToF array serviced from one cooperative loop.
pub struct SensorHub<'a, I2C, S, St, P, D> {
    pub color: ColorManager<S, St>,
    pub tof: TofArray<'a, I2C, P, D>,
}

impl<'a, I2C, S, St, P, D> SensorHub<'a, I2C, S, St, P, D>
where
    I2C: I2c,
    S: SpectralSensor,
    St: CalibrationStore,
    P: OutputPin,
    D: RangingDevice,
{
    pub fn new(
        color: ColorManager<S, St>,
        tof: TofArray<'a, I2C, P, D>,
    ) -> Self {
        Self { color, tof }
    }

    /// Service both sensor groups once. Returns `true` if anything new arrived.
    pub fn update(&mut self) -> bool {
        let color = self.color.update();
        let ranged = self.tof.update();
        color || ranged > 0
    }

    /// Run one command against the sensors.
    pub fn execute(
        &mut self,
        cmd: SensorCommand,
    ) -> Result<CommandOutcome, HubError<S::Error, St::Error>> {
        match cmd {
            SensorCommand::Calibrate { target } => {
                self.color.calibrate(target).map_err(HubError::Calibration)?;
                Ok(CommandOutcome::Calibrated(target))
            }
            SensorCommand::Export => {
                let mut text = String::new();
                self.color
                    .export_calibration(&mut text)
                    .map_err(|_| HubError::ExportOverflow)?;
                Ok(CommandOutcome::Exported(text))
            }
            SensorCommand::Illumination { on } => {
                self.color.set_illumination(on).map_err(HubError::Color)?;
                Ok(CommandOutcome::Done)
            }
            SensorCommand::LedCurrent { level } => {
                self.color.set_led_current(level).map_err(HubError::Color)?;
                Ok(CommandOutcome::Done)
            }
        }
    }

    /// Execute every command waiting in [`SENSOR_CHANNEL`] without blocking.
    ///
    /// Returns the number of commands handled.
    pub fn poll_commands(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(cmd) = SENSOR_CHANNEL.try_receive() {
            tracing::info!("Received sensor command: {:?}", cmd);
            match self.execute(cmd) {
                Ok(CommandOutcome::Exported(text)) => {
                    for line in text.lines() {
                        tracing::info!("{}", line);
                    }
                }
                Ok(outcome) => tracing::info!("Sensor command done: {:?}", outcome),
                Err(e) => tracing::error!("Sensor command failed: {:?}", e),
            }
            handled += 1;
        }
        handled
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            color: self.color.dominant_color(),
            sample: self.color.current_data(),
            visual: self.color.visual_rgb(),
            tof: self.tof.readings(),
        }
    }
}
