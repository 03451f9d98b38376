//! Simulated robot hardware: a shared I2C bus with up to five ranging sensors
//! behind XSHUT lines, and a spectral sensor that drives over a looping track.

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use climber_core::utils::controllers::{
    color::LedCurrent,
    tof::{RangingResult, FACTORY_ADDRESS, RANGE_STATUS_VALID, TOF_COUNT},
    ReferenceProfiles, RangingDevice, SpectralSensor, TofPosition,
};
use embassy_time::{Duration, Instant};
use embedded_hal::{
    digital::{self, OutputPin},
    i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation},
};
use embedded_hal_bus::i2c::RefCellDevice;

const REG_DEVICE_ADDRESS: [u8; 2] = [0x00, 0x01];
const REG_MODEL_ID: [u8; 2] = [0x01, 0x0F];
const REG_INTERRUPT_CLEAR: [u8; 2] = [0x00, 0x86];
const REG_SYSTEM_START: [u8; 2] = [0x00, 0x87];
const REG_RANGE_STATUS: [u8; 2] = [0x00, 0x89];

const RANGING_PERIOD: Duration = Duration::from_millis(33);
const INTEGRATION_TIME: Duration = Duration::from_millis(28);
const SURFACE_TIME: Duration = Duration::from_secs(3);

/// Surfaces under the color sensor, in track order, as calibrated channel values.
const TRACK: [(&str, [f32; 6]); 6] = [
    ("white", [170.0, 168.0, 166.0, 165.0, 166.0, 165.0]),
    ("red", [30.0, 28.0, 40.0, 95.0, 230.0, 277.0]),
    ("blue", [210.0, 190.0, 95.0, 45.0, 30.0, 30.0]),
    ("black tape", [4.0, 4.0, 3.5, 3.5, 3.0, 3.0]),
    ("silver foil", [280.0, 282.0, 278.0, 276.0, 270.0, 268.0]),
    ("red in shadow", [4.0, 3.5, 5.0, 9.0, 10.0, 11.0]),
];

/// References matching the simulated track, as an export would print them.
pub const SIM_REFERENCES: ReferenceProfiles = ReferenceProfiles::from_static(
    [170.0, 168.0, 166.0, 165.0, 166.0, 165.0],
    [30.0, 28.0, 40.0, 95.0, 230.0, 277.0],
    [210.0, 190.0, 95.0, 45.0, 30.0, 30.0],
    [4.0, 4.0, 3.5, 3.5, 3.0, 3.0],
);

/// Electrical state of the ranging sensors.
pub struct Rig {
    wired: [bool; TOF_COUNT],
    powered: [bool; TOF_COUNT],
    addresses: [u8; TOF_COUNT],
    pub clock_hz: u32,
}

pub type SharedRig = Rc<RefCell<Rig>>;

impl Rig {
    pub fn shared(wired: [bool; TOF_COUNT]) -> SharedRig {
        Rc::new(RefCell::new(Self {
            wired,
            powered: [true; TOF_COUNT],
            addresses: [FACTORY_ADDRESS; TOF_COUNT],
            clock_hz: 400_000,
        }))
    }

    /// Slot answering at `address`. Two powered sensors on one address collide.
    fn responder(
        &self,
        address: u8,
    ) -> Result<usize, ErrorKind> {
        let mut hits = (0..TOF_COUNT)
            .filter(|&i| self.wired[i] && self.powered[i] && self.addresses[i] == address);
        match (hits.next(), hits.next()) {
            (Some(i), None) => Ok(i),
            (Some(_), Some(_)) => Err(ErrorKind::ArbitrationLoss),
            _ => Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
        }
    }
}

/// I2C controller wired to the simulated sensors.
pub struct SimBus {
    rig: SharedRig,
}

impl SimBus {
    pub fn new(rig: SharedRig) -> Self {
        Self { rig }
    }
}

impl i2c::ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut rig = self.rig.borrow_mut();
        let slot = rig.responder(address)?;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let [hi, lo, new] = bytes {
                        if [*hi, *lo] == REG_DEVICE_ADDRESS {
                            rig.addresses[slot] = *new;
                        }
                    }
                }
                Operation::Read(buf) => buf.fill(0),
            }
        }
        Ok(())
    }
}

/// XSHUT line of one sensor. Low holds the sensor in reset and forgets its address.
pub struct SimXshut {
    rig: SharedRig,
    slot: usize,
}

impl SimXshut {
    pub fn new(
        rig: SharedRig,
        slot: usize,
    ) -> Self {
        Self { rig, slot }
    }
}

impl digital::ErrorType for SimXshut {
    type Error = Infallible;
}

impl OutputPin for SimXshut {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut rig = self.rig.borrow_mut();
        rig.powered[self.slot] = false;
        rig.addresses[self.slot] = FACTORY_ADDRESS;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.rig.borrow_mut().powered[self.slot] = true;
        Ok(())
    }
}

/// Ranging driver talking to one simulated sensor over the shared bus.
pub struct SimRanger<'a> {
    position: TofPosition,
    bus: RefCellDevice<'a, SimBus>,
    address: u8,
    ready_at: Option<Instant>,
    count: u32,
}

impl<'a> SimRanger<'a> {
    pub fn new(
        position: TofPosition,
        bus: RefCellDevice<'a, SimBus>,
    ) -> Self {
        Self {
            position,
            bus,
            address: FACTORY_ADDRESS,
            ready_at: None,
            count: 0,
        }
    }

    fn arm(&mut self) {
        self.ready_at = Some(Instant::now() + RANGING_PERIOD);
    }

    /// Slowly swinging obstacle, occasionally out of range or too close to trust.
    fn model(&self) -> RangingResult {
        if self.count % 12 == 11 {
            return RangingResult {
                objects_found: 0,
                range_status: RANGE_STATUS_VALID,
                range_mm: 0,
            };
        }
        let t = Instant::now().as_millis() as f32 / 1000.0;
        let phase = self.position.index() as f32;
        let range_mm = (220.0 + 180.0 * (t * 0.7 + phase).sin()) as i16;
        RangingResult {
            objects_found: 1,
            range_status: if range_mm < 60 { 4 } else { RANGE_STATUS_VALID },
            range_mm,
        }
    }
}

impl RangingDevice for SimRanger<'_> {
    type Error = ErrorKind;

    fn init(
        &mut self,
        address: u8,
    ) -> Result<(), Self::Error> {
        let mut id = [0u8; 2];
        self.bus.write_read(address, &REG_MODEL_ID, &mut id)?;
        self.address = address;
        Ok(())
    }

    fn set_device_address(
        &mut self,
        address: u8,
    ) -> Result<(), Self::Error> {
        let [hi, lo] = REG_DEVICE_ADDRESS;
        self.bus.write(self.address, &[hi, lo, address])?;
        self.address = address;
        Ok(())
    }

    fn start_measurement(&mut self) -> Result<(), Self::Error> {
        let [hi, lo] = REG_SYSTEM_START;
        self.bus.write(self.address, &[hi, lo, 0x40])?;
        self.arm();
        Ok(())
    }

    fn measurement_data_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ready_at.is_some_and(|at| Instant::now() >= at))
    }

    fn ranging_result(&mut self) -> Result<RangingResult, Self::Error> {
        let mut raw = [0u8; 4];
        self.bus.write_read(self.address, &REG_RANGE_STATUS, &mut raw)?;
        self.count = self.count.wrapping_add(1);
        Ok(self.model())
    }

    fn clear_interrupt_and_start_measurement(&mut self) -> Result<(), Self::Error> {
        let [hi, lo] = REG_INTERRUPT_CLEAR;
        self.bus.write(self.address, &[hi, lo, 0x01])?;
        self.arm();
        Ok(())
    }
}

/// Spectral sensor looking at [`TRACK`], one surface every few seconds.
pub struct SimSpectral {
    origin: Instant,
    ready_at: Option<Instant>,
    illumination: bool,
    current: LedCurrent,
    surface: usize,
}

impl SimSpectral {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            ready_at: None,
            illumination: false,
            current: LedCurrent::Ma12_5,
            surface: usize::MAX,
        }
    }
}

impl SpectralSensor for SimSpectral {
    type Error = Infallible;

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn start_measurement(&mut self) -> Result<(), Self::Error> {
        self.ready_at = Some(Instant::now() + INTEGRATION_TIME);
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ready_at.is_some_and(|at| Instant::now() >= at))
    }

    fn read_calibrated(&mut self) -> Result<[f32; 6], Self::Error> {
        self.ready_at = None;
        let elapsed = self.origin.elapsed();
        let surface = (elapsed.as_millis() / SURFACE_TIME.as_millis()) as usize % TRACK.len();
        if surface != self.surface {
            tracing::info!("sim: driving onto {}", TRACK[surface].0);
            self.surface = surface;
        }

        let gain = if self.illumination {
            1.0 + 0.1 * self.current as u8 as f32
        } else {
            0.4
        };
        let ripple = 1.0 + 0.02 * (elapsed.as_millis() as f32 / 50.0).sin();
        Ok(TRACK[surface].1.map(|c| c * gain * ripple))
    }

    fn set_illumination(
        &mut self,
        on: bool,
    ) -> Result<(), Self::Error> {
        self.illumination = on;
        Ok(())
    }

    fn set_led_current(
        &mut self,
        current: LedCurrent,
    ) -> Result<(), Self::Error> {
        self.current = current;
        Ok(())
    }

    fn die_temperature(&mut self) -> Result<f32, Self::Error> {
        Ok(31.0 + self.current as u8 as f32 * 0.5)
    }
}
