//! Time-of-flight sensor array on a shared I2C bus.
//!
//! Up to five identical ranging sensors power up at the same factory address.
//! `TofArray::begin` brings them up one at a time through their XSHUT pins and
//! moves each one to its own address; `TofArray::update` then polls every online
//! sensor without waiting on any of them.
//!
//! A slot that fails at any boot stage stays offline for the lifetime of the
//! array and reports `(-1, false)`. The robot keeps running on the rest.

use core::{cell::RefCell, ops::Index};

use embassy_time::Duration;
use embedded_hal::{delay::DelayNs, digital::OutputPin, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;

use crate::utils::config::TofTiming;

/// Number of sensor positions on the robot.
pub const TOF_COUNT: usize = 5;

/// Address every sensor answers on right after its XSHUT is raised.
pub const FACTORY_ADDRESS: u8 = 0x29;

/// Distance reported by a slot that never came online.
pub const OFFLINE_MM: i16 = -1;

/// Distance reported when a sensor sees no object in range.
pub const NO_TARGET_MM: i16 = 8888;

/// Range status the sensor firmware uses for a trustworthy measurement.
pub const RANGE_STATUS_VALID: u8 = 0;

/// Physical sensor positions, in boot order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TofPosition {
    FrontLeft = 0,
    FrontRight,
    BackLeft,
    BackRight,
    Center,
}

impl TofPosition {
    pub const ALL: [TofPosition; TOF_COUNT] = [
        TofPosition::FrontLeft,
        TofPosition::FrontRight,
        TofPosition::BackLeft,
        TofPosition::BackRight,
        TofPosition::Center,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            TofPosition::FrontLeft => "front_left",
            TofPosition::FrontRight => "front_right",
            TofPosition::BackLeft => "back_left",
            TofPosition::BackRight => "back_right",
            TofPosition::Center => "center",
        }
    }

    /// Address assigned to the sensor at this position during boot.
    pub const fn target_address(self) -> u8 {
        match self {
            TofPosition::FrontLeft => 0x30,
            TofPosition::FrontRight => 0x31,
            TofPosition::BackLeft => 0x32,
            TofPosition::BackRight => 0x33,
            TofPosition::Center => 0x34,
        }
    }
}

/// First-object view of one ranging result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangingResult {
    /// Objects the sensor separated in its field of view.
    pub objects_found: u8,
    /// Firmware range status of the first object, [`RANGE_STATUS_VALID`] when trustworthy.
    pub range_status: u8,
    /// Range of the first object in millimeters.
    pub range_mm: i16,
}

impl RangingResult {
    /// Decode into the distance/validity pair reported to consumers.
    ///
    /// A noisy first object still reports its range, only flagged invalid.
    pub const fn reading(&self) -> TofReading {
        if self.objects_found == 0 {
            TofReading {
                distance_mm: NO_TARGET_MM,
                valid: false,
            }
        } else {
            TofReading {
                distance_mm: self.range_mm,
                valid: self.range_status == RANGE_STATUS_VALID,
            }
        }
    }
}

/// Last known distance of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TofReading {
    pub distance_mm: i16,
    /// True only when the hardware reported a statistically trustworthy range.
    pub valid: bool,
}

impl TofReading {
    pub const OFFLINE: Self = Self {
        distance_mm: OFFLINE_MM,
        valid: false,
    };

    pub const fn is_offline(&self) -> bool {
        self.distance_mm == OFFLINE_MM
    }

    pub const fn is_no_target(&self) -> bool {
        self.distance_mm == NO_TARGET_MM
    }
}

/// Snapshot of every slot, indexed by [`TofPosition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TofReadings {
    readings: [TofReading; TOF_COUNT],
}

impl TofReadings {
    pub fn get(
        &self,
        position: TofPosition,
    ) -> TofReading {
        self.readings[position.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TofPosition, TofReading)> + '_ {
        TofPosition::ALL.iter().map(move |&p| (p, self.readings[p.index()]))
    }

    /// Closest trustworthy obstacle, if any sensor has one.
    pub fn nearest_valid(&self) -> Option<(TofPosition, i16)> {
        self.iter()
            .filter(|(_, r)| r.valid)
            .map(|(p, r)| (p, r.distance_mm))
            .min_by_key(|&(_, d)| d)
    }
}

impl Index<TofPosition> for TofReadings {
    type Output = TofReading;

    fn index(
        &self,
        position: TofPosition,
    ) -> &Self::Output {
        &self.readings[position.index()]
    }
}

/// Driver interface for one VL53L4CX-class ranging sensor.
///
/// Implementations are bound to a single sensor; the array creates one per
/// slot only after the sensor acknowledged on the bus.
pub trait RangingDevice {
    type Error: core::fmt::Debug;

    /// Bring the sensor firmware up, talking to it at `address`.
    fn init(
        &mut self,
        address: u8,
    ) -> Result<(), Self::Error>;

    /// Move the sensor to `address`; later calls use the new address.
    fn set_device_address(
        &mut self,
        address: u8,
    ) -> Result<(), Self::Error>;

    /// Start continuous ranging.
    fn start_measurement(&mut self) -> Result<(), Self::Error>;

    /// Non-blocking check for a completed measurement.
    fn measurement_data_ready(&mut self) -> Result<bool, Self::Error>;

    fn ranging_result(&mut self) -> Result<RangingResult, Self::Error>;

    /// Clear the pending interrupt and arm the next measurement.
    fn clear_interrupt_and_start_measurement(&mut self) -> Result<(), Self::Error>;
}

/// Control over the shared bus clock.
pub trait BusClock {
    fn set_frequency(
        &mut self,
        hz: u32,
    );
}

impl<F: FnMut(u32)> BusClock for F {
    fn set_frequency(
        &mut self,
        hz: u32,
    ) {
        self(hz)
    }
}

/// Bus whose clock cannot be changed at runtime.
pub struct FixedClock;

impl BusClock for FixedClock {
    fn set_frequency(
        &mut self,
        _hz: u32,
    ) {
    }
}

/// Reason a slot was taken offline during boot.
#[derive(Debug)]
pub enum SlotError<E: core::fmt::Debug> {
    /// Nothing answered at the factory address.
    NoAcknowledge,
    Init(E),
    Readdress(E),
    StartRanging(E),
    /// Driver handle missing for a stage that needs one.
    MissingDriver,
}

/// Boot sequence states. Slot stages carry the slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootPhase {
    AllOff,
    Activating(usize),
    AckCheck(usize),
    Initializing(usize),
    Readdressing(usize),
    StartRanging(usize),
    Done,
}

struct TofSlot<P, D> {
    position: TofPosition,
    xshut: P,
    driver: Option<D>,
    online: bool,
    last: TofReading,
}

impl<P, D> TofSlot<P, D> {
    fn new(
        position: TofPosition,
        xshut: P,
    ) -> Self {
        Self {
            position,
            xshut,
            driver: None,
            online: false,
            last: TofReading::OFFLINE,
        }
    }
}

/// Five ranging slots sharing one I2C bus.
pub struct TofArray<'a, I2C, P, D> {
    i2c: &'a RefCell<I2C>,
    slots: [TofSlot<P, D>; TOF_COUNT],
    timing: TofTiming,
    booted: Option<bool>,
}

impl<'a, I2C, P, D> TofArray<'a, I2C, P, D>
where
    I2C: I2c,
    P: OutputPin,
    D: RangingDevice,
{
    /// Create the array. `xshut` pins are given in [`TofPosition::ALL`] order.
    pub fn new(
        i2c: &'a RefCell<I2C>,
        xshut: [P; TOF_COUNT],
        timing: TofTiming,
    ) -> Self {
        let [fl, fr, bl, br, center] = xshut;
        Self {
            i2c,
            slots: [
                TofSlot::new(TofPosition::FrontLeft, fl),
                TofSlot::new(TofPosition::FrontRight, fr),
                TofSlot::new(TofPosition::BackLeft, bl),
                TofSlot::new(TofPosition::BackRight, br),
                TofSlot::new(TofPosition::Center, center),
            ],
            timing,
            booted: None,
        }
    }

    /// Run the one-time boot sequence.
    ///
    /// `connect` builds a driver for a slot whose sensor acknowledged; it gets
    /// a device handle on the shared bus. Returns `true` if at least one sensor
    /// came online. Later calls return the first outcome without touching the
    /// hardware.
    pub fn begin<F, C, Dl>(
        &mut self,
        mut connect: F,
        clock: &mut C,
        delay: &mut Dl,
    ) -> bool
    where
        F: FnMut(TofPosition, RefCellDevice<'a, I2C>) -> D,
        C: BusClock,
        Dl: DelayNs,
    {
        if let Some(outcome) = self.booted {
            tracing::warn!("ToF boot sequence already ran");
            return outcome;
        }

        tracing::info!("ToF boot sequence started");
        clock.set_frequency(self.timing.boot_bus_hz);

        let mut phase = BootPhase::AllOff;
        while phase != BootPhase::Done {
            phase = self.step(phase, &mut connect, delay);
        }

        clock.set_frequency(self.timing.run_bus_hz);

        let online = self.online_count();
        tracing::info!(online, "ToF boot sequence finished");
        let outcome = online > 0;
        self.booted = Some(outcome);
        outcome
    }

    fn step<F, Dl>(
        &mut self,
        phase: BootPhase,
        connect: &mut F,
        delay: &mut Dl,
    ) -> BootPhase
    where
        F: FnMut(TofPosition, RefCellDevice<'a, I2C>) -> D,
        Dl: DelayNs,
    {
        match phase {
            BootPhase::AllOff => {
                self.shutdown_all();
                wait(delay, self.timing.xshut_settle());
                BootPhase::Activating(0)
            }
            BootPhase::Activating(i) if i >= TOF_COUNT => BootPhase::Done,
            BootPhase::Activating(i) => {
                let slot = &mut self.slots[i];
                if let Err(e) = slot.xshut.set_high() {
                    tracing::warn!("XSHUT high failed on {}: {:?}", slot.position.name(), e);
                }
                wait(delay, self.timing.firmware_boot());
                BootPhase::AckCheck(i)
            }
            BootPhase::AckCheck(i) => {
                if self.i2c.borrow_mut().write(FACTORY_ADDRESS, &[]).is_err() {
                    self.disable(i, SlotError::NoAcknowledge);
                    return BootPhase::Activating(i + 1);
                }
                let position = self.slots[i].position;
                self.slots[i].driver = Some(connect(position, RefCellDevice::new(self.i2c)));
                BootPhase::Initializing(i)
            }
            BootPhase::Initializing(i) => {
                match self.with_driver(i, |d| d.init(FACTORY_ADDRESS), SlotError::Init) {
                    Ok(()) => BootPhase::Readdressing(i),
                    Err(e) => {
                        self.disable(i, e);
                        BootPhase::Activating(i + 1)
                    }
                }
            }
            BootPhase::Readdressing(i) => {
                let address = self.slots[i].position.target_address();
                match self.with_driver(i, |d| d.set_device_address(address), SlotError::Readdress) {
                    Ok(()) => BootPhase::StartRanging(i),
                    Err(e) => {
                        self.disable(i, e);
                        BootPhase::Activating(i + 1)
                    }
                }
            }
            BootPhase::StartRanging(i) => {
                match self.with_driver(i, |d| d.start_measurement(), SlotError::StartRanging) {
                    Ok(()) => {
                        let slot = &mut self.slots[i];
                        slot.online = true;
                        tracing::info!(
                            "ToF {} online at 0x{:02X}",
                            slot.position.name(),
                            slot.position.target_address()
                        );
                    }
                    Err(e) => self.disable(i, e),
                }
                BootPhase::Activating(i + 1)
            }
            BootPhase::Done => BootPhase::Done,
        }
    }

    fn with_driver(
        &mut self,
        i: usize,
        op: impl FnOnce(&mut D) -> Result<(), D::Error>,
        wrap: fn(D::Error) -> SlotError<D::Error>,
    ) -> Result<(), SlotError<D::Error>> {
        match self.slots[i].driver.as_mut() {
            Some(driver) => op(driver).map_err(wrap),
            None => Err(SlotError::MissingDriver),
        }
    }

    /// Take a slot offline for good: drop its driver and hold its sensor in reset.
    fn disable(
        &mut self,
        i: usize,
        reason: SlotError<D::Error>,
    ) {
        let slot = &mut self.slots[i];
        tracing::warn!("ToF {} offline: {:?}", slot.position.name(), reason);
        slot.online = false;
        slot.driver = None;
        slot.last = TofReading::OFFLINE;
        if let Err(e) = slot.xshut.set_low() {
            tracing::warn!("XSHUT low failed on {}: {:?}", slot.position.name(), e);
        }
    }

    fn shutdown_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Err(e) = slot.xshut.set_low() {
                tracing::warn!("XSHUT low failed on {}: {:?}", slot.position.name(), e);
            }
        }
    }

    /// Poll every online sensor once. Never waits.
    ///
    /// Returns how many slots got a fresh measurement. A driver error leaves
    /// that slot's last reading in place until the next poll.
    pub fn update(&mut self) -> usize {
        let mut refreshed = 0;
        for slot in self.slots.iter_mut().filter(|s| s.online) {
            let Some(driver) = slot.driver.as_mut() else {
                continue;
            };

            match driver.measurement_data_ready() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!("ToF {} ready check failed: {:?}", slot.position.name(), e);
                    continue;
                }
            }

            let result = driver.ranging_result();
            // Re-arm before anything else so the next ready signal is not missed.
            if let Err(e) = driver.clear_interrupt_and_start_measurement() {
                tracing::warn!("ToF {} re-arm failed: {:?}", slot.position.name(), e);
            }

            match result {
                Ok(result) => {
                    slot.last = result.reading();
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!("ToF {} read failed: {:?}", slot.position.name(), e);
                }
            }
        }
        refreshed
    }

    /// Last known reading of every slot; offline slots are `(-1, false)`.
    pub fn readings(&self) -> TofReadings {
        let mut readings = [TofReading::OFFLINE; TOF_COUNT];
        for (dst, slot) in readings.iter_mut().zip(self.slots.iter()) {
            if slot.online {
                *dst = slot.last;
            }
        }
        TofReadings { readings }
    }

    pub fn is_online(
        &self,
        position: TofPosition,
    ) -> bool {
        self.slots[position.index()].online
    }

    pub fn online_count(&self) -> usize {
        self.slots.iter().filter(|s| s.online).count()
    }

    /// Power every sensor down and release all drivers.
    ///
    /// The array stays offline afterwards; `begin` will not run again.
    pub fn shutdown(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.online = false;
            slot.driver = None;
            slot.last = TofReading::OFFLINE;
        }
        self.shutdown_all();
        self.booted.get_or_insert(false);
        tracing::info!("ToF array shut down");
    }
}

fn wait<Dl: DelayNs>(
    delay: &mut Dl,
    duration: Duration,
) {
    delay.delay_us(u32::try_from(duration.as_micros()).unwrap_or(u32::MAX));
}
