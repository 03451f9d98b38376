use core::cell::RefCell;
use std::rc::Rc;

use climber_core::utils::config::{ClassifierConfig, TofTiming};
use climber_core::utils::controllers::color::LedCurrent;
use climber_core::utils::controllers::tof::{
    RangingResult, FACTORY_ADDRESS, NO_TARGET_MM, OFFLINE_MM, TOF_COUNT,
};
use climber_core::utils::controllers::{
    CalibrationError, CalibrationTarget, ColorClass, ColorManager, CommandOutcome, HubError,
    MemoryStore, RangingDevice, SensorCommand, SensorHub, SpectralSensor, TofArray, TofPosition,
    TofReading, SENSOR_CHANNEL,
};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, I2c, NoAcknowledgeSource};
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_hal_mock::eh1::digital::{Mock as PinMock, State as PinState, Transaction as PinTrans};
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};

/// Register holding the sensor's 7-bit bus address.
const I2C_SLAVE_DEVICE_ADDRESS: [u8; 2] = [0x00, 0x01];

/// Empty write checking for a sensor at the factory address.
pub fn ack(present: bool) -> I2cTrans {
    let t = I2cTrans::write(FACTORY_ADDRESS, vec![]);
    if present {
        t
    } else {
        t.with_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
    }
}

/// Address change issued by the ranging driver.
pub fn readdress(position: TofPosition) -> I2cTrans {
    let mut data = I2C_SLAVE_DEVICE_ADDRESS.to_vec();
    data.push(position.target_address());
    I2cTrans::write(FACTORY_ADDRESS, data)
}

/// Bus traffic of a clean boot where `wired` sensors answer.
fn boot_bus(wired: [bool; TOF_COUNT]) -> Vec<I2cTrans> {
    let mut expectations = Vec::new();
    for (position, present) in TofPosition::ALL.iter().zip(wired) {
        expectations.push(ack(present));
        if present {
            expectations.push(readdress(*position));
        }
    }
    expectations
}

/// XSHUT traffic: all low, then high one by one, low again for slots left offline.
fn xshut_pins(online: [bool; TOF_COUNT]) -> [PinMock; TOF_COUNT] {
    online.map(|on| {
        let mut seq = vec![
            PinTrans::set(PinState::Low),
            PinTrans::set(PinState::High),
        ];
        if !on {
            seq.push(PinTrans::set(PinState::Low));
        }
        PinMock::new(&seq)
    })
}

#[derive(Clone, Copy)]
struct BenchSlot {
    connected: bool,
    fail_init: bool,
    fail_start: bool,
    fail_read: bool,
    started: bool,
    ready: bool,
    result: RangingResult,
    polls: u32,
    rearms: u32,
}

impl BenchSlot {
    const IDLE: Self = Self {
        connected: false,
        fail_init: false,
        fail_start: false,
        fail_read: false,
        started: false,
        ready: false,
        result: RangingResult {
            objects_found: 0,
            range_status: 0,
            range_mm: 0,
        },
        polls: 0,
        rearms: 0,
    };
}

/// Shared view of every fake sensor's internal state.
struct Bench {
    slots: [BenchSlot; TOF_COUNT],
}

impl Bench {
    fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            slots: [BenchSlot::IDLE; TOF_COUNT],
        }))
    }

    fn publish(
        &mut self,
        position: TofPosition,
        result: RangingResult,
    ) {
        let slot = &mut self.slots[position.index()];
        slot.result = result;
        slot.ready = true;
    }
}

/// Ranging driver that only touches the bus to change its address.
struct FakeRanger<'a> {
    position: TofPosition,
    bus: RefCellDevice<'a, I2cMock>,
    bench: Rc<RefCell<Bench>>,
}

impl FakeRanger<'_> {
    fn with_slot<R>(
        &self,
        f: impl FnOnce(&mut BenchSlot) -> R,
    ) -> R {
        f(&mut self.bench.borrow_mut().slots[self.position.index()])
    }
}

impl RangingDevice for FakeRanger<'_> {
    type Error = ErrorKind;

    fn init(
        &mut self,
        address: u8,
    ) -> Result<(), Self::Error> {
        assert_eq!(address, FACTORY_ADDRESS);
        if self.with_slot(|s| s.fail_init) {
            Err(ErrorKind::Other)
        } else {
            Ok(())
        }
    }

    fn set_device_address(
        &mut self,
        address: u8,
    ) -> Result<(), Self::Error> {
        let [hi, lo] = I2C_SLAVE_DEVICE_ADDRESS;
        self.bus.write(FACTORY_ADDRESS, &[hi, lo, address])
    }

    fn start_measurement(&mut self) -> Result<(), Self::Error> {
        self.with_slot(|s| {
            if s.fail_start {
                Err(ErrorKind::Other)
            } else {
                s.started = true;
                Ok(())
            }
        })
    }

    fn measurement_data_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.with_slot(|s| {
            s.polls += 1;
            s.ready
        }))
    }

    fn ranging_result(&mut self) -> Result<RangingResult, Self::Error> {
        self.with_slot(|s| {
            if s.fail_read {
                Err(ErrorKind::Bus)
            } else {
                Ok(s.result)
            }
        })
    }

    fn clear_interrupt_and_start_measurement(&mut self) -> Result<(), Self::Error> {
        self.with_slot(|s| {
            s.rearms += 1;
            s.ready = false;
        });
        Ok(())
    }
}

/// Delay that only adds up what it was asked to wait.
#[derive(Default)]
struct TallyDelay {
    total_ns: u64,
}

impl DelayNs for TallyDelay {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        self.total_ns += ns as u64;
    }
}

fn connect_fake<'a>(
    bench: &Rc<RefCell<Bench>>
) -> impl FnMut(TofPosition, RefCellDevice<'a, I2cMock>) -> FakeRanger<'a> + '_ {
    move |position, bus| {
        bench.borrow_mut().slots[position.index()].connected = true;
        FakeRanger {
            position,
            bus,
            bench: bench.clone(),
        }
    }
}

#[test]
fn test_three_of_five_wired() {
    let wired = [true, false, true, false, true];
    let i2c_bus = RefCell::new(I2cMock::new(&boot_bus(wired)));
    let pins = xshut_pins(wired);
    let mut pin_handles = pins.clone();
    let bench = Bench::new();

    let mut clock_log = Vec::new();
    let mut clock = |hz: u32| clock_log.push(hz);
    let mut delay = TallyDelay::default();

    let mut tof = TofArray::new(&i2c_bus, pins, TofTiming::default());
    assert!(tof.begin(connect_fake(&bench), &mut clock, &mut delay));
    drop(clock);

    // Bus slowed for the boot, restored afterwards.
    assert_eq!(clock_log, [100_000, 400_000]);
    // 20 ms settle plus 10 ms per slot.
    assert_eq!(delay.total_ns, 70_000_000);

    assert_eq!(tof.online_count(), 3);
    assert!(tof.is_online(TofPosition::FrontLeft));
    assert!(!tof.is_online(TofPosition::FrontRight));
    assert!(tof.is_online(TofPosition::Center));

    {
        let mut b = bench.borrow_mut();
        b.publish(
            TofPosition::FrontLeft,
            RangingResult {
                objects_found: 1,
                range_status: 0,
                range_mm: 120,
            },
        );
        b.publish(
            TofPosition::BackLeft,
            RangingResult {
                objects_found: 0,
                range_status: 0,
                range_mm: 0,
            },
        );
        b.publish(
            TofPosition::Center,
            RangingResult {
                objects_found: 2,
                range_status: 4,
                range_mm: 45,
            },
        );
    }
    assert_eq!(tof.update(), 3);

    let readings = tof.readings();
    assert_eq!(
        readings[TofPosition::FrontLeft],
        TofReading {
            distance_mm: 120,
            valid: true
        }
    );
    assert_eq!(
        readings[TofPosition::BackLeft],
        TofReading {
            distance_mm: NO_TARGET_MM,
            valid: false
        }
    );
    assert_eq!(
        readings[TofPosition::Center],
        TofReading {
            distance_mm: 45,
            valid: false
        }
    );
    for position in [TofPosition::FrontRight, TofPosition::BackRight] {
        assert_eq!(readings[position].distance_mm, OFFLINE_MM);
        assert!(!readings[position].valid);
    }
    assert_eq!(readings.nearest_valid(), Some((TofPosition::FrontLeft, 120)));

    for _ in 0..10 {
        assert_eq!(tof.update(), 0);
    }
    assert_eq!(tof.readings(), readings);

    let b = bench.borrow();
    for position in [TofPosition::FrontRight, TofPosition::BackRight] {
        let slot = &b.slots[position.index()];
        assert!(!slot.connected);
        assert_eq!(slot.polls, 0);
    }
    for position in [TofPosition::FrontLeft, TofPosition::BackLeft, TofPosition::Center] {
        let slot = &b.slots[position.index()];
        assert!(slot.started);
        assert_eq!(slot.rearms, 1);
        assert_eq!(slot.polls, 11);
    }
    drop(b);

    i2c_bus.borrow_mut().done();
    for pin in pin_handles.iter_mut() {
        pin.done();
    }
}

#[test]
fn test_no_sensors_and_begin_once() {
    let wired = [false; TOF_COUNT];
    let i2c_bus = RefCell::new(I2cMock::new(&boot_bus(wired)));
    let pins = xshut_pins(wired);
    let mut pin_handles = pins.clone();
    let bench = Bench::new();

    let mut tof = TofArray::new(&i2c_bus, pins, TofTiming::default());
    let mut delay = TallyDelay::default();
    let mut clock = |_hz: u32| {};
    assert!(!tof.begin(connect_fake(&bench), &mut clock, &mut delay));
    assert_eq!(tof.online_count(), 0);

    // Second call reports the first outcome without touching bus or pins.
    assert!(!tof.begin(connect_fake(&bench), &mut clock, &mut delay));

    assert_eq!(tof.update(), 0);
    assert!(tof.readings().iter().all(|(_, r)| r.is_offline() && !r.valid));

    i2c_bus.borrow_mut().done();
    for pin in pin_handles.iter_mut() {
        pin.done();
    }
}

#[test]
fn test_init_failure_takes_slot_offline() {
    // Front-left acknowledges but its firmware refuses to boot.
    let mut expectations = vec![ack(true)];
    expectations.extend(TofPosition::ALL.iter().skip(1).map(|_| ack(false)));
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let pins = xshut_pins([false; TOF_COUNT]);
    let mut pin_handles = pins.clone();
    let bench = Bench::new();
    bench.borrow_mut().slots[TofPosition::FrontLeft.index()].fail_init = true;

    let mut tof = TofArray::new(&i2c_bus, pins, TofTiming::default());
    let mut delay = TallyDelay::default();
    assert!(!tof.begin(
        connect_fake(&bench),
        &mut climber_core::utils::controllers::tof::FixedClock,
        &mut delay
    ));

    assert!(!tof.is_online(TofPosition::FrontLeft));
    for _ in 0..10 {
        assert_eq!(tof.update(), 0);
    }
    assert_eq!(bench.borrow().slots[TofPosition::FrontLeft.index()].polls, 0);
    assert!(bench.borrow().slots[TofPosition::FrontLeft.index()].connected);
    assert!(!bench.borrow().slots[TofPosition::FrontLeft.index()].started);
    assert_eq!(tof.readings()[TofPosition::FrontLeft], TofReading::OFFLINE);

    i2c_bus.borrow_mut().done();
    for pin in pin_handles.iter_mut() {
        pin.done();
    }
}

#[test]
fn test_readdress_and_start_failures_take_slots_offline() {
    // Front-left loses the address change on the bus, front-right refuses to range.
    let mut expectations = vec![
        ack(true),
        readdress(TofPosition::FrontLeft).with_error(ErrorKind::Bus),
        ack(true),
        readdress(TofPosition::FrontRight),
    ];
    expectations.extend(TofPosition::ALL.iter().skip(2).map(|_| ack(false)));
    let i2c_bus = RefCell::new(I2cMock::new(&expectations));
    let pins = xshut_pins([false; TOF_COUNT]);
    let mut pin_handles = pins.clone();
    let bench = Bench::new();
    bench.borrow_mut().slots[TofPosition::FrontRight.index()].fail_start = true;

    let mut tof = TofArray::new(&i2c_bus, pins, TofTiming::default());
    let mut delay = TallyDelay::default();
    let mut clock = |_hz: u32| {};
    assert!(!tof.begin(connect_fake(&bench), &mut clock, &mut delay));
    assert_eq!(tof.online_count(), 0);

    for position in [TofPosition::FrontLeft, TofPosition::FrontRight] {
        bench.borrow_mut().publish(
            position,
            RangingResult {
                objects_found: 1,
                range_status: 0,
                range_mm: 77,
            },
        );
    }
    for _ in 0..10 {
        assert_eq!(tof.update(), 0);
    }

    let b = bench.borrow();
    for position in [TofPosition::FrontLeft, TofPosition::FrontRight] {
        let slot = &b.slots[position.index()];
        assert!(slot.connected);
        assert!(!slot.started);
        assert_eq!(slot.polls, 0);
        assert_eq!(tof.readings()[position], TofReading::OFFLINE);
    }
    drop(b);

    i2c_bus.borrow_mut().done();
    for pin in pin_handles.iter_mut() {
        pin.done();
    }
}

#[test]
fn test_read_error_keeps_last_distance() {
    let wired = [false, false, false, false, true];
    let i2c_bus = RefCell::new(I2cMock::new(&boot_bus(wired)));
    let pins = xshut_pins(wired);
    let mut pin_handles = pins.clone();
    let bench = Bench::new();

    let mut tof = TofArray::new(&i2c_bus, pins, TofTiming::default());
    let mut delay = TallyDelay::default();
    let mut clock = |_hz: u32| {};
    assert!(tof.begin(connect_fake(&bench), &mut clock, &mut delay));

    // Online but nothing measured yet.
    assert_eq!(tof.update(), 0);
    assert_eq!(tof.readings()[TofPosition::Center], TofReading::OFFLINE);

    bench.borrow_mut().publish(
        TofPosition::Center,
        RangingResult {
            objects_found: 1,
            range_status: 0,
            range_mm: 300,
        },
    );
    assert_eq!(tof.update(), 1);

    {
        let mut b = bench.borrow_mut();
        b.slots[TofPosition::Center.index()].fail_read = true;
        b.slots[TofPosition::Center.index()].ready = true;
    }
    assert_eq!(tof.update(), 0);
    assert_eq!(
        tof.readings()[TofPosition::Center],
        TofReading {
            distance_mm: 300,
            valid: true
        }
    );
    // The sensor is re-armed even when the result could not be read.
    assert_eq!(bench.borrow().slots[TofPosition::Center.index()].rearms, 2);

    i2c_bus.borrow_mut().done();
    for pin in pin_handles.iter_mut() {
        pin.done();
    }
}

#[test]
fn test_sensor_command_json() {
    let cmd: SensorCommand = serde_json::from_str(r#"{"sc":"calibrate","target":"black"}"#).unwrap();
    assert_eq!(
        cmd,
        SensorCommand::Calibrate {
            target: CalibrationTarget::Black
        }
    );

    let cmd: SensorCommand = serde_json::from_str(r#"{"sc":"led_current","level":2}"#).unwrap();
    assert_eq!(cmd, SensorCommand::LedCurrent { level: 2 });

    let cmd: SensorCommand = serde_json::from_str(r#"{"sc":"export"}"#).unwrap();
    assert_eq!(cmd, SensorCommand::Export);

    assert!(serde_json::from_str::<SensorCommand>(r#"{"sc":"calibrate","target":"green"}"#).is_err());
}

/// Spectral sensor that always has the same reading ready.
struct FlatSensor {
    reading: [f32; 6],
    illumination: bool,
}

impl SpectralSensor for FlatSensor {
    type Error = ();

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn start_measurement(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn read_calibrated(&mut self) -> Result<[f32; 6], Self::Error> {
        Ok(self.reading)
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
        _current: LedCurrent,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn die_temperature(&mut self) -> Result<f32, Self::Error> {
        Ok(25.0)
    }
}

#[test]
fn test_hub_commands_and_snapshot() {
    let i2c_bus = RefCell::new(I2cMock::new(&[]));
    let pins: [PinMock; TOF_COUNT] = core::array::from_fn(|_| PinMock::new(&[]));
    let mut pin_handles = pins.clone();

    let sensor = FlatSensor {
        reading: [200.0; 6],
        illumination: false,
    };
    let mut color = ColorManager::new(sensor, MemoryStore::new(), ClassifierConfig::default());
    color.begin().unwrap();
    let tof: TofArray<'_, I2cMock, PinMock, FakeRanger<'_>> =
        TofArray::new(&i2c_bus, pins, TofTiming::default());
    let mut hub = SensorHub::new(color, tof);

    // Nothing measured yet: a capture would store a dark reference.
    assert!(matches!(
        hub.execute(SensorCommand::Calibrate {
            target: CalibrationTarget::White
        }),
        Err(HubError::Calibration(CalibrationError::NoSignal))
    ));

    for _ in 0..20 {
        assert!(hub.update());
    }

    let snap = hub.snapshot();
    assert_eq!(snap.color, ColorClass::White);
    assert!((snap.sample.sum() - 1200.0).abs() < 1.0);
    assert!(snap.tof.iter().all(|(_, r)| r.is_offline()));

    match hub.execute(SensorCommand::Export).unwrap() {
        CommandOutcome::Exported(text) => {
            assert!(text.contains("pub const CALIB_WHITE_SUM: f32 = 1000.00;"));
            assert!(text.contains("CALIB_BLUE_CH"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    SENSOR_CHANNEL
        .try_send(SensorCommand::Calibrate {
            target: CalibrationTarget::White,
        })
        .unwrap();
    SENSOR_CHANNEL
        .try_send(SensorCommand::Illumination { on: false })
        .unwrap();
    assert_eq!(hub.poll_commands(), 2);
    assert_eq!(hub.poll_commands(), 0);

    assert!((hub.color.references().white.sum() - snap.sample.sum()).abs() < 1e-3);

    let (sensor, store) = hub.color.release();
    assert!(!sensor.illumination);
    assert!(!store.is_empty());

    i2c_bus.borrow_mut().done();
    for pin in pin_handles.iter_mut() {
        pin.done();
    }
}
