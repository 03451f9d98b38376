mod sim;
mod store;

use core::cell::RefCell;
use std::{convert::Infallible, path::PathBuf};

use clap::Parser;
use climber_core::utils::controllers::{
    tof::TOF_COUNT, CalibrationTarget, ColorIndicator, SensorCommand, SENSOR_CHANNEL,
};
use climber_core::utils::math::spectral::Channel;
use climber_core::utils::{ClassifierConfig, ColorManager, SensorHub, TofArray, TofTiming};
use embassy_time::{Delay, Duration, Instant};
use serde::Deserialize;
use smart_leds_trait::{SmartLedsWrite, RGB8};
use tracing::{debug, error, info, warn};

use sim::{Rig, SimBus, SimRanger, SimSpectral, SimXshut, SIM_REFERENCES};
use store::JsonFileStore;

const PRINT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// ToF slots with a sensor attached, 0 (front left) to 4 (center)
    #[clap(long, value_delimiter = ',', default_value = "0,2,4")]
    wired: Vec<usize>,
    /// JSON file with `classifier` and `tof` overrides
    #[clap(long)]
    config: Option<PathBuf>,
    /// Calibration store
    #[clap(long, default_value = "color_calib.json")]
    calibration: PathBuf,
    /// Stop after this many seconds instead of running forever
    #[clap(long)]
    seconds: Option<u64>,
}

#[derive(Default, Deserialize)]
struct HostConfig {
    #[serde(default)]
    classifier: ClassifierConfig,
    #[serde(default)]
    tof: TofTiming,
}

/// LED driver that logs to console
struct SerialLedDriver;

impl SmartLedsWrite for SerialLedDriver {
    type Color = RGB8;
    type Error = Infallible;

    fn write<T, I>(
        &mut self,
        iterator: T,
    ) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        for c in iterator {
            debug!("LED: {:?}", c.into());
        }
        Ok(())
    }
}

/// Single letters from the calibration workflow, or a JSON `SensorCommand`.
fn parse_command(line: &str) -> Result<SensorCommand, serde_json::Error> {
    let calibrate = |target| Ok(SensorCommand::Calibrate { target });
    match line {
        "w" => calibrate(CalibrationTarget::White),
        "n" => calibrate(CalibrationTarget::Black),
        "r" => calibrate(CalibrationTarget::Red),
        "b" => calibrate(CalibrationTarget::Blue),
        "e" => Ok(SensorCommand::Export),
        json => serde_json::from_str(json),
    }
}

fn spawn_console() {
    std::thread::spawn(|| {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_command(line) {
                Ok(cmd) => {
                    if SENSOR_CHANNEL.try_send(cmd).is_err() {
                        warn!("command queue full, dropped {:?}", cmd);
                    }
                }
                Err(e) => warn!("invalid command {:?}: {}", line, e),
            }
        }
    });
}

fn load_config(path: Option<&std::path::Path>) -> HostConfig {
    let Some(path) = path else {
        return HostConfig::default();
    };
    match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(config) => config,
        Err(e) => {
            warn!("config {} unusable, using defaults: {}", path.display(), e);
            HostConfig::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let config = load_config(opts.config.as_deref());

    let mut wired = [false; TOF_COUNT];
    for &slot in &opts.wired {
        match wired.get_mut(slot) {
            Some(w) => *w = true,
            None => warn!("ignoring ToF slot {}, valid slots are 0..{}", slot, TOF_COUNT),
        }
    }

    // Ranging array on the simulated bus
    let rig = Rig::shared(wired);
    let i2c_bus = RefCell::new(SimBus::new(rig.clone()));
    let pins = core::array::from_fn(|slot| SimXshut::new(rig.clone(), slot));
    let mut tof = TofArray::new(&i2c_bus, pins, config.tof);

    let mut clock = |hz: u32| {
        info!(hz, "I2C clock set");
        rig.borrow_mut().clock_hz = hz;
    };
    if !tof.begin(SimRanger::new, &mut clock, &mut Delay) {
        warn!("no ToF sensor online, running on color only");
    }

    // Color classifier with file-backed calibration
    let store = match JsonFileStore::open(&opts.calibration) {
        Ok(store) => store,
        Err(e) => {
            error!("calibration store {} unusable: {:?}", opts.calibration.display(), e);
            return;
        }
    };
    let uncalibrated = store.is_empty();
    let mut color = ColorManager::new(SimSpectral::new(), store, config.classifier);
    if let Err(e) = color.begin() {
        error!("color sensor init failed: {:?}", e);
        return;
    }
    if uncalibrated {
        info!("no stored calibration, using references for the simulated track");
        color.set_references(SIM_REFERENCES);
    }
    match color.sensor_die_temperature() {
        Ok(t) => info!(celsius = t, "color sensor die temperature"),
        Err(e) => warn!("die temperature unavailable: {:?}", e),
    }

    info!(config = ?color.config(), "classifier config");

    let mut hub = SensorHub::new(color, tof);
    let mut indicator = ColorIndicator::new(SerialLedDriver);

    spawn_console();
    info!("commands: w/n/r/b calibrate white/black/red/blue, e exports, or JSON with tag \"sc\"");

    let started = Instant::now();
    let mut last_print = started;
    loop {
        hub.update();
        hub.poll_commands();

        let snap = hub.snapshot();
        let _ = indicator.show(snap.color, snap.visual, Instant::now());

        if last_print.elapsed() >= PRINT_INTERVAL {
            last_print = Instant::now();
            let distances: Vec<String> = snap
                .tof
                .iter()
                .map(|(position, r)| {
                    let flag = if r.valid { "" } else { "?" };
                    format!("{}={}{}", position.name(), r.distance_mm, flag)
                })
                .collect();
            let channels: Vec<String> = Channel::ALL
                .iter()
                .map(|&ch| format!("{}={:.1}", ch.name(), snap.sample.channel(ch)))
                .collect();
            debug!("spectrum | {}", channels.join(" "));
            info!(
                color = snap.color.name(),
                sum = snap.sample.sum(),
                rgb = ?snap.visual,
                kelvin = hub.color.color_temperature(),
                "floor | {}",
                distances.join(" ")
            );
        }

        if opts
            .seconds
            .is_some_and(|limit| started.elapsed() >= Duration::from_secs(limit))
        {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    hub.tof.shutdown();
    info!(clock_hz = rig.borrow().clock_hz, "simulation finished");
}
