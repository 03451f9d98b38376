//! Color reference profiles and their persisted key/value schema.
//!
//! Each calibration target is stored under the `color_calib` namespace as seven
//! floats: `<color>_sum` and `<color>_ch_0` .. `<color>_ch_5`. The backend is
//! anything implementing [`CalibrationStore`]; [`MemoryStore`] keeps everything
//! in a fixed-capacity map.

use core::fmt::Write;

use heapless::{FnvIndexMap, String};
use serde::{Deserialize, Serialize};

use crate::utils::math::spectral::{SpectralSample, CHANNEL_COUNT};

/// Namespace holding every color reference.
pub const NAMESPACE: &str = "color_calib";

/// Stored sums further than this from the channel total are ignored.
const SUM_DRIFT_TOLERANCE: f32 = 0.5;

/// Baseline intensity of the white/red/blue defaults.
const DEFAULT_REFERENCE_SUM: f32 = 1000.0;
/// Per-channel value of the default black profile.
const DEFAULT_BLACK_CHANNEL: f32 = 5.0;

type Key = String<24>;

/// Surfaces the classifier can be calibrated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTarget {
    White,
    Red,
    Blue,
    Black,
}

impl CalibrationTarget {
    /// Export order.
    pub const ALL: [CalibrationTarget; 4] = [
        CalibrationTarget::White,
        CalibrationTarget::Black,
        CalibrationTarget::Red,
        CalibrationTarget::Blue,
    ];

    /// Prefix of the persisted keys.
    pub const fn name(self) -> &'static str {
        match self {
            CalibrationTarget::White => "white",
            CalibrationTarget::Red => "red",
            CalibrationTarget::Blue => "blue",
            CalibrationTarget::Black => "black",
        }
    }

    const fn const_name(self) -> &'static str {
        match self {
            CalibrationTarget::White => "WHITE",
            CalibrationTarget::Red => "RED",
            CalibrationTarget::Blue => "BLUE",
            CalibrationTarget::Black => "BLACK",
        }
    }

    /// Profile used until the target has been calibrated at least once.
    pub const fn default_profile(self) -> SpectralSample {
        match self {
            CalibrationTarget::Black => SpectralSample::from_static([DEFAULT_BLACK_CHANNEL; CHANNEL_COUNT]),
            _ => SpectralSample::flat(DEFAULT_REFERENCE_SUM),
        }
    }
}

/// Key/value persistence backend for calibration floats.
///
/// Implementations decide how and where values live (flash preferences, a
/// JSON file, memory). Writes are last-write-wins.
pub trait CalibrationStore {
    type Error: core::fmt::Debug;

    /// Read one value, `None` if it was never written.
    fn load(
        &mut self,
        namespace: &str,
        key: &str,
    ) -> Option<f32>;

    /// Persist one value, replacing any previous one.
    fn store(
        &mut self,
        namespace: &str,
        key: &str,
        value: f32,
    ) -> Result<(), Self::Error>;
}

/// Reasons a calibration capture was not taken.
#[derive(Debug)]
pub enum CalibrationError<E: core::fmt::Debug> {
    /// No sample consumed yet, or the filtered sample is dark.
    NoSignal,
    /// The backend rejected a write; earlier keys of the profile may be written.
    Storage(E),
}

/// Reference spectra for every calibration target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReferenceProfiles {
    pub white: SpectralSample,
    pub red: SpectralSample,
    pub blue: SpectralSample,
    pub black: SpectralSample,
}

impl Default for ReferenceProfiles {
    fn default() -> Self {
        Self {
            white: CalibrationTarget::White.default_profile(),
            red: CalibrationTarget::Red.default_profile(),
            blue: CalibrationTarget::Blue.default_profile(),
            black: CalibrationTarget::Black.default_profile(),
        }
    }
}

impl ReferenceProfiles {
    /// Build profiles from constants produced by [`ReferenceProfiles::export`].
    pub const fn from_static(
        white: [f32; CHANNEL_COUNT],
        red: [f32; CHANNEL_COUNT],
        blue: [f32; CHANNEL_COUNT],
        black: [f32; CHANNEL_COUNT],
    ) -> Self {
        Self {
            white: SpectralSample::from_static(white),
            red: SpectralSample::from_static(red),
            blue: SpectralSample::from_static(blue),
            black: SpectralSample::from_static(black),
        }
    }

    pub fn get(
        &self,
        target: CalibrationTarget,
    ) -> &SpectralSample {
        match target {
            CalibrationTarget::White => &self.white,
            CalibrationTarget::Red => &self.red,
            CalibrationTarget::Blue => &self.blue,
            CalibrationTarget::Black => &self.black,
        }
    }

    pub fn set(
        &mut self,
        target: CalibrationTarget,
        sample: SpectralSample,
    ) {
        match target {
            CalibrationTarget::White => self.white = sample,
            CalibrationTarget::Red => self.red = sample,
            CalibrationTarget::Blue => self.blue = sample,
            CalibrationTarget::Black => self.black = sample,
        }
    }

    /// Load every profile, falling back to the defaults for missing fields.
    pub fn load<St: CalibrationStore>(store: &mut St) -> Self {
        let mut profiles = Self::default();
        for target in CalibrationTarget::ALL {
            profiles.set(target, load_profile(store, target));
        }
        profiles
    }

    /// Persist one profile under its color name.
    pub fn save<St: CalibrationStore>(
        &self,
        store: &mut St,
        target: CalibrationTarget,
    ) -> Result<(), St::Error> {
        let profile = self.get(target);
        store.store(NAMESPACE, &sum_key(target), profile.sum())?;
        for (i, &value) in profile.channels().iter().enumerate() {
            store.store(NAMESPACE, &channel_key(target, i), value)?;
        }
        tracing::info!(color = target.name(), sum = profile.sum(), "calibration saved");
        Ok(())
    }

    /// Write every profile as Rust constants, ready to paste into static config.
    pub fn export<W: Write>(
        &self,
        out: &mut W,
    ) -> core::fmt::Result {
        for target in CalibrationTarget::ALL {
            let profile = self.get(target);
            let name = target.const_name();
            writeln!(out, "pub const CALIB_{}_SUM: f32 = {:.2};", name, profile.sum())?;
            write!(out, "pub const CALIB_{}_CH: [f32; {}] = [", name, CHANNEL_COUNT)?;
            for (i, value) in profile.channels().iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write!(out, "{:.2}", value)?;
            }
            out.write_str("];\n\n")?;
        }
        Ok(())
    }
}

fn load_profile<St: CalibrationStore>(
    store: &mut St,
    target: CalibrationTarget,
) -> SpectralSample {
    let fallback = target.default_profile();

    let mut channels = [0.0; CHANNEL_COUNT];
    for (i, dst) in channels.iter_mut().enumerate() {
        *dst = store
            .load(NAMESPACE, &channel_key(target, i))
            .unwrap_or(fallback.channels()[i]);
    }
    let profile = SpectralSample::from_channels(channels);

    if profile.sum() <= 0.0 {
        tracing::warn!(color = target.name(), "stored profile is dark, using default");
        return fallback;
    }

    if let Some(stored_sum) = store.load(NAMESPACE, &sum_key(target)) {
        if libm::fabsf(stored_sum - profile.sum()) > SUM_DRIFT_TOLERANCE {
            tracing::warn!(
                color = target.name(),
                stored_sum,
                channel_sum = profile.sum(),
                "stored sum disagrees with channels, using channel total"
            );
        }
    }
    profile
}

fn sum_key(target: CalibrationTarget) -> Key {
    let mut key = Key::new();
    // Longest key is "black_sum"; cannot overflow.
    let _ = write!(key, "{}_sum", target.name());
    key
}

fn channel_key(
    target: CalibrationTarget,
    channel: usize,
) -> Key {
    let mut key = Key::new();
    let _ = write!(key, "{}_ch_{}", target.name(), channel);
    key
}

/// Errors reported by [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStoreError {
    /// Namespace and key do not fit the fixed key buffer.
    KeyTooLong,
    /// Every slot of the map is taken.
    Full,
}

/// Fixed-capacity in-memory calibration store.
///
/// Holds the full schema (4 profiles x 7 fields) with room to spare.
#[derive(Default)]
pub struct MemoryStore {
    entries: FnvIndexMap<String<40>, f32, 32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn full_key(
        namespace: &str,
        key: &str,
    ) -> Result<String<40>, MemoryStoreError> {
        let mut full = String::new();
        write!(full, "{}/{}", namespace, key).map_err(|_| MemoryStoreError::KeyTooLong)?;
        Ok(full)
    }
}

impl CalibrationStore for MemoryStore {
    type Error = MemoryStoreError;

    fn load(
        &mut self,
        namespace: &str,
        key: &str,
    ) -> Option<f32> {
        let full = Self::full_key(namespace, key).ok()?;
        self.entries.get(&full).copied()
    }

    fn store(
        &mut self,
        namespace: &str,
        key: &str,
        value: f32,
    ) -> Result<(), Self::Error> {
        let full = Self::full_key(namespace, key)?;
        self.entries
            .insert(full, value)
            .map(|_| ())
            .map_err(|_| MemoryStoreError::Full)
    }
}
