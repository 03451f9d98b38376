//! Spectral sample math for the 6-channel color sensor.
//!
//! A `SpectralSample` holds the violet, blue, green, yellow, orange and red
//! intensities plus their sum. The sum is never set on its own: every
//! constructor and the EMA update recompute it from the channels, so the
//! "total light" signal always matches the per-channel state.
//!
//! # Example
//! ```rust
//! use climber_core::utils::math::spectral::{spectral_distance, SpectralSample};
//! let a = SpectralSample::from_channels([10.0, 20.0, 30.0, 30.0, 20.0, 10.0]);
//! let b = SpectralSample::from_channels([20.0, 40.0, 60.0, 60.0, 40.0, 20.0]);
//! // Same shape, different brightness.
//! assert!(spectral_distance(&a, &b) < 1e-6);
//! ```

use smart_leds_trait::RGB8;

/// Number of spectral channels on the sensor.
pub const CHANNEL_COUNT: usize = 6;

/// Distance reported when either sample carries no light at all.
pub const DISTANCE_SENTINEL: f32 = 9999.0;

/// Color temperature assigned to a perfectly balanced red/blue ratio (K).
const NEUTRAL_KELVIN: f32 = 6500.0;
const MIN_KELVIN: f32 = 1000.0;
const MAX_KELVIN: f32 = 40000.0;

/// Spectral channels in wavelength order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Violet = 0,
    Blue,
    Green,
    Yellow,
    Orange,
    Red,
}

impl Channel {
    /// All channels in wavelength order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Violet,
        Channel::Blue,
        Channel::Green,
        Channel::Yellow,
        Channel::Orange,
        Channel::Red,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Violet => "violet",
            Channel::Blue => "blue",
            Channel::Green => "green",
            Channel::Yellow => "yellow",
            Channel::Orange => "orange",
            Channel::Red => "red",
        }
    }
}

/// Six channel intensities plus their sum.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct SpectralSample {
    channels: [f32; CHANNEL_COUNT],
    sum: f32,
}

impl SpectralSample {
    /// A sample with no light on any channel.
    pub const ZERO: Self = Self {
        channels: [0.0; CHANNEL_COUNT],
        sum: 0.0,
    };

    /// Build a sample from channel values. Negative readings are clamped to zero.
    pub fn from_channels(channels: [f32; CHANNEL_COUNT]) -> Self {
        let mut clamped = [0.0; CHANNEL_COUNT];
        for (dst, &src) in clamped.iter_mut().zip(channels.iter()) {
            // NaN falls through to zero as well.
            *dst = if src > 0.0 { src } else { 0.0 };
        }
        Self::from_static(clamped)
    }

    /// Build a sample from constant channel values without clamping.
    ///
    /// Intended for profiles pasted from an exported calibration; the values
    /// must already be nonnegative.
    pub const fn from_static(channels: [f32; CHANNEL_COUNT]) -> Self {
        Self {
            channels,
            sum: channel_sum(&channels),
        }
    }

    /// A flat spectrum carrying `total` spread evenly over all channels.
    pub const fn flat(total: f32) -> Self {
        Self::from_static([total / CHANNEL_COUNT as f32; CHANNEL_COUNT])
    }

    pub const fn channels(&self) -> &[f32; CHANNEL_COUNT] {
        &self.channels
    }

    pub const fn channel(&self, channel: Channel) -> f32 {
        self.channels[channel.index()]
    }

    pub const fn sum(&self) -> f32 {
        self.sum
    }

    /// Per-channel proportions of the total, or `None` for a dark sample.
    pub fn shape(&self) -> Option<[f32; CHANNEL_COUNT]> {
        if self.sum <= 0.0 {
            return None;
        }
        let mut out = [0.0; CHANNEL_COUNT];
        for (dst, &ch) in out.iter_mut().zip(self.channels.iter()) {
            *dst = ch / self.sum;
        }
        Some(out)
    }
}

const fn channel_sum(channels: &[f32; CHANNEL_COUNT]) -> f32 {
    let mut sum = 0.0;
    let mut i = 0;
    while i < CHANNEL_COUNT {
        sum += channels[i];
        i += 1;
    }
    sum
}

/// Exponential moving average over all six channels.
///
/// `filtered = raw * alpha + filtered * (1 - alpha)`, starting from a dark state.
#[derive(Clone, Copy, Debug)]
pub struct EmaFilter {
    alpha: f32,
    state: SpectralSample,
}

impl EmaFilter {
    /// Create a filter with the given smoothing factor, clamped to `(0, 1]`.
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_nan() {
            1.0
        } else {
            alpha.clamp(f32::EPSILON, 1.0)
        };
        Self {
            alpha,
            state: SpectralSample::ZERO,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Fold one raw reading into the filter and return the new state.
    pub fn apply(&mut self, raw: &[f32; CHANNEL_COUNT]) -> &SpectralSample {
        let mut next = [0.0; CHANNEL_COUNT];
        for ((dst, &prev), &input) in next
            .iter_mut()
            .zip(self.state.channels.iter())
            .zip(raw.iter())
        {
            let input = if input > 0.0 { input } else { 0.0 };
            *dst = input * self.alpha + prev * (1.0 - self.alpha);
        }
        self.state = SpectralSample::from_static(next);
        &self.state
    }

    pub fn state(&self) -> &SpectralSample {
        &self.state
    }
}

/// Squared error between the normalized shapes of two samples.
///
/// Intensity independent: only the proportions of each channel matter. Returns
/// [`DISTANCE_SENTINEL`] if either sample is dark.
pub fn spectral_distance(
    a: &SpectralSample,
    b: &SpectralSample,
) -> f32 {
    match (a.shape(), b.shape()) {
        (Some(sa), Some(sb)) => sa
            .iter()
            .zip(sb.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum(),
        _ => DISTANCE_SENTINEL,
    }
}

/// Approximate correlated color temperature from the red/blue balance (K).
///
/// Monotonic: the more red dominates blue, the lower the result. Only used for
/// diagnostics, never for classification.
pub fn color_temperature(sample: &SpectralSample) -> f32 {
    let red = sample.channel(Channel::Red);
    let blue = sample.channel(Channel::Blue);
    if red <= 0.0 {
        return if blue > 0.0 { MAX_KELVIN } else { NEUTRAL_KELVIN };
    }
    let kelvin = NEUTRAL_KELVIN * libm::sqrtf(blue / red);
    kelvin.clamp(MIN_KELVIN, MAX_KELVIN)
}

/// Coarse human-visible RGB from the six channels.
///
/// The mix is auto-gained so the brightest component maps to 255. Below
/// `min_brightness` the result is black to keep noise from painting colors in
/// the dark.
pub fn visual_rgb(
    sample: &SpectralSample,
    min_brightness: f32,
) -> RGB8 {
    let [v, b, g, y, o, r] = *sample.channels();

    let r_mix = r * 1.0 + o * 0.7 + y * 0.4 + v * 0.3;
    let g_mix = g * 1.0 + y * 0.8 + b * 0.3;
    let b_mix = b * 1.0 + v * 0.8 + g * 0.2;

    let max = r_mix.max(g_mix).max(b_mix);
    if max <= min_brightness {
        return RGB8 { r: 0, g: 0, b: 0 };
    }

    let scale = |x: f32| ((x / max) * 255.0).clamp(0.0, 255.0) as u8;
    RGB8 {
        r: scale(r_mix),
        g: scale(g_mix),
        b: scale(b_mix),
    }
}
