//! Floor-color status LED.
//!
//! Mirrors the classifier output on an addressable LED via `SmartLedsWrite`.

use embassy_time::Instant;
use smart_leds_trait::{SmartLedsWrite, RGB8};

use super::color::ColorClass;

/// Number of LEDs in the attached chain.
const LED_COUNT: usize = 1;

/// Default output brightness out of 255.
pub const DEFAULT_BRIGHTNESS: u8 = 20;

/// Half period of the silver blink.
const BLINK_HALF_PERIOD_MS: u64 = 100;

const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };
const WHITE: RGB8 = RGB8 {
    r: 255,
    g: 255,
    b: 255,
};

/// Unscaled LED color for a classification at time `now_ms`.
///
/// Silver blinks white, black turns the LED off, and anything the classifier
/// could not name falls back to the measured `visual` color.
pub fn indicator_color(
    color: ColorClass,
    visual: RGB8,
    now_ms: u64,
) -> RGB8 {
    match color {
        ColorClass::Black => OFF,
        ColorClass::Silver => {
            if (now_ms / BLINK_HALF_PERIOD_MS) % 2 == 0 {
                WHITE
            } else {
                OFF
            }
        }
        ColorClass::White => WHITE,
        ColorClass::Red => RGB8 { r: 255, g: 0, b: 0 },
        ColorClass::Blue => RGB8 { r: 0, g: 0, b: 255 },
        ColorClass::Unknown => visual,
    }
}

fn scale(
    color: RGB8,
    brightness: u8,
) -> RGB8 {
    let s = |c: u8| ((c as u16 * brightness as u16) / 255) as u8;
    RGB8 {
        r: s(color.r),
        g: s(color.g),
        b: s(color.b),
    }
}

/// Status LED driven from the classifier.
pub struct ColorIndicator<Driver> {
    driver: Driver,
    brightness: u8,
    enabled: bool,
    last: Option<RGB8>,
}

impl<Driver, E> ColorIndicator<Driver>
where
    Driver: SmartLedsWrite<Color = RGB8, Error = E>,
{
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            brightness: DEFAULT_BRIGHTNESS,
            enabled: true,
            last: None,
        }
    }

    pub fn set_brightness(
        &mut self,
        brightness: u8,
    ) {
        self.brightness = brightness;
        self.last = None;
    }

    /// Turn the indicator off or back on. Disabling blanks the LED immediately.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<(), E> {
        self.enabled = enabled;
        self.last = None;
        if !enabled {
            self.set_all(OFF)?;
        }
        Ok(())
    }

    /// Show `color` on the LED. The strip is only written when the output changes.
    pub fn show(
        &mut self,
        color: ColorClass,
        visual: RGB8,
        now: Instant,
    ) -> Result<(), E> {
        if !self.enabled {
            return Ok(());
        }
        let out = scale(indicator_color(color, visual, now.as_millis()), self.brightness);
        if self.last == Some(out) {
            return Ok(());
        }
        self.set_all(out)?;
        self.last = Some(out);
        Ok(())
    }

    fn set_all(
        &mut self,
        color: RGB8,
    ) -> Result<(), E> {
        let data = core::iter::repeat(color).take(LED_COUNT);
        self.driver.write(data)
    }
}
