//! Light-belt scenario rendering.
//!
//! The belt is a strip of lamps (19 on the mower). A scenario request
//! describes the machine state (charging, running, fault, ...) and the
//! renderer turns it into one config entry per lamp: colour, blink
//! interval, start delay and on-duration.
//!
//! Values in `0..=100` (battery, power) are mapped onto a lamp index with
//! the first lamp carrying a slightly heavier weight than the others, so
//! that a full value lights the whole strip.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::ClaimsContext;
use crate::routing::{HandlerResponse, Payload};

/// Number of lamps on the stock belt.
pub const DEFAULT_LAMP_COUNT: usize = 19;

const BREATHING_STEPS: usize = 10;
const MIN_BREATHING_LIGHTNESS: f64 = 0.1;

/// Errors from scenario rendering; all map to 400.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BeltError {
    #[error("missing required parameter: color")]
    MissingColor,

    #[error("missing required parameter: {0}")]
    MissingValue(&'static str),

    #[error("invalid colour '{0}', expected rgb(r, g, b)")]
    InvalidColor(String),

    #[error("gradient ratio {0} must be greater than 0 and at most 1")]
    InvalidRatio(f64),
}

/// An RGB colour written as `rgb(r, g, b)` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const OFF: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const YELLOW: Rgb = Rgb(255, 255, 0);
    pub const PURPLE: Rgb = Rgb(128, 0, 128);
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.0, self.1, self.2)
    }
}

impl FromStr for Rgb {
    type Err = BeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BeltError::InvalidColor(s.to_string());
        let inner = s
            .trim()
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;

        let channels = inner
            .split(',')
            .map(|part| part.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match channels.as_slice() {
            [r, g, b] => Ok(Rgb(channel(*r), channel(*g), channel(*b))),
            _ => Err(invalid()),
        }
    }
}

fn channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// Machine state the belt should display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Lamps proportional to battery, last one blinking.
    Charging,
    /// Gradient proportional to power draw.
    InOperation,
    /// Whole strip breathing in the given colour.
    Fault,
    /// Marquee gradient proportional to battery (remote connected).
    InRunning,
    /// Whole strip blinking (remote lost).
    DisconnectRemote,
}

/// Numeric inputs of a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScenarioSettings {
    pub battery: f64,
    pub power: f64,
    pub delay: u64,
    pub interval: u64,
    pub duration: u64,
    /// Share of the strip used by the first half of the gradient.
    pub ratio: f64,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            battery: 0.0,
            power: 0.0,
            delay: 0,
            interval: 0,
            duration: 0,
            ratio: 0.5,
        }
    }
}

/// Colour input: one colour, or low/middle/high levels for gradients.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Single(String),
    Levels {
        low: Option<String>,
        middle: Option<String>,
        high: Option<String>,
    },
}

/// Resolved colours for a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub single: Rgb,
    pub low: Rgb,
    pub middle: Rgb,
    pub high: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            single: Rgb::WHITE,
            low: Rgb::GREEN,
            middle: Rgb::YELLOW,
            high: Rgb::PURPLE,
        }
    }
}

impl TryFrom<&ColorSpec> for Palette {
    type Error = BeltError;

    fn try_from(spec: &ColorSpec) -> Result<Self, Self::Error> {
        let mut palette = Palette::default();
        match spec {
            ColorSpec::Single(color) => palette.single = color.parse()?,
            ColorSpec::Levels { low, middle, high } => {
                if let Some(c) = low {
                    palette.low = c.parse()?;
                }
                if let Some(c) = middle {
                    palette.middle = c.parse()?;
                }
                if let Some(c) = high {
                    palette.high = c.parse()?;
                }
            }
        }
        Ok(palette)
    }
}

/// Colour of one lamp: fixed, or a sequence cycled by the firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LampColor {
    Solid(String),
    Sequence(Vec<String>),
}

/// Output for one lamp. `interval: None` means steady on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LampConfig {
    pub color: LampColor,
    pub interval: Option<u64>,
    pub delay: u64,
    pub duration: u64,
}

impl LampConfig {
    fn off() -> Self {
        Self {
            color: LampColor::Solid(Rgb::OFF.to_string()),
            interval: None,
            delay: 0,
            duration: 0,
        }
    }
}

/// Renderer for a strip of `lamp_count` lamps.
#[derive(Debug, Clone)]
pub struct LampBelt {
    lamp_count: usize,
    total_weight: f64,
}

impl Default for LampBelt {
    fn default() -> Self {
        Self::new(DEFAULT_LAMP_COUNT)
    }
}

impl LampBelt {
    pub fn new(lamp_count: usize) -> Self {
        Self {
            lamp_count: lamp_count.max(1),
            total_weight: 100.0,
        }
    }

    pub fn lamp_count(&self) -> usize {
        self.lamp_count
    }

    /// 1-based number of lamps lit for `value` in `0..=100`.
    pub fn lamp_for_value(&self, value: f64) -> usize {
        let n = self.lamp_count;
        if n == 1 {
            return 1;
        }
        // Weight per lamp after the first, truncated to one decimal.
        let subsequent = (100.0 / n as f64 * 10.0).floor() / 10.0;
        let first = ((100.0 - subsequent * (n - 1) as f64) * 10.0).round() / 10.0;

        let normalized = value.clamp(0.0, 100.0) / 100.0 * self.total_weight;
        if normalized <= first {
            return 1;
        }
        let index = 2 + ((normalized - first) / subsequent).floor() as usize;
        index.min(n)
    }

    /// Three-colour gradient across the whole strip. The first leg covers
    /// `floor(lamp_count * ratio)` lamps, the second leg the rest.
    pub fn gradient(
        &self,
        first: Rgb,
        second: Rgb,
        third: Rgb,
        ratio: f64,
    ) -> Result<Vec<Rgb>, BeltError> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(BeltError::InvalidRatio(ratio));
        }
        let first_steps = (self.lamp_count as f64 * ratio).floor() as usize;
        let second_steps = self.lamp_count - first_steps;

        let mut colors = interpolate(first, second, first_steps + 1);
        colors.pop(); // `second` opens the next leg
        colors.extend(interpolate(second, third, second_steps));
        Ok(colors)
    }

    /// Render a scenario into exactly `lamp_count` lamp configs.
    pub fn render(
        &self,
        scenario: Scenario,
        settings: &ScenarioSettings,
        palette: &Palette,
    ) -> Result<Vec<LampConfig>, BeltError> {
        let blink = Some(settings.interval);
        let mut lamps = Vec::with_capacity(self.lamp_count);

        match scenario {
            Scenario::Charging => {
                if settings.battery <= 0.0 {
                    return Err(BeltError::MissingValue("battery"));
                }
                let lit = self.lamp_for_value(settings.battery);
                let color = LampColor::Solid(palette.single.to_string());
                for _ in 0..lit - 1 {
                    lamps.push(LampConfig {
                        color: color.clone(),
                        interval: None,
                        delay: 0,
                        duration: settings.duration,
                    });
                }
                lamps.push(LampConfig {
                    color,
                    interval: blink,
                    delay: 0,
                    duration: settings.duration,
                });
            }
            Scenario::InOperation => {
                if settings.power <= 0.0 {
                    return Err(BeltError::MissingValue("power"));
                }
                let gradient =
                    self.gradient(palette.low, palette.middle, palette.high, settings.ratio)?;
                let lit = self.lamp_for_value(settings.power);
                lamps.extend(gradient.iter().take(lit).map(|c| LampConfig {
                    color: LampColor::Solid(c.to_string()),
                    interval: blink,
                    delay: 0,
                    duration: settings.duration,
                }));
            }
            Scenario::Fault => {
                let sequence = breathing_sequence(palette.single, BREATHING_STEPS)
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                for _ in 0..self.lamp_count {
                    lamps.push(LampConfig {
                        color: LampColor::Sequence(sequence.clone()),
                        interval: blink,
                        delay: 0,
                        duration: settings.duration,
                    });
                }
            }
            Scenario::InRunning => {
                if settings.battery <= 0.0 {
                    return Err(BeltError::MissingValue("battery"));
                }
                let gradient =
                    self.gradient(palette.low, palette.middle, palette.high, settings.ratio)?;
                let lit = self.lamp_for_value(settings.battery);
                lamps.extend(gradient.iter().take(lit).enumerate().map(|(i, c)| {
                    LampConfig {
                        color: LampColor::Solid(c.to_string()),
                        interval: blink,
                        delay: settings.delay * i as u64,
                        duration: settings.duration,
                    }
                }));
            }
            Scenario::DisconnectRemote => {
                let color = LampColor::Solid(palette.single.to_string());
                for _ in 0..self.lamp_count {
                    lamps.push(LampConfig {
                        color: color.clone(),
                        interval: blink,
                        delay: 0,
                        duration: settings.duration,
                    });
                }
            }
        }

        lamps.resize_with(self.lamp_count, LampConfig::off);
        Ok(lamps)
    }
}

/// Linear interpolation from `start` to `end` over `steps` colours,
/// both ends included.
fn interpolate(start: Rgb, end: Rgb, steps: usize) -> Vec<Rgb> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let lerp = |a: u8, b: u8, i: usize| {
                let step = (f64::from(b) - f64::from(a)) / (steps - 1) as f64;
                (f64::from(a) + step * i as f64).round() as u8
            };
            (0..steps)
                .map(|i| Rgb(lerp(start.0, end.0, i), lerp(start.1, end.1, i), lerp(start.2, end.2, i)))
                .collect()
        }
    }
}

/// Brightness ramp up to the colour's own lightness and back down,
/// stopping before the lamp goes nearly dark.
pub fn breathing_sequence(color: Rgb, steps: usize) -> Vec<Rgb> {
    let steps = steps.max(1);
    let (h, l, s) = rgb_to_hls(color);
    let at = |i: usize| l * (i as f64 / steps as f64);

    let mut colors: Vec<Rgb> = (0..=steps).map(|i| hls_to_rgb(h, at(i), s)).collect();
    for i in (0..steps).rev() {
        let lightness = at(i);
        if lightness < MIN_BREATHING_LIGHTNESS {
            break;
        }
        colors.push(hls_to_rgb(h, lightness, s));
    }
    colors
}

fn rgb_to_hls(color: Rgb) -> (f64, f64, f64) {
    let (r, g, b) = (
        f64::from(color.0) / 255.0,
        f64::from(color.1) / 255.0,
        f64::from(color.2) / 255.0,
    );
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let sum = max + min;
    let range = max - min;
    let l = sum / 2.0;
    if range == 0.0 {
        return (0.0, l, 0.0);
    }
    let s = if l <= 0.5 { range / sum } else { range / (2.0 - sum) };
    let rc = (max - r) / range;
    let gc = (max - g) / range;
    let bc = (max - b) / range;
    let h = if r == max {
        bc - gc
    } else if g == max {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    ((h / 6.0).rem_euclid(1.0), l, s)
}

fn hls_to_rgb(h: f64, l: f64, s: f64) -> Rgb {
    let to_byte = |v: f64| (v * 255.0).clamp(0.0, 255.0) as u8;
    if s == 0.0 {
        let v = to_byte(l);
        return Rgb(v, v, v);
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    let hue = |h: f64| {
        let h = h.rem_euclid(1.0);
        if h < 1.0 / 6.0 {
            m1 + (m2 - m1) * h * 6.0
        } else if h < 0.5 {
            m2
        } else if h < 2.0 / 3.0 {
            m1 + (m2 - m1) * (2.0 / 3.0 - h) * 6.0
        } else {
            m1
        }
    };
    Rgb(
        to_byte(hue(h + 1.0 / 3.0)),
        to_byte(hue(h)),
        to_byte(hue(h - 1.0 / 3.0)),
    )
}

#[derive(Debug, Deserialize)]
struct ScenarioRequest {
    scenario: Scenario,
    #[serde(default)]
    config: ScenarioSettings,
    color: Option<ColorSpec>,
}

/// Handler: render the requested scenario for the stock belt.
pub fn scenario(_ctx: &ClaimsContext, data: &Payload) -> HandlerResponse {
    let request: ScenarioRequest = match serde_json::from_value(Value::Object(data.clone())) {
        Ok(request) => request,
        Err(e) => return HandlerResponse::error(400, format!("invalid scenario request: {e}")),
    };

    let rendered = request
        .color
        .as_ref()
        .ok_or(BeltError::MissingColor)
        .and_then(Palette::try_from)
        .and_then(|palette| LampBelt::default().render(request.scenario, &request.config, &palette));

    match rendered {
        Ok(lamps) => HandlerResponse::ok(
            "OK",
            json!({ "scenario": request.scenario, "lamps": lamps }),
        ),
        Err(e) => HandlerResponse::error(400, e.to_string()),
    }
}
