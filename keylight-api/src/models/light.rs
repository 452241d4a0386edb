use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Brightness range accepted by the device, in percent.
pub const BRIGHTNESS_RANGE: RangeInclusive<u8> = 3..=100;

/// Color temperature range accepted by the device, in device units.
pub const TEMPERATURE_RANGE: RangeInclusive<u16> = 143..=344;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Power {
    #[default]
    Off,
    On,
}

impl Power {
    pub fn is_on(self) -> bool {
        self == Power::On
    }

    pub fn toggled(self) -> Self {
        match self {
            Power::Off => Power::On,
            Power::On => Power::Off,
        }
    }
}

impl From<u8> for Power {
    fn from(value: u8) -> Self {
        if value == 0 { Power::Off } else { Power::On }
    }
}

impl From<Power> for u8 {
    fn from(value: Power) -> Self {
        match value {
            Power::Off => 0,
            Power::On => 1,
        }
    }
}

impl From<bool> for Power {
    fn from(value: bool) -> Self {
        if value { Power::On } else { Power::Off }
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::Off => write!(f, "off"),
            Power::On => write!(f, "on"),
        }
    }
}

/// State of a single light as reported by `GET /elgato/lights`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: Power,
    /// Brightness in percent (3-100)
    pub brightness: u8,
    /// Color temperature in device units (143-344)
    pub temperature: u16,
}

impl Default for LightState {
    /// Values shown while the real state of a light is unknown.
    fn default() -> Self {
        Self {
            on: Power::Off,
            brightness: *BRIGHTNESS_RANGE.start(),
            temperature: *TEMPERATURE_RANGE.start(),
        }
    }
}

impl LightState {
    pub fn new(on: Power, brightness: u8, temperature: u16) -> Self {
        Self {
            on,
            brightness,
            temperature,
        }
    }

    /// Copy of this state with brightness and temperature pulled into the
    /// device ranges.
    pub fn clamped(self) -> Self {
        Self {
            on: self.on,
            brightness: clamp_brightness(i64::from(self.brightness)),
            temperature: clamp_temperature(i64::from(self.temperature)),
        }
    }

    pub fn kelvin(&self) -> u32 {
        temperature_to_kelvin(self.temperature)
    }
}

pub fn clamp_brightness(value: i64) -> u8 {
    let (min, max) = (*BRIGHTNESS_RANGE.start(), *BRIGHTNESS_RANGE.end());
    value.clamp(i64::from(min), i64::from(max)) as u8
}

pub fn clamp_temperature(value: i64) -> u16 {
    let (min, max) = (*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
    value.clamp(i64::from(min), i64::from(max)) as u16
}

/// Converts a device temperature value to Kelvin.
///
/// Linear fit of the device scale: `K = round(-4100 * v / 201 + 1993300 / 201)`.
pub fn temperature_to_kelvin(value: u16) -> u32 {
    let kelvin = (-4100.0 * f64::from(value) / 201.0 + 1_993_300.0 / 201.0).round();
    kelvin.max(0.0) as u32
}

/// Inverse of [`temperature_to_kelvin`], clamped to the device range.
pub fn kelvin_to_temperature(kelvin: u32) -> u16 {
    let value = ((1_993_300.0 - 201.0 * f64::from(kelvin)) / 4100.0).round();
    clamp_temperature(value as i64)
}

/// Body of `GET` and `PUT /elgato/lights`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightsPayload {
    pub number_of_lights: usize,
    pub lights: Vec<LightState>,
}

impl LightsPayload {
    /// Payload for a PUT. The device requires all three fields, so the full
    /// state is always sent.
    pub fn single(state: LightState) -> Self {
        Self {
            number_of_lights: 1,
            lights: vec![state.clamped()],
        }
    }

    pub fn first(&self) -> Option<LightState> {
        self.lights.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kelvin_endpoints() {
        assert_eq!(temperature_to_kelvin(143), 7000);
        assert_eq!(temperature_to_kelvin(344), 2900);
        assert_eq!(temperature_to_kelvin(200), 5837);
    }

    #[test]
    fn test_kelvin_round_trip_within_range() {
        for value in [143u16, 180, 250, 300, 344] {
            assert_eq!(kelvin_to_temperature(temperature_to_kelvin(value)), value);
        }
        assert_eq!(kelvin_to_temperature(10_000), 143);
        assert_eq!(kelvin_to_temperature(1_000), 344);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_brightness(0), 3);
        assert_eq!(clamp_brightness(-20), 3);
        assert_eq!(clamp_brightness(55), 55);
        assert_eq!(clamp_brightness(250), 100);
        assert_eq!(clamp_temperature(0), 143);
        assert_eq!(clamp_temperature(500), 344);

        let state = LightState::new(Power::On, 0, 400).clamped();
        assert_eq!(state, LightState::new(Power::On, 3, 344));
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = LightsPayload::single(LightState::new(Power::On, 120, 100));
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "numberOfLights": 1,
                "lights": [{ "on": 1, "brightness": 100, "temperature": 143 }]
            })
        );

        let parsed: LightsPayload = serde_json::from_str(
            r#"{"numberOfLights":1,"lights":[{"on":0,"brightness":20,"temperature":213}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.first(), Some(LightState::new(Power::Off, 20, 213)));
    }

    #[test]
    fn test_power_from_wire() {
        assert_eq!(Power::from(0), Power::Off);
        assert_eq!(Power::from(1), Power::On);
        assert_eq!(Power::from(7), Power::On);
        assert_eq!(Power::On.toggled(), Power::Off);
        assert_eq!(LightState::default().on, Power::Off);
    }
}
