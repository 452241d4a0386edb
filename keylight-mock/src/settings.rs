use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use keylight_api::{AccessoryInfo, LightState, Power, WifiInfo};

use crate::error::MockError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Light {
    pub display_name: String,
    pub product_name: String,
    pub mac_address: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub on: bool,
    pub brightness: u8,
    pub temperature: u16,
}

impl Light {
    pub fn accessory_info(&self) -> AccessoryInfo {
        AccessoryInfo {
            product_name: self.product_name.clone(),
            hardware_board_type: 53,
            hardware_revision: "0.1".to_string(),
            mac_address: self.mac_address.clone(),
            firmware_build_number: 218,
            firmware_version: self.firmware_version.clone(),
            serial_number: self.serial_number.clone(),
            display_name: self.display_name.clone(),
            features: vec!["lights".to_string()],
            wifi_info: Some(WifiInfo {
                ssid: "mock".to_string(),
                frequency_mhz: 2400,
                rssi: -40,
            }),
        }
    }

    pub fn state(&self) -> LightState {
        LightState::new(Power::from(self.on), self.brightness, self.temperature).clamped()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub server: Server,
    pub light: Light,
}

impl Settings {
    /// Loads the built-in defaults, or the file named by `KEYLIGHT_MOCK_CONFIG`.
    pub fn new() -> Result<Self, MockError> {
        match env::var("KEYLIGHT_MOCK_CONFIG") {
            Ok(path) => {
                let path = Self::normalize_path(&path)?;
                let content = std::fs::read_to_string(&path)?;
                Ok(toml::from_str(&content)?)
            }
            Err(_) => Ok(toml::from_str(include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/configs/default.toml"
            )))?),
        }
    }

    fn normalize_path(path: &str) -> Result<PathBuf, MockError> {
        let path_buf = PathBuf::from(path);

        Ok(if path_buf.is_absolute() {
            path_buf
        } else {
            env::current_dir()?.join(path_buf)
        })
    }
}
