use serde::{Deserialize, Serialize};

/// Body of `GET /elgato/accessory-info`.
///
/// Firmware revisions differ in which fields they report, so everything
/// defaults when absent.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessoryInfo {
    pub product_name: String,
    pub hardware_board_type: u32,
    pub hardware_revision: String,
    pub mac_address: String,
    pub firmware_build_number: u32,
    pub firmware_version: String,
    pub serial_number: String,
    pub display_name: String,
    pub features: Vec<String>,
    #[serde(rename = "wifi-info", skip_serializing_if = "Option::is_none")]
    pub wifi_info: Option<WifiInfo>,
}

impl AccessoryInfo {
    /// Name to show for the light; the device leaves `displayName` empty
    /// until a user sets one.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.product_name
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiInfo {
    pub ssid: String,
    #[serde(rename = "frequencyMHz")]
    pub frequency_mhz: u32,
    pub rssi: i32,
}

/// Body of `PUT /elgato/accessory-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameUpdate {
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_response() {
        let info: AccessoryInfo = serde_json::from_str(
            r#"{
                "productName": "Elgato Key Light",
                "hardwareBoardType": 53,
                "hardwareRevision": "0.1",
                "macAddress": "3C:6A:9D:00:11:22",
                "firmwareBuildNumber": 218,
                "firmwareVersion": "1.0.3",
                "serialNumber": "CW00A1B2C3",
                "displayName": "Desk",
                "features": ["lights"],
                "wifi-info": { "ssid": "home", "frequencyMHz": 2400, "rssi": -48 },
                "bt-info": { "broadcastMode": 0, "pairing": false, "paired": false }
            }"#,
        )
        .unwrap();

        assert_eq!(info.display_name, "Desk");
        assert_eq!(info.mac_address, "3C:6A:9D:00:11:22");
        assert_eq!(info.wifi_info.as_ref().map(|w| w.rssi), Some(-48));
        assert_eq!(info.label(), "Desk");
    }

    #[test]
    fn test_label_falls_back_to_product_name() {
        let info: AccessoryInfo =
            serde_json::from_str(r#"{"productName":"Elgato Key Light Air"}"#).unwrap();

        assert_eq!(info.label(), "Elgato Key Light Air");
        assert!(info.wifi_info.is_none());
    }

    #[test]
    fn test_display_name_update() {
        let body = serde_json::to_string(&DisplayNameUpdate {
            display_name: "Left".to_string(),
        })
        .unwrap();

        assert_eq!(body, r#"{"displayName":"Left"}"#);
    }
}
