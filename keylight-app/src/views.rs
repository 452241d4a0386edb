//! Text screens of the control panel.

use std::fmt;

use keylight_api::{AccessoryInfo, LightState};

use crate::light::Health;
use crate::store::{Light, Preferences};

/// Snapshot of one light for display.
#[derive(Debug, Clone)]
pub struct LightView {
    pub light: Light,
    /// `None` until the light has been fetched
    pub state: Option<LightState>,
    pub health: Health,
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn summary(state: &LightState) -> String {
    format!(
        "{:<3}  {:>3}%  {} K",
        state.on.to_string(),
        state.brightness,
        state.kelvin()
    )
}

/// The list of known lights.
pub struct ListScreen<'a> {
    pub views: &'a [LightView],
    pub preferences: &'a Preferences,
}

impl fmt::Display for ListScreen<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.views.is_empty() {
            writeln!(f, "No lights found.")?;
            return writeln!(f, "Run `keylight scan` or add one with `keylight add <host>`.");
        }

        writeln!(
            f,
            "Keylights (sync {})",
            on_off(self.preferences.global_sync)
        )?;

        let width = self
            .views
            .iter()
            .map(|view| view.light.display_name.chars().count())
            .max()
            .unwrap_or(0);

        for view in self.views {
            let endpoint = view.light.endpoint();
            let name = &view.light.display_name;

            match (&view.health, view.state) {
                (Health::Unreachable { .. }, _) => {
                    writeln!(f, "  {name:<width$}  {endpoint}  Unable to connect")?;
                    writeln!(
                        f,
                        "  {:<width$}  retry with `keylight show {endpoint}` \
                         or remove with `keylight remove {endpoint}`",
                        ""
                    )?;
                }
                (_, Some(state)) => {
                    writeln!(f, "  {name:<width$}  {endpoint}  {}", summary(&state))?;
                }
                (_, None) => {
                    writeln!(f, "  {name:<width$}  {endpoint}  -")?;
                }
            }
        }

        Ok(())
    }
}

/// Details and controls of one light.
pub struct DetailScreen<'a> {
    pub view: &'a LightView,
    pub info: Option<&'a AccessoryInfo>,
}

impl fmt::Display for DetailScreen<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let light = &self.view.light;
        let endpoint = light.endpoint();

        writeln!(f, "{}", light.display_name)?;
        writeln!(f, "  Address      {endpoint}")?;

        if let Health::Unreachable { error } = &self.view.health {
            writeln!(f, "  Unable to connect: {error}")?;
            writeln!(
                f,
                "  Retry with `keylight show {endpoint}` \
                 or remove with `keylight remove {endpoint}`"
            )?;
        } else if let Some(state) = self.view.state {
            writeln!(f, "  Power        {}", state.on)?;
            writeln!(f, "  Brightness   {}%", state.brightness)?;
            writeln!(
                f,
                "  Temperature  {} K ({})",
                state.kelvin(),
                state.temperature
            )?;
        }

        let product = self
            .info
            .map(|info| info.product_name.as_str())
            .filter(|p| !p.is_empty())
            .or(light.product_name.as_deref());
        if let Some(product) = product {
            writeln!(f, "  Product      {product}")?;
        }

        let firmware = self
            .info
            .map(|info| info.firmware_version.as_str())
            .filter(|v| !v.is_empty())
            .or(light.firmware_version.as_deref());
        if let Some(firmware) = firmware {
            writeln!(f, "  Firmware     {firmware}")?;
        }

        if let Some(serial) = light.serial_number.as_deref() {
            writeln!(f, "  Serial       {serial}")?;
        }
        if let Some(mac) = light.mac_address.as_deref() {
            writeln!(f, "  MAC          {mac}")?;
        }

        let wifi = self
            .info
            .and_then(|info| info.wifi_info.as_ref())
            .or(light.wifi.as_ref());
        if let Some(wifi) = wifi {
            writeln!(
                f,
                "  Wi-Fi        {} ({} MHz, {} dBm)",
                wifi.ssid, wifi.frequency_mhz, wifi.rssi
            )?;
        }

        writeln!(f, "  Added        {}", light.added_at.date())
    }
}

/// Global preferences.
pub struct SettingsScreen<'a> {
    pub preferences: &'a Preferences,
}

impl fmt::Display for SettingsScreen<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Settings")?;
        writeln!(
            f,
            "  Sync all lights  {}",
            on_off(self.preferences.global_sync)
        )?;
        writeln!(
            f,
            "  Hide on blur     {}",
            on_off(self.preferences.hide_on_blur)
        )
    }
}

pub fn render_list(views: &[LightView], preferences: &Preferences) -> String {
    ListScreen { views, preferences }.to_string()
}

pub fn render_detail(view: &LightView, info: Option<&AccessoryInfo>) -> String {
    DetailScreen { view, info }.to_string()
}

pub fn render_settings(preferences: &Preferences) -> String {
    SettingsScreen { preferences }.to_string()
}

#[cfg(test)]
mod tests {
    use keylight_api::{DEFAULT_PORT, Endpoint, Power};

    use super::*;

    fn view(hostname: &str, name: &str, state: Option<LightState>, health: Health) -> LightView {
        LightView {
            light: Light::manual(&Endpoint::new(hostname, DEFAULT_PORT), name),
            state,
            health,
        }
    }

    #[test]
    fn test_empty_list() {
        let screen = render_list(&[], &Preferences::default());
        assert!(screen.starts_with("No lights found."));
    }

    #[test]
    fn test_list() {
        let views = [
            view(
                "desk.local",
                "Desk",
                Some(LightState::new(Power::On, 40, 143)),
                Health::Online,
            ),
            view(
                "shelf.local",
                "Shelf",
                None,
                Health::Unreachable {
                    error: "timed out".to_string(),
                },
            ),
        ];

        let screen = render_list(&views, &Preferences::default());
        let lines: Vec<_> = screen.lines().collect();

        assert_eq!(lines[0], "Keylights (sync on)");
        assert_eq!(lines[1], "  Desk   desk.local:9123  on    40%  7000 K");
        assert_eq!(lines[2], "  Shelf  shelf.local:9123  Unable to connect");
        assert!(lines[3].contains("keylight remove shelf.local:9123"));
    }

    #[test]
    fn test_detail() {
        let mut light = view(
            "desk.local",
            "Desk",
            Some(LightState::new(Power::Off, 3, 344)),
            Health::Online,
        );
        light.light.mac_address = Some("3C:6A:9D:00:11:22".to_string());

        let screen = render_detail(&light, None);

        assert!(screen.starts_with("Desk\n"));
        assert!(screen.contains("  Power        off\n"));
        assert!(screen.contains("  Temperature  2900 K (344)\n"));
        assert!(screen.contains("  MAC          3C:6A:9D:00:11:22\n"));
    }

    #[test]
    fn test_detail_falls_back_to_stored_metadata() {
        let mut light = view("desk.local", "Desk", None, Health::Online);
        light.light.product_name = Some("Elgato Key Light Air".to_string());
        light.light.firmware_version = Some("1.0.3".to_string());

        let info = AccessoryInfo {
            firmware_version: "1.0.4".to_string(),
            ..Default::default()
        };
        let screen = render_detail(&light, Some(&info));

        assert!(screen.contains("  Product      Elgato Key Light Air\n"));
        assert!(screen.contains("  Firmware     1.0.4\n"));
    }

    #[test]
    fn test_settings() {
        let preferences = Preferences {
            global_sync: false,
            hide_on_blur: true,
        };

        assert_eq!(
            render_settings(&preferences),
            "Settings\n  Sync all lights  off\n  Hide on blur     on\n"
        );
    }
}
