use std::sync::Arc;

use keylight_api::{AccessoryInfo, Endpoint, LightState, Power, WifiInfo};
use keylight_app::discovery::{Scanner, StaticScanner};
use keylight_app::settings::Settings;
use keylight_app::store::{MemoryStore, Store};
use keylight_app::Panel;
use keylight_mock::MockKeylight;

pub fn test_settings() -> Settings {
    let mut settings = Settings::embedded().unwrap();

    settings.http.timeout_ms = 1000;
    settings.http.retries = 0;
    settings.http.retry_delay_ms = 10;
    settings.control.debounce_ms = 20;
    settings.control.poll_interval_ms = 50;
    settings.identify.delay_ms = 5;

    settings
}

pub fn accessory(index: usize, display_name: &str) -> AccessoryInfo {
    AccessoryInfo {
        product_name: "Elgato Key Light".to_string(),
        hardware_board_type: 53,
        firmware_version: "1.0.3".to_string(),
        mac_address: format!("3C:6A:9D:00:00:{:02X}", index + 1),
        serial_number: format!("CW00TEST{:04}", index + 1),
        display_name: display_name.to_string(),
        features: vec!["lights".to_string()],
        wifi_info: Some(WifiInfo {
            ssid: "lab".to_string(),
            frequency_mhz: 2400,
            rssi: -50,
        }),
        ..Default::default()
    }
}

pub fn initial_state() -> LightState {
    LightState::new(Power::Off, 20, 213)
}

/// An address nothing listens on.
pub fn unreachable_endpoint() -> Endpoint {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    Endpoint::new("127.0.0.1", port)
}

pub async fn spawn_lights(names: &[&str]) -> Vec<MockKeylight> {
    let mut lights = Vec::new();
    for (index, name) in names.iter().enumerate() {
        lights.push(
            MockKeylight::spawn(accessory(index, name), initial_state())
                .await
                .unwrap(),
        );
    }
    lights
}

pub struct MockApp {
    pub panel: Panel,
    pub store: Arc<MemoryStore>,
    pub lights: Vec<MockKeylight>,
}

impl MockApp {
    /// Lights with the given names, all registered with the panel.
    pub async fn new(names: &[&str]) -> Self {
        let app = Self::unregistered(names, Vec::new()).await;

        for light in &app.lights {
            let endpoint = light.endpoint();
            app.panel
                .add_manual(&endpoint.hostname, endpoint.port, None)
                .await
                .unwrap();
        }

        app
    }

    /// Lights the panel only knows through its scanner, which also reports
    /// `extra` addresses.
    pub async fn unregistered(names: &[&str], extra: Vec<Endpoint>) -> Self {
        let lights = spawn_lights(names).await;

        let mut endpoints: Vec<_> = lights.iter().map(MockKeylight::endpoint).collect();
        endpoints.extend(extra);

        let store = Arc::new(MemoryStore::new());
        let panel = Self::panel(store.clone(), Box::new(StaticScanner::new(endpoints))).await;

        Self {
            panel,
            store,
            lights,
        }
    }

    pub async fn panel(store: Arc<MemoryStore>, scanner: Box<dyn Scanner>) -> Panel {
        let store: Arc<dyn Store> = store;
        Panel::new(test_settings(), store, scanner).await.unwrap()
    }

    pub fn endpoint(&self, index: usize) -> Endpoint {
        self.lights[index].endpoint()
    }

    /// Query string selecting light `index`.
    pub fn query(&self, index: usize) -> String {
        self.endpoint(index).to_string()
    }
}
