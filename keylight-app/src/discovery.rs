use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::future::join_all;
use mdns_sd::{ServiceDaemon, ServiceEvent};

use keylight_api::Endpoint;

use crate::client::KeylightClient;
use crate::error::{Error, Result};
use crate::settings::Discovery;
use crate::store::Light;

/// Source of candidate light addresses.
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<Endpoint>>;
}

/// Browses mDNS for the keylight service type.
#[derive(Debug, Clone)]
pub struct MdnsScanner {
    service_type: String,
    window: Duration,
}

impl MdnsScanner {
    pub fn new(settings: &Discovery) -> Self {
        Self {
            service_type: settings.service_type.clone(),
            window: settings.browse_window(),
        }
    }
}

#[async_trait::async_trait]
impl Scanner for MdnsScanner {
    async fn scan(&self) -> Result<Vec<Endpoint>> {
        let service_type = self.service_type.clone();
        let window = self.window;

        tokio::task::spawn_blocking(move || browse(&service_type, window))
            .await
            .map_err(|e| Error::discovery(format!("mDNS browse task failed: {}", e)))?
    }
}

fn browse(service_type: &str, window: Duration) -> Result<Vec<Endpoint>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| Error::discovery(format!("Failed to start mDNS daemon: {}", e)))?;
    let receiver = daemon
        .browse(service_type)
        .map_err(|e| Error::discovery(format!("Failed to browse {}: {}", service_type, e)))?;

    tracing::debug!("browsing {} for {:?}", service_type, window);

    let deadline = Instant::now() + window;
    let mut found = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let hostname = info.get_hostname().trim_end_matches('.');
                tracing::debug!(
                    "resolved {} at {}:{}",
                    info.get_fullname(),
                    hostname,
                    info.get_port()
                );
                found.push(Endpoint::new(hostname, info.get_port()));
            }
            Ok(_) => {}
            // Window elapsed or the daemon went away
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.shutdown() {
        tracing::debug!("mDNS daemon shutdown: {}", e);
    }

    Ok(found)
}

/// Always reports the same addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticScanner {
    endpoints: Vec<Endpoint>,
}

impl StaticScanner {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait::async_trait]
impl Scanner for StaticScanner {
    async fn scan(&self) -> Result<Vec<Endpoint>> {
        Ok(self.endpoints.clone())
    }
}

/// Orders lights by display name, ignoring case, then by address.
pub fn sort_lights(lights: &mut [Light]) {
    lights.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.hostname.cmp(&b.hostname))
            .then_with(|| a.port.cmp(&b.port))
    });
}

/// Drops repeated addresses, keeping the first occurrence.
fn dedup_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = HashSet::new();
    endpoints
        .into_iter()
        .filter(|endpoint| seen.insert(endpoint.clone()))
        .collect()
}

/// Drops lights whose MAC address was already seen under another address.
fn dedup_devices(lights: Vec<Light>) -> Vec<Light> {
    let mut seen = HashSet::new();
    lights
        .into_iter()
        .filter(|light| match &light.mac_address {
            Some(mac) => seen.insert(mac.to_ascii_uppercase()),
            None => true,
        })
        .collect()
}

/// Scans for lights and fetches their accessory info.
///
/// Lights that fail to answer are logged and left out. Only a failure of
/// the scan itself is returned as an error.
pub async fn discover(scanner: &dyn Scanner, client: &KeylightClient) -> Result<Vec<Light>> {
    let endpoints = dedup_endpoints(scanner.scan().await?);

    let lookups = endpoints.iter().map(|endpoint| async move {
        (endpoint, client.get_accessory_info(endpoint).await)
    });

    let mut lights = Vec::new();
    for (endpoint, result) in join_all(lookups).await {
        match result {
            Ok(info) => lights.push(Light::from_accessory(endpoint, &info)),
            Err(e) => tracing::warn!("Skipping {}: {}", endpoint, e),
        }
    }

    let mut lights = dedup_devices(lights);
    sort_lights(&mut lights);

    tracing::info!("Discovered {} of {} announced lights", lights.len(), endpoints.len());

    Ok(lights)
}

#[cfg(test)]
mod tests {
    use keylight_api::{AccessoryInfo, DEFAULT_PORT};

    use super::*;

    fn light(hostname: &str, name: &str) -> Light {
        Light::manual(&Endpoint::new(hostname, DEFAULT_PORT), name)
    }

    #[test]
    fn test_sort_lights() {
        let mut lights = vec![
            light("c.local", "shelf"),
            light("b.local", "Desk"),
            light("a.local", "desk"),
            light("d.local", "Backdrop"),
        ];

        sort_lights(&mut lights);

        let order: Vec<_> = lights.iter().map(|l| l.hostname.as_str()).collect();
        assert_eq!(order, ["d.local", "a.local", "b.local", "c.local"]);
    }

    #[test]
    fn test_dedup() {
        let endpoints = dedup_endpoints(vec![
            Endpoint::new("a.local", DEFAULT_PORT),
            Endpoint::new("b.local", DEFAULT_PORT),
            Endpoint::new("a.local", DEFAULT_PORT),
        ]);
        assert_eq!(endpoints.len(), 2);

        let info = AccessoryInfo {
            mac_address: "3C:6A:9D:00:11:22".to_string(),
            display_name: "Desk".to_string(),
            ..Default::default()
        };
        let lights = dedup_devices(vec![
            Light::from_accessory(&Endpoint::new("desk.local", DEFAULT_PORT), &info),
            Light::from_accessory(&Endpoint::new("10.0.0.2", DEFAULT_PORT), &info),
            light("shelf.local", "Shelf"),
        ]);
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].hostname, "desk.local");
    }

    #[tokio::test]
    async fn test_static_scanner() {
        let scanner = StaticScanner::new(vec![Endpoint::new("a.local", DEFAULT_PORT)]);
        assert_eq!(scanner.scan().await.unwrap().len(), 1);
    }
}
