use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{RwLock, watch};

use keylight_api::{Endpoint, LightState, Power};

use crate::client::KeylightClient;
use crate::discovery::{MdnsScanner, Scanner, discover};
use crate::error::{Error, Result};
use crate::identify::IdentifyPattern;
use crate::light::{LightHandle, SetOptions};
use crate::settings::Settings;
use crate::store::{FileStore, Light, LightRegistry, PreferenceStore, Preferences, Store};
use crate::sync::SyncBus;
use crate::views::LightView;

/// Everything a front-end needs: the known lights, their handles and the
/// user preferences.
pub struct Panel {
    settings: Settings,
    client: KeylightClient,
    registry: LightRegistry,
    preference_store: PreferenceStore,
    preferences: watch::Sender<Preferences>,
    bus: Arc<SyncBus>,
    scanner: Box<dyn Scanner>,
    handles: RwLock<HashMap<Endpoint, LightHandle>>,
}

impl Panel {
    pub async fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        scanner: Box<dyn Scanner>,
    ) -> Result<Self> {
        let client = KeylightClient::new(&settings.http)?;
        let registry = LightRegistry::new(store.clone());
        let preference_store = PreferenceStore::new(store);
        let preferences = watch::channel(preference_store.load().await?).0;

        Ok(Self {
            settings,
            client,
            registry,
            preference_store,
            preferences,
            bus: Arc::new(SyncBus::new()),
            scanner,
            handles: RwLock::new(HashMap::new()),
        })
    }

    /// Panel backed by files in the configured data directory and mDNS.
    pub async fn open(settings: Settings) -> Result<Self> {
        let store = Arc::new(FileStore::new(settings.data_dir()));
        let scanner = Box::new(MdnsScanner::new(&settings.discovery));

        Self::new(settings, store, scanner).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bus(&self) -> &Arc<SyncBus> {
        &self.bus
    }

    pub fn identify_pattern(&self) -> IdentifyPattern {
        IdentifyPattern::from(&self.settings.identify)
    }

    /// Rescans the network and replaces the known lights with what answered.
    ///
    /// A failed scan yields an empty list and leaves the known lights as
    /// they were.
    pub async fn scan(&self) -> Result<Vec<Light>> {
        let lights = match discover(self.scanner.as_ref(), &self.client).await {
            Ok(lights) => lights,
            Err(e) => {
                tracing::error!("Scan failed: {}", e);
                return Ok(Vec::new());
            }
        };

        self.registry.replace(lights).await?;

        let lights = self.registry.lights().await?;
        self.handles
            .write()
            .await
            .retain(|endpoint, _| lights.iter().any(|light| &light.endpoint() == endpoint));

        Ok(lights)
    }

    pub async fn lights(&self) -> Result<Vec<Light>> {
        self.registry.lights().await
    }

    pub async fn find(&self, query: &str) -> Result<Light> {
        self.registry
            .find(query)
            .await?
            .ok_or_else(|| Error::not_found(format!("light {}", query)))
    }

    /// The handle of `light`, created and attached to the sync bus on first
    /// use.
    pub async fn handle(&self, light: &Light) -> LightHandle {
        let endpoint = light.endpoint();

        if let Some(handle) = self.handles.read().await.get(&endpoint) {
            return handle.clone();
        }

        self.handles
            .write()
            .await
            .entry(endpoint)
            .or_insert_with_key(|endpoint| {
                let handle = LightHandle::new(
                    endpoint.clone(),
                    self.client.clone(),
                    self.bus.clone(),
                    self.preferences.subscribe(),
                    self.settings.control.clone(),
                );
                handle.attach_sync();
                handle
            })
            .clone()
    }

    pub async fn handle_for(&self, query: &str) -> Result<LightHandle> {
        let light = self.find(query).await?;
        Ok(self.handle(&light).await)
    }

    /// Handles of every known light.
    pub async fn attach_all(&self) -> Result<Vec<LightHandle>> {
        let mut handles = Vec::new();
        for light in self.registry.lights().await? {
            handles.push(self.handle(&light).await);
        }
        Ok(handles)
    }

    /// Registers a light by address. The device is asked for its metadata
    /// but does not have to answer.
    pub async fn add_manual(&self, hostname: &str, port: u16, name: Option<&str>) -> Result<Light> {
        let endpoint = Endpoint::new(hostname, port);

        let mut light = match self.client.get_accessory_info(&endpoint).await {
            Ok(info) => Light::from_accessory(&endpoint, &info),
            Err(e) => {
                tracing::warn!("{} did not answer ({}), adding it anyway", endpoint, e);
                Light::manual(&endpoint, hostname)
            }
        };

        if let Some(name) = name {
            light.display_name = name.to_string();
        }

        self.registry.insert(light.clone()).await?;
        tracing::info!("Added {} ({})", light.display_name, endpoint);

        Ok(light)
    }

    pub async fn remove(&self, query: &str) -> Result<Light> {
        let light = self.find(query).await?;
        let endpoint = light.endpoint();

        self.registry.remove(&endpoint).await?;
        self.handles.write().await.remove(&endpoint);

        Ok(light)
    }

    /// Renames a light locally and on the device.
    pub async fn rename(&self, query: &str, name: &str) -> Result<Light> {
        let mut light = self.find(query).await?;

        self.handle(&light).await.set_display_name(name).await;
        self.registry.rename(&light.endpoint(), name).await?;

        light.display_name = name.to_string();
        Ok(light)
    }

    pub fn preferences(&self) -> Preferences {
        *self.preferences.borrow()
    }

    pub async fn set_global_sync(&self, enabled: bool) -> Result<Preferences> {
        let preferences = self.preference_store.set_global_sync(enabled).await?;
        self.preferences.send_replace(preferences);
        Ok(preferences)
    }

    pub async fn set_hide_on_blur(&self, enabled: bool) -> Result<Preferences> {
        let preferences = self.preference_store.set_hide_on_blur(enabled).await?;
        self.preferences.send_replace(preferences);
        Ok(preferences)
    }

    /// Fetches the state of every known light concurrently.
    pub async fn refresh_all(&self) -> Result<Vec<(Endpoint, Result<LightState>)>> {
        let handles = self.attach_all().await?;

        let refreshes = handles.iter().map(|handle| async move {
            (handle.endpoint().clone(), handle.refresh().await)
        });

        Ok(join_all(refreshes).await)
    }

    /// Switches every fetched light, whatever the sync preference says.
    /// Lights that were never fetched are left alone.
    pub async fn set_power_all(&self, on: Power) -> Result<Vec<(Light, LightState)>> {
        let mut switched = Vec::new();

        for light in self.registry.lights().await? {
            let handle = self.handle(&light).await;
            if !handle.is_fetched() {
                tracing::warn!("{}: state unknown, not switching", light.endpoint());
                continue;
            }

            let state = handle.set_power(on, SetOptions::local()).await;
            switched.push((light, state));
        }

        Ok(switched)
    }

    /// Turns every light off when all fetched lights are on, otherwise on.
    pub async fn toggle_all(&self) -> Result<Vec<(Light, LightState)>> {
        let handles = self.attach_all().await?;

        let mut fetched = handles.iter().filter(|handle| handle.is_fetched()).peekable();
        let all_on =
            fetched.peek().is_some() && fetched.all(|handle| handle.state().on == Power::On);

        let on = if all_on { Power::Off } else { Power::On };
        self.set_power_all(on).await
    }

    /// Waits until synced changes have reached every light and all their
    /// writes have been sent.
    pub async fn flush_all(&self) {
        self.bus.settled().await;

        let handles: Vec<_> = self.handles.read().await.values().cloned().collect();
        for handle in handles {
            handle.flush().await;
        }
    }

    pub async fn spawn_pollers(&self) -> Result<()> {
        let interval = self.settings.control.poll_interval();
        for handle in self.attach_all().await? {
            handle.spawn_poller(interval);
        }
        Ok(())
    }

    pub async fn view(&self, light: &Light) -> LightView {
        let handle = self.handle(light).await;

        LightView {
            light: light.clone(),
            state: handle.cached().map(|cached| cached.state),
            health: handle.health(),
        }
    }

    pub async fn views(&self) -> Result<Vec<LightView>> {
        let mut views = Vec::new();
        for light in self.registry.lights().await? {
            views.push(self.view(&light).await);
        }
        Ok(views)
    }
}
