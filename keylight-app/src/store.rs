use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use keylight_api::{AccessoryInfo, DEFAULT_PORT, Endpoint, WifiInfo};

use crate::discovery::sort_lights;
use crate::error::{Error, Result};

/// Storage key of the known light list.
pub const LIGHTS_KEY: &str = "keylights-storage";

/// Storage key of the user preferences.
pub const SETTINGS_KEY: &str = "settings-storage";

/// Key-value storage for JSON documents.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn save(&self, key: &str, value: Value) -> Result<()>;
}

async fn load_as<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    match store.load(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

async fn save_as<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    store.save(key, serde_json::to_value(value)?).await
}

/// Keeps each key in `<root>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl Store for FileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: Value) -> Result<()> {
        let root = self.root.clone();
        let path = self.path(key);
        let bytes = serde_json::to_vec_pretty(&value)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&root)?;

            // Every save stages its own file, renamed over the document once
            // complete
            let mut staging = tempfile::NamedTempFile::new_in(&root)?;
            staging.write_all(&bytes)?;
            staging.persist(&path).map_err(|e| e.error)?;

            Ok(())
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A known light.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Light {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub display_name: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub wifi: Option<WifiInfo>,
    #[serde(with = "time::serde::iso8601")]
    pub added_at: OffsetDateTime,
}

impl Light {
    pub fn from_accessory(endpoint: &Endpoint, info: &AccessoryInfo) -> Self {
        let mut light = Self::manual(endpoint, info.label());
        light.apply_accessory(info);
        light
    }

    /// A light known only by address, e.g. one added by hand.
    pub fn manual<S: Into<String>>(endpoint: &Endpoint, display_name: S) -> Self {
        Self {
            hostname: endpoint.hostname.clone(),
            port: endpoint.port,
            display_name: display_name.into(),
            mac_address: None,
            product_name: None,
            firmware_version: None,
            serial_number: None,
            wifi: None,
            added_at: OffsetDateTime::now_utc(),
        }
    }

    /// Copies the device metadata, keeping the local display name when the
    /// device has none.
    pub fn apply_accessory(&mut self, info: &AccessoryInfo) {
        if !info.display_name.is_empty() {
            self.display_name = info.display_name.clone();
        } else if self.display_name.is_empty() {
            self.display_name = info.label().to_string();
        }
        self.mac_address = non_empty(&info.mac_address);
        self.product_name = non_empty(&info.product_name);
        self.firmware_version = non_empty(&info.firmware_version);
        self.serial_number = non_empty(&info.serial_number);
        self.wifi = info.wifi_info.clone();
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.hostname.clone(), self.port)
    }

    fn same_mac(&self, other: &str) -> bool {
        self.mac_address
            .as_deref()
            .is_some_and(|mac| mac.eq_ignore_ascii_case(other))
    }

    fn same_identity(&self, other: &Light) -> bool {
        self.endpoint() == other.endpoint()
            || other
                .mac_address
                .as_deref()
                .is_some_and(|mac| self.same_mac(mac))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LightsDocument {
    keylights: Vec<Light>,
}

/// The persisted list of known lights.
///
/// Mutations are serialized across clones, so concurrent edits never
/// overwrite each other.
#[derive(Clone)]
pub struct LightRegistry {
    store: Arc<dyn Store>,
    write: Arc<Mutex<()>>,
}

impl LightRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            write: Arc::new(Mutex::new(())),
        }
    }

    pub async fn lights(&self) -> Result<Vec<Light>> {
        Ok(load_as::<LightsDocument>(self.store.as_ref(), LIGHTS_KEY)
            .await?
            .unwrap_or_default()
            .keylights)
    }

    async fn persist(&self, keylights: Vec<Light>) -> Result<()> {
        save_as(self.store.as_ref(), LIGHTS_KEY, &LightsDocument { keylights }).await
    }

    /// Replaces the whole list, keeping the first `added_at` of lights that
    /// were already known.
    pub async fn replace(&self, mut lights: Vec<Light>) -> Result<()> {
        let _write = self.write.lock().await;
        let known = self.lights().await?;

        for light in lights.iter_mut() {
            if let Some(previous) = known.iter().find(|k| k.endpoint() == light.endpoint()) {
                light.added_at = previous.added_at;
            }
        }

        self.persist(lights).await
    }

    /// Adds a light unless one with the same address or MAC is known.
    pub async fn insert(&self, light: Light) -> Result<()> {
        let _write = self.write.lock().await;
        let mut lights = self.lights().await?;

        if let Some(existing) = lights.iter().find(|known| known.same_identity(&light)) {
            return Err(Error::Duplicate(format!(
                "{} ({})",
                existing.display_name,
                existing.endpoint()
            )));
        }

        lights.push(light);
        sort_lights(&mut lights);
        self.persist(lights).await
    }

    pub async fn remove(&self, endpoint: &Endpoint) -> Result<bool> {
        let _write = self.write.lock().await;
        let mut lights = self.lights().await?;
        let before = lights.len();
        lights.retain(|light| &light.endpoint() != endpoint);

        if lights.len() == before {
            return Ok(false);
        }

        self.persist(lights).await?;
        Ok(true)
    }

    pub async fn rename(&self, endpoint: &Endpoint, display_name: &str) -> Result<bool> {
        let _write = self.write.lock().await;
        let mut lights = self.lights().await?;

        let Some(light) = lights.iter_mut().find(|light| &light.endpoint() == endpoint) else {
            return Ok(false);
        };
        light.display_name = display_name.to_string();

        self.persist(lights).await?;
        Ok(true)
    }

    /// Looks a light up by `host:port`, hostname, MAC address or display
    /// name, in that order of precedence.
    pub async fn find(&self, query: &str) -> Result<Option<Light>> {
        let lights = self.lights().await?;

        let found = lights
            .iter()
            .find(|light| light.endpoint().to_string() == query)
            .or_else(|| lights.iter().find(|light| light.hostname == query))
            .or_else(|| lights.iter().find(|light| light.same_mac(query)))
            .or_else(|| {
                lights
                    .iter()
                    .find(|light| light.display_name.eq_ignore_ascii_case(query))
            })
            .cloned();

        Ok(found)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    /// Mirror control changes of one light onto every other light
    pub global_sync: bool,
    /// Hide the panel when it loses focus
    pub hide_on_blur: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            global_sync: true,
            hide_on_blur: true,
        }
    }
}

#[derive(Clone)]
pub struct PreferenceStore {
    store: Arc<dyn Store>,
    write: Arc<Mutex<()>>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            write: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load(&self) -> Result<Preferences> {
        Ok(load_as(self.store.as_ref(), SETTINGS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save(&self, preferences: &Preferences) -> Result<()> {
        let _write = self.write.lock().await;
        save_as(self.store.as_ref(), SETTINGS_KEY, preferences).await
    }

    pub async fn update<F>(&self, f: F) -> Result<Preferences>
    where
        F: FnOnce(&mut Preferences),
    {
        let _write = self.write.lock().await;
        let mut preferences = self.load().await?;
        f(&mut preferences);
        save_as(self.store.as_ref(), SETTINGS_KEY, &preferences).await?;
        Ok(preferences)
    }

    pub async fn set_global_sync(&self, enabled: bool) -> Result<Preferences> {
        self.update(|p| p.global_sync = enabled).await
    }

    pub async fn set_hide_on_blur(&self, enabled: bool) -> Result<Preferences> {
        self.update(|p| p.hide_on_blur = enabled).await
    }
}
