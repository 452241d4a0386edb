use std::time::Duration;

use reqwest::header::ORIGIN;
use serde::de::DeserializeOwned;

use keylight_api::{AccessoryInfo, DisplayNameUpdate, Endpoint, LightState, LightsPayload};

use crate::error::{Error, Result};
use crate::settings::Http;

/// HTTP client for the REST API built into each light.
#[derive(Debug, Clone)]
pub struct KeylightClient {
    http: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
}

impl KeylightClient {
    pub fn new(settings: &Http) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(settings.timeout())
            .build()
            .map_err(|e| Error::device(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            retries: settings.retries,
            retry_delay: settings.retry_delay(),
        })
    }

    /// Current state of the first (only) light behind `endpoint`.
    pub async fn get_state(&self, endpoint: &Endpoint) -> Result<LightState> {
        let payload: LightsPayload = self.get_json(endpoint, &endpoint.lights_url()).await?;

        payload
            .first()
            .ok_or_else(|| Error::device(format!("{} reported no lights", endpoint)))
    }

    /// Sends the full state, clamped to the device ranges. Returns what was
    /// sent.
    pub async fn put_state(&self, endpoint: &Endpoint, state: LightState) -> Result<LightState> {
        let payload = LightsPayload::single(state);

        tracing::debug!("PUT {} {:?}", endpoint, payload.lights);

        let response = self
            .http
            .put(endpoint.lights_url())
            .header(ORIGIN, "")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::network(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Error::status(endpoint, response.status()));
        }

        Ok(payload.lights[0])
    }

    pub async fn get_accessory_info(&self, endpoint: &Endpoint) -> Result<AccessoryInfo> {
        self.get_json(endpoint, &endpoint.accessory_info_url()).await
    }

    pub async fn put_display_name(&self, endpoint: &Endpoint, display_name: &str) -> Result<()> {
        tracing::debug!("PUT {} displayName={:?}", endpoint, display_name);

        let response = self
            .http
            .put(endpoint.accessory_info_url())
            .header(ORIGIN, "")
            .json(&DisplayNameUpdate {
                display_name: display_name.to_string(),
            })
            .send()
            .await
            .map_err(|e| Error::network(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Error::status(endpoint, response.status()));
        }

        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &Endpoint, url: &str) -> Result<T> {
        let mut attempt = 0;

        loop {
            match self.try_get_json(endpoint, url).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(
                        "GET {} failed ({}), retry {}/{}",
                        url,
                        e,
                        attempt,
                        self.retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get_json<T: DeserializeOwned>(&self, endpoint: &Endpoint, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header(ORIGIN, "")
            .send()
            .await
            .map_err(|e| Error::network(endpoint, e))?;

        if !response.status().is_success() {
            return Err(Error::status(endpoint, response.status()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(endpoint, e))?;

        Ok(serde_json::from_slice(&body)?)
    }
}
