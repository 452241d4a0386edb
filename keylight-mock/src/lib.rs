//! A simulated keylight serving the device REST API over HTTP.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use keylight_api::{
    ACCESSORY_INFO_PATH, AccessoryInfo, DisplayNameUpdate, Endpoint, LIGHTS_PATH, LightState,
    LightsPayload,
};

use crate::error::MockError;
use crate::settings::Settings;

pub mod error;
pub mod settings;

#[derive(Debug)]
struct Device {
    state: LightState,
    info: AccessoryInfo,
    offline: bool,
    latency: Duration,
    /// Every state accepted through `PUT /elgato/lights`, oldest first
    history: Vec<LightState>,
}

type SharedDevice = Arc<RwLock<Device>>;

pub struct MockKeylight {
    address: SocketAddr,
    device: SharedDevice,
    server: JoinHandle<()>,
}

impl MockKeylight {
    /// Serves a light on an ephemeral loopback port.
    pub async fn spawn(info: AccessoryInfo, state: LightState) -> Result<Self, MockError> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), info, state).await
    }

    pub async fn bind(
        address: SocketAddr,
        info: AccessoryInfo,
        state: LightState,
    ) -> Result<Self, MockError> {
        let listener = TcpListener::bind(address).await?;
        let address = listener.local_addr()?;

        let device = Arc::new(RwLock::new(Device {
            state: state.clamped(),
            info,
            offline: false,
            latency: Duration::ZERO,
            history: Vec::new(),
        }));

        let app = create_app(device.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("mock keylight stopped: {}", e);
            }
        });

        tracing::debug!("mock keylight listening on {}", address);

        Ok(Self {
            address,
            device,
            server,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.ip().to_string(), self.address.port())
    }

    pub async fn state(&self) -> LightState {
        self.device.read().await.state
    }

    pub async fn set_state(&self, state: LightState) {
        self.device.write().await.state = state.clamped();
    }

    pub async fn info(&self) -> AccessoryInfo {
        self.device.read().await.info.clone()
    }

    pub async fn history(&self) -> Vec<LightState> {
        self.device.read().await.history.clone()
    }

    pub async fn clear_history(&self) {
        self.device.write().await.history.clear();
    }

    /// While offline every request is answered with `503 Service Unavailable`.
    pub async fn set_offline(&self, offline: bool) {
        self.device.write().await.offline = offline;
    }

    /// Delay applied before answering each request.
    pub async fn set_latency(&self, latency: Duration) {
        self.device.write().await.latency = latency;
    }
}

impl Drop for MockKeylight {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn create_app(device: SharedDevice) -> Router {
    Router::new()
        .route(LIGHTS_PATH, get(get_lights).put(put_lights))
        .route(
            ACCESSORY_INFO_PATH,
            get(get_accessory_info).put(put_accessory_info),
        )
        .with_state(device)
}

async fn gate(device: &SharedDevice) -> Result<(), StatusCode> {
    let latency = {
        let device = device.read().await;
        if device.offline {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        device.latency
    };

    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    Ok(())
}

async fn get_lights(State(device): State<SharedDevice>) -> Result<Json<LightsPayload>, StatusCode> {
    gate(&device).await?;

    let state = device.read().await.state;

    Ok(Json(LightsPayload::single(state)))
}

async fn put_lights(
    State(device): State<SharedDevice>,
    Json(payload): Json<LightsPayload>,
) -> Result<Json<LightsPayload>, StatusCode> {
    gate(&device).await?;

    let state = payload.first().ok_or(StatusCode::BAD_REQUEST)?.clamped();

    let mut device = device.write().await;
    device.state = state;
    device.history.push(state);

    tracing::debug!("accepted state: {:?}", state);

    Ok(Json(LightsPayload::single(state)))
}

async fn get_accessory_info(
    State(device): State<SharedDevice>,
) -> Result<Json<AccessoryInfo>, StatusCode> {
    gate(&device).await?;

    Ok(Json(device.read().await.info.clone()))
}

async fn put_accessory_info(
    State(device): State<SharedDevice>,
    Json(update): Json<DisplayNameUpdate>,
) -> Result<Json<AccessoryInfo>, StatusCode> {
    gate(&device).await?;

    let mut device = device.write().await;
    device.info.display_name = update.display_name;

    tracing::debug!("renamed to {}", device.info.display_name);

    Ok(Json(device.info.clone()))
}

/// Serves the light described by `settings` until interrupted.
pub async fn run(settings: &Arc<Settings>) -> Result<(), MockError> {
    let ip_addr = settings.server.host.parse::<IpAddr>()?;
    let address = SocketAddr::from((ip_addr, settings.server.port));

    let mock = MockKeylight::bind(
        address,
        settings.light.accessory_info(),
        settings.light.state(),
    )
    .await?;

    tracing::info!(
        "serving \"{}\" on {}",
        settings.light.display_name,
        mock.address()
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");

    Ok(())
}
