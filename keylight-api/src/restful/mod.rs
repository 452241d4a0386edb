use std::fmt;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

/// Port every keylight serves its REST API on.
pub const DEFAULT_PORT: u16 = 9123;

pub const LIGHTS_PATH: &str = "/elgato/lights";

pub const ACCESSORY_INFO_PATH: &str = "/elgato/accessory-info";

/// mDNS service type keylights advertise themselves under.
pub const SERVICE_TYPE: &str = "_elg._tcp.local.";

/// Address of one light's REST API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(hostname: S, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{self}{path}")
    }

    pub fn lights_url(&self) -> String {
        self.url(LIGHTS_PATH)
    }

    pub fn accessory_info_url(&self) -> String {
        self.url(ACCESSORY_INFO_PATH)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.hostname, self.port)
        } else {
            write!(f, "{}:{}", self.hostname, self.port)
        }
    }
}
