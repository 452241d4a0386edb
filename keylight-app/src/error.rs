use keylight_api::Endpoint;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure talking to a light
    #[error("Network error talking to {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// The light answered with a non-success status
    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    /// The light answered with something unusable
    #[error("Device error: {message}")]
    Device { message: String },

    #[error("Discovery error: {message}")]
    Discovery { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Light already registered: {0}")]
    Duplicate(String),

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("{0} is busy")]
    Busy(String),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn network(endpoint: &Endpoint, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            Self::Network {
                endpoint: endpoint.to_string(),
                source,
            }
        }
    }

    pub fn status(endpoint: &Endpoint, status: reqwest::StatusCode) -> Self {
        Self::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        }
    }

    pub fn device<S: Into<String>>(message: S) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    pub fn discovery<S: Into<String>>(message: S) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
