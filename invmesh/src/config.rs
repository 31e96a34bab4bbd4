use config::{Config, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Default broker address for both peers
pub const DEFAULT_BROKER: &str = "http://localhost:8001";

/// Deployment environment tag. Anything other than `production` exposes
/// diagnostic fields on error responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn production() -> Self {
        Self("production".to_string())
    }

    pub fn development() -> Self {
        Self("development".to_string())
    }

    /// Whether diagnostics must be hidden from error replies
    pub fn is_production(&self) -> bool {
        self.0 == "production"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Environment {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Environment {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read a partial options struct from an optional `<file>.toml` (or any
/// format the `config` crate recognises) and `<PREFIX>_*` environment
/// variables. Nested keys use `__` as separator.
pub fn load_options<T: DeserializeOwned>(file: &str, env_prefix: &str) -> Result<T> {
    let settings = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Worker configuration with documented defaults
#[derive(Debug, Clone)]
pub struct MicroserviceConfig {
    /// Worker name, also the broker path the worker polls
    pub name: String,
    /// Version reported at startup. Default `1.0.0`
    pub version: String,
    /// Default `production`
    pub env: Environment,
    /// Broker address, optionally a `.srv` discovery name. Default `http://localhost:8001`
    pub broker: String,
    /// Timeout for outbound sub-calls. Default 5 minutes
    pub request_timeout: Duration,
    /// Timeout for a single poll. Default none, polls block until the broker has work
    pub poll_timeout: Option<Duration>,
}

impl MicroserviceConfig {
    /// Defaults for a worker called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            env: Environment::production(),
            broker: DEFAULT_BROKER.to_string(),
            request_timeout: Duration::from_secs(5 * 60),
            poll_timeout: None,
        }
    }

    /// Apply every field set in `options`, keeping the current value otherwise
    pub fn merge(mut self, options: MicroserviceOptions) -> Self {
        if let Some(name) = options.name {
            self.name = name;
        }
        if let Some(version) = options.version {
            self.version = version;
        }
        if let Some(env) = options.env {
            self.env = env.into();
        }
        if let Some(broker) = options.broker {
            self.broker = broker;
        }
        if let Some(ms) = options.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = options.poll_timeout_ms {
            self.poll_timeout = Some(Duration::from_millis(ms));
        }
        self
    }

    /// Defaults overridden by `microservice.toml` and `INVMESH_SERVICE_*` variables
    pub fn load(name: impl Into<String>) -> Result<Self> {
        let options: MicroserviceOptions = load_options("microservice", "INVMESH_SERVICE")?;
        Ok(Self::new(name).merge(options))
    }
}

/// Partial worker configuration, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MicroserviceOptions {
    pub name: Option<String>,
    pub version: Option<String>,
    pub env: Option<String>,
    pub broker: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
}
