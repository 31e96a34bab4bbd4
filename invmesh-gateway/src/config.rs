use invmesh::config::{load_options, DEFAULT_BROKER};
use invmesh::{Environment, Result};
use serde::Deserialize;
use std::time::Duration;

/// Gateway configuration with documented defaults
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default `Microservice Gateway`
    pub name: String,
    /// Default `1.0.0`
    pub version: String,
    /// Default `development`
    pub env: Environment,
    /// Path accepting JSON-RPC POSTs. Default `/`
    pub endpoint: String,
    /// Default 3000
    pub port: u16,
    /// Broker address, optionally a `.srv` discovery name
    pub broker: String,
    /// Timeout for one forwarded call. Default 15 seconds
    pub request_timeout: Duration,
    /// Path of the GET availability route, disabled by default
    pub info_route: Option<String>,
    /// Services forwarded by the default handler
    pub services: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "Microservice Gateway".to_string(),
            version: "1.0.0".to_string(),
            env: Environment::development(),
            endpoint: "/".to_string(),
            port: 3000,
            broker: DEFAULT_BROKER.to_string(),
            request_timeout: Duration::from_secs(15),
            info_route: None,
            services: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Apply every field set in `options`, keeping the current value otherwise
    pub fn merge(mut self, options: GatewayOptions) -> Self {
        if let Some(name) = options.name {
            self.name = name;
        }
        if let Some(version) = options.version {
            self.version = version;
        }
        if let Some(env) = options.env {
            self.env = env.into();
        }
        if let Some(endpoint) = options.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(port) = options.port {
            self.port = port;
        }
        if let Some(broker) = options.broker {
            self.broker = broker;
        }
        if let Some(ms) = options.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(route) = options.info_route {
            self.info_route = Some(route);
        }
        if let Some(services) = options.services {
            self.services = services;
        }
        self
    }

    /// Defaults overridden by `gateway.toml` and `INVMESH_GATEWAY_*` variables
    pub fn load() -> Result<Self> {
        let options: GatewayOptions = load_options("gateway", "INVMESH_GATEWAY")?;
        Ok(Self::default().merge(options))
    }
}

/// Partial gateway configuration, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayOptions {
    pub name: Option<String>,
    pub version: Option<String>,
    pub env: Option<String>,
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub broker: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub info_route: Option<String>,
    pub services: Option<Vec<String>>,
}
