//! Broker address resolution.
//!
//! An address ending in [`DISCOVERY_SUFFIX`] names a DNS SRV record instead of
//! a host. It is expanded once, on first use, into `host:port` of the single
//! best record and cached for the rest of the process.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{InvMeshError, Result};

/// Marks an address that must be resolved through SRV records
pub const DISCOVERY_SUFFIX: &str = ".srv";

/// One SRV answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub name: String,
    pub port: u16,
}

/// SRV lookup backend
#[async_trait]
pub trait SrvLookup: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<Vec<SrvRecord>>;
}

/// Lookup through the system resolver configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSrvLookup;

#[async_trait]
impl SrvLookup for SystemSrvLookup {
    async fn lookup(&self, domain: &str) -> Result<Vec<SrvRecord>> {
        let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| InvMeshError::resolution_error(domain, e))?;
        let answer = resolver
            .srv_lookup(domain)
            .await
            .map_err(|e| InvMeshError::resolution_error(domain, e))?;

        Ok(answer
            .iter()
            .map(|srv| SrvRecord {
                priority: srv.priority(),
                weight: srv.weight(),
                name: srv.target().to_utf8(),
                port: srv.port(),
            })
            .collect())
    }
}

/// Expand `address` if it carries the discovery suffix, otherwise return it unchanged.
///
/// The record with the lowest `(priority, weight)` wins; ties keep the order
/// the lookup returned. There is no weighted selection.
pub async fn expand_srv(address: &str, lookup: &dyn SrvLookup) -> Result<String> {
    let Some(stripped) = address.strip_suffix(DISCOVERY_SUFFIX) else {
        return Ok(address.to_string());
    };

    let (scheme, domain) = match stripped.split_once("://") {
        Some((scheme, domain)) => (Some(scheme), domain),
        None => (None, stripped),
    };

    debug!("Resolving SRV records for {}", domain);
    let records = lookup.lookup(domain).await?;
    let best = records
        .iter()
        .min_by_key(|record| (record.priority, record.weight))
        .ok_or_else(|| InvMeshError::resolution_error(address, "no SRV records"))?;

    let host = best.name.trim_end_matches('.');
    Ok(match scheme {
        Some(scheme) => format!("{}://{}:{}", scheme, host, best.port),
        None => format!("{}:{}", host, best.port),
    })
}

/// Configured broker address, resolved lazily and memoized for the process lifetime
pub struct BrokerAddress {
    configured: String,
    lookup: Arc<dyn SrvLookup>,
    resolved: OnceCell<String>,
}

impl BrokerAddress {
    /// Address resolved through the system SRV lookup when needed
    pub fn new(configured: impl Into<String>) -> Self {
        Self::with_lookup(configured, Arc::new(SystemSrvLookup))
    }

    pub fn with_lookup(configured: impl Into<String>, lookup: Arc<dyn SrvLookup>) -> Self {
        Self {
            configured: configured.into(),
            lookup,
            resolved: OnceCell::new(),
        }
    }

    /// The address as configured, before any expansion
    pub fn configured(&self) -> &str {
        &self.configured
    }

    /// Resolved address. Failures are not cached; the next call retries.
    pub async fn get(&self) -> Result<&str> {
        let resolved = self
            .resolved
            .get_or_try_init(|| async {
                let resolved = expand_srv(&self.configured, self.lookup.as_ref()).await?;
                if resolved != self.configured {
                    info!("Broker address {} resolved to {}", self.configured, resolved);
                }
                Ok::<_, InvMeshError>(resolved)
            })
            .await?;
        Ok(resolved.as_str())
    }

    /// Join the resolved address with a broker path segment
    pub async fn url_for(&self, path: &str) -> Result<String> {
        let base = self.get().await?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), path))
    }
}

impl std::fmt::Debug for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAddress")
            .field("configured", &self.configured)
            .field("resolved", &self.resolved.get())
            .finish()
    }
}
