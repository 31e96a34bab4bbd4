//! # invmesh - Inverted JSON-RPC Microservices
//!
//! invmesh workers never listen on a port. Each worker long-polls an
//! inverted JSON-RPC broker at `<broker>/<name>`, handles the task it gets
//! back and sends the response as the body of its next poll. A companion
//! gateway (the `invmesh-gateway` crate) accepts client calls and forwards
//! them to the broker by service name.
//!
//! A process runs at most one live [`Microservice`]: building a second one
//! while the first is alive fails with a configuration error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invmesh::{Microservice, MicroserviceConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MicroserviceConfig::load("users")?;
//!
//!     let service = Microservice::builder(config)
//!         .function("get", |params, _ctx| async move {
//!             let id = params["id"].as_u64().unwrap_or_default();
//!             Ok(json!({"id": id, "name": format!("User {}", id)}))
//!         })
//!         .build()?;
//!
//!     service.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod exception;
pub mod instance;
pub mod resolver;
pub mod rpc;
pub mod service;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::ServiceClient;
pub use config::{Environment, MicroserviceConfig, MicroserviceOptions};
pub use envelope::{ErrorObject, Id, Outcome, Request, Response, Route};
pub use error::{InvMeshError, Result};
pub use exception::{Branch, Exception, ExceptionProps};
pub use instance::{ProcessSlot, SlotClaim};
pub use resolver::{BrokerAddress, SrvLookup, SystemSrvLookup};
pub use rpc::{Endpoint, EndpointContext, EndpointError, FunctionMiddleware, Middleware};
pub use service::{Microservice, MicroserviceBuilder};
pub use transport::{BrokerCall, BrokerTransport, HttpTransport};
