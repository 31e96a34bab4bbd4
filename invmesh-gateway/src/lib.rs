//! # invmesh Gateway
//!
//! HTTP front door of an invmesh deployment. Clients POST JSON-RPC requests
//! whose method reads `<service>.<endpoint>`; the gateway forwards each call
//! to the inverted JSON-RPC broker at `<broker>/<service>`, where a worker
//! polling for that service picks it up.
//!
//! ## How It Works
//!
//! ```text
//! Client -> HTTP -> Gateway -> Broker <- poll <- Microservice
//!                                 |                  |
//!                       reply  <- Broker <- next poll carries the reply
//! ```
//!
//! Routing errors and forwarding failures are answered in-band with an
//! `error` member and HTTP 200. Only unreadable bodies and handler panics
//! reach the HTTP error handler ([`GatewayError`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use invmesh_gateway::{serve, shutdown_signal, Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::builder(GatewayConfig::default())
//!         .service("users")
//!         .service("billing")
//!         .build()?;
//!
//!     serve(gateway, shutdown_signal()).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;

pub use config::{GatewayConfig, GatewayOptions};
pub use error::{GatewayError, GatewayFault};
pub use registry::{handler_fn, ForwardingHandler, Inbound, Reply, ServiceHandler, ServiceRegistry};
pub use router::{Gateway, GatewayBuilder};
pub use server::{serve, shutdown_signal};
