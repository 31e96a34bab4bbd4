use async_trait::async_trait;
use indexmap::IndexMap;
use invmesh::{Request, Response, Route};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::router::Gateway;

/// A client call as the gateway received it
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub request: Request,
    /// Value of the inbound `type` header, forwarded to the broker
    pub type_header: Option<String>,
}

impl Inbound {
    /// Call without a `type` header
    pub fn new(request: Request) -> Self {
        Self {
            request,
            type_header: None,
        }
    }

    /// Attach the inbound `type` header
    pub fn with_type(mut self, type_header: impl Into<String>) -> Self {
        self.type_header = Some(type_header.into());
        self
    }
}

/// What a service handler answers with
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Peer body relayed untouched, `None` for an empty body
    Relay(Option<Value>),
    /// Envelope produced by the gateway itself
    Envelope(Response),
}

impl Reply {
    /// HTTP body of the reply, `None` for an empty body
    pub fn into_body(self) -> Option<Value> {
        match self {
            Reply::Relay(body) => body,
            Reply::Envelope(response) => response.to_wire(),
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Envelope(response)
    }
}

/// Handles calls routed to one service.
///
/// The gateway's only extension point: the default [`ForwardingHandler`]
/// relays to the broker, custom handlers may answer locally or call
/// [`Gateway::forward`] themselves.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, gateway: &Gateway, inbound: Inbound, route: Route) -> Reply;
}

/// Relays the call to `<broker>/<service>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardingHandler;

#[async_trait]
impl ServiceHandler for ForwardingHandler {
    async fn handle(&self, gateway: &Gateway, inbound: Inbound, route: Route) -> Reply {
        match gateway.forward(inbound, &route).await {
            Ok(body) => Reply::Relay(body),
            Err(exception) => Response::failure(None, exception.to_error_object(&gateway.config().env)).into(),
        }
    }
}

/// Closure-based handler, see [`handler_fn`]
pub struct FnHandler<F> {
    handler: F,
}

/// Adapt a closure into a [`ServiceHandler`]. The closure does not see the
/// gateway; implement the trait directly when it needs to forward.
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F>
where
    F: Fn(Inbound, Route) -> Fut + Send + Sync,
    Fut: Future<Output = Reply> + Send,
{
    FnHandler { handler }
}

#[async_trait]
impl<F, Fut> ServiceHandler for FnHandler<F>
where
    F: Fn(Inbound, Route) -> Fut + Send + Sync,
    Fut: Future<Output = Reply> + Send,
{
    async fn handle(&self, _gateway: &Gateway, inbound: Inbound, route: Route) -> Reply {
        (self.handler)(inbound, route).await
    }
}

/// Service handlers by service name, in registration order
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: IndexMap<String, Arc<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the name
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        let name = name.into();
        if self.services.insert(name.clone(), handler).is_some() {
            warn!("Replaced handler for service: {}", name);
        } else {
            info!("Registered service: {}", name);
        }
    }

    /// Handler for a service, if registered
    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.services.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Unregister every service
    pub fn clear(&mut self) {
        self.services.clear();
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.services.keys()).finish()
    }
}
