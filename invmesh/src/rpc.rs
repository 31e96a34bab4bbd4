use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::ServiceClient;
use crate::envelope::Request;
use crate::error::InvMeshError;
use crate::exception::{Exception, ExceptionProps, SERVICE_ENDPOINT_FAILED, SERVICE_UNKNOWN_METHOD};

/// Error returned by endpoint handlers and middleware.
///
/// `code`, `status` and `payload` pass through to the reply when set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointError {
    pub message: String,
    pub code: Option<i64>,
    pub status: Option<i64>,
    pub payload: Option<Value>,
}

impl EndpointError {
    /// Error with the default code and status of an endpoint failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Override the reply status (default 2)
    pub fn with_status(mut self, status: i64) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EndpointError {}

/// Sub-call failures keep their code and status when a handler propagates them with `?`
impl From<Exception> for EndpointError {
    fn from(exception: Exception) -> Self {
        Self {
            message: exception.message().to_string(),
            code: Some(exception.code()),
            status: Some(exception.status()),
            payload: exception.payload().cloned(),
        }
    }
}

impl From<InvMeshError> for EndpointError {
    fn from(err: InvMeshError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for EndpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<anyhow::Error> for EndpointError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// What a handler sees besides its parameters
#[derive(Debug, Clone)]
pub struct EndpointContext {
    /// The task as received from the broker
    pub request: Request,
    /// Client for calling other services through the broker
    pub client: ServiceClient,
}

/// Endpoint handler
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle(&self, params: Value, ctx: EndpointContext) -> Result<Value, EndpointError>;
}

/// Closure-based endpoint
pub struct FunctionEndpoint<F> {
    handler: F,
}

impl<F> FunctionEndpoint<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Endpoint for FunctionEndpoint<F>
where
    F: Fn(Value, EndpointContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EndpointError>> + Send,
{
    async fn handle(&self, params: Value, ctx: EndpointContext) -> Result<Value, EndpointError> {
        (self.handler)(params, ctx).await
    }
}

/// Request middleware. Mutates `draft` in place; `original` holds the params
/// as received.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn apply(&self, draft: &mut Value, original: &Value, request: &Request) -> Result<(), EndpointError>;
}

/// Synchronous closure-based middleware
pub struct FunctionMiddleware<F> {
    middleware: F,
}

impl<F> FunctionMiddleware<F> {
    pub fn new(middleware: F) -> Self {
        Self { middleware }
    }
}

#[async_trait]
impl<F> Middleware for FunctionMiddleware<F>
where
    F: Fn(&mut Value, &Value, &Request) -> Result<(), EndpointError> + Send + Sync,
{
    async fn apply(&self, draft: &mut Value, original: &Value, request: &Request) -> Result<(), EndpointError> {
        (self.middleware)(draft, original, request)
    }
}

/// Endpoint handlers keyed by method path, plus middleware in registration order
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: IndexMap<String, Arc<dyn Endpoint>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint, replacing any previous handler for the path
    pub fn register_endpoint<E>(&mut self, path: impl Into<String>, endpoint: E)
    where
        E: Endpoint + 'static,
    {
        let path = path.into();
        if self.endpoints.insert(path.clone(), Arc::new(endpoint)).is_some() {
            warn!("Replaced endpoint handler for method: {}", path);
        } else {
            info!("Registered endpoint handler for method: {}", path);
        }
    }

    /// Register a closure as an endpoint
    pub fn register_function<F, Fut>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(Value, EndpointContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, EndpointError>> + Send + 'static,
    {
        self.register_endpoint(path, FunctionEndpoint::new(handler));
    }

    /// Append a middleware to the chain
    pub fn register_middleware<M>(&mut self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
    }

    /// Whether an endpoint is registered for `path`
    pub fn contains(&self, path: &str) -> bool {
        self.endpoints.contains_key(path)
    }

    /// Registered method paths in registration order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Run middleware and the endpoint for a task. Every failure comes back
    /// as a microservice exception; nothing here can abort the worker.
    pub async fn dispatch(&self, task: &Request, client: ServiceClient) -> Result<Value, Exception> {
        let method = task.method();
        let Some(endpoint) = self.endpoints.get(method).cloned() else {
            warn!("No handler found for method: {}", method);
            return Err(Exception::microservice(
                ExceptionProps::message(format!("Unknown method: {}", method)).with_status(SERVICE_UNKNOWN_METHOD),
            ));
        };

        debug!("Dispatching {}", method);
        let original = task
            .params()
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let outcome = self.run_chain(endpoint.as_ref(), original, task, client).await;

        outcome.map_err(|e| {
            error!("Handler error for {}: {}", method, e.message);
            let mut props = ExceptionProps::message(format!("Endpoint exception ({}): {}", method, e.message))
                .with_status(e.status.unwrap_or(SERVICE_ENDPOINT_FAILED));
            props.code = e.code;
            props.payload = e.payload.clone();
            Exception::microservice(props).with_cause(&e)
        })
    }

    async fn run_chain(
        &self,
        endpoint: &dyn Endpoint,
        original: Value,
        task: &Request,
        client: ServiceClient,
    ) -> Result<Value, EndpointError> {
        let mut draft = original.clone();
        for middleware in &self.middleware {
            middleware.apply(&mut draft, &original, task).await?;
        }

        let ctx = EndpointContext {
            request: task.clone(),
            client,
        };
        endpoint.handle(draft, ctx).await
    }
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}
