use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use invmesh::envelope::PROTOCOL_VERSION;
use invmesh::{Environment, Id};
use serde_json::{json, Map, Value};
use std::error::Error as StdError;
use thiserror::Error;
use tracing::error;

/// Failures the gateway cannot answer in-band
#[derive(Debug, Error)]
pub enum GatewayFault {
    /// The request body could not be read
    #[error(transparent)]
    Body(#[from] BytesRejection),

    /// The request body is not a JSON-RPC request
    #[error("invalid JSON-RPC request: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A service handler panicked
    #[error("service handler panicked: {0}")]
    Panicked(String),

    /// A service handler was cancelled before it answered
    #[error("service handler was cancelled: {0}")]
    Cancelled(String),
}

impl GatewayFault {
    fn status(&self) -> StatusCode {
        match self {
            GatewayFault::Body(rejection) => rejection.status(),
            GatewayFault::InvalidJson(_) => StatusCode::BAD_REQUEST,
            GatewayFault::Panicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayFault::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayFault::Body(_) => "entity.read.failed",
            GatewayFault::InvalidJson(_) => "entity.parse.failed",
            GatewayFault::Panicked(_) => "handler.panicked",
            GatewayFault::Cancelled(_) => "handler.cancelled",
        }
    }
}

/// HTTP error handler of the gateway.
///
/// Answers with an error envelope and an HTTP status of at least 400.
/// Outside production the error object also carries `stack`, `name` (the
/// canonical reason phrase) and `type`. The request id is echoed when the
/// body was parsed before the failure.
#[derive(Debug, Error)]
#[error("{fault}")]
pub struct GatewayError {
    #[source]
    fault: GatewayFault,
    env: Environment,
    id: Option<Id>,
}

impl GatewayError {
    /// Error reply for `fault`, with diagnostics depending on `env`
    pub fn new(fault: impl Into<GatewayFault>, env: &Environment) -> Self {
        Self {
            fault: fault.into(),
            env: env.clone(),
            id: None,
        }
    }

    /// Echo the id of the request that failed
    pub fn with_id(mut self, id: Option<Id>) -> Self {
        self.id = id;
        self
    }

    pub fn fault(&self) -> &GatewayFault {
        &self.fault
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// HTTP status of the reply; anything below 400 is reported as 500
    pub fn status(&self) -> StatusCode {
        let status = self.fault.status();
        if status.as_u16() < 400 {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            status
        }
    }

    fn error_object(&self) -> Value {
        let status = self.status();
        let mut error = Map::new();
        error.insert("status".into(), json!(status.as_u16()));
        error.insert("message".into(), json!(self.fault.to_string()));

        if !self.env.is_production() {
            error.insert("stack".into(), json!(stack(&self.fault)));
            error.insert("name".into(), json!(status.canonical_reason().unwrap_or("Unknown Error")));
            error.insert("type".into(), json!(self.fault.kind()));
        }
        Value::Object(error)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error!("Gateway error: {}", self);
        let mut body = Map::new();
        body.insert("jsonrpc".into(), json!(PROTOCOL_VERSION));
        if let Some(id) = &self.id {
            body.insert("id".into(), json!(id));
        }
        body.insert("error".into(), self.error_object());
        (self.status(), Json(Value::Object(body))).into_response()
    }
}

fn stack(err: &(dyn StdError + 'static)) -> String {
    let mut stack = format!("GatewayError: {}", err);
    let mut source = err.source();
    while let Some(inner) = source {
        stack.push_str("\n    caused by: ");
        stack.push_str(&inner.to_string());
        source = inner.source();
    }
    stack
}
