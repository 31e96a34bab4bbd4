//! In-band exception taxonomy.
//!
//! Every failure that can still be answered with an envelope becomes an
//! [`Exception`] and rides in the `error` member of a [`Response`]. The
//! [`Branch`] fixes which side produced it and supplies per-field defaults.
//!
//! [`Response`]: crate::envelope::Response

use serde_json::{Map, Value};
use std::fmt;

use crate::config::Environment;
use crate::envelope::ErrorObject;

/// Gateway: no service name in the method
pub const GATEWAY_NO_SERVICE: i64 = 1;
/// Gateway: the service name is not registered
pub const GATEWAY_UNKNOWN_SERVICE: i64 = 2;
/// Gateway: forwarding to the broker failed
pub const GATEWAY_FORWARD_FAILED: i64 = 3;
/// Gateway: the broker has no consumer for the service (HTTP 404)
pub const GATEWAY_SERVICE_DOWN: i64 = 4;

/// Microservice: no endpoint registered for the method
pub const SERVICE_UNKNOWN_METHOD: i64 = 1;
/// Microservice: an endpoint handler failed
pub const SERVICE_ENDPOINT_FAILED: i64 = 2;
/// Microservice: an outbound sub-call failed
pub const SERVICE_REQUEST_FAILED: i64 = 4;
/// Microservice: the sub-call target is down (HTTP 404)
pub const SERVICE_DOWN: i64 = 5;

/// Which side of the protocol produced an exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Base,
    Gateway,
    Microservice,
}

impl Branch {
    /// Service tag written on every exception of the branch.
    ///
    /// Worker exceptions are tagged `"microservice"`, never with the worker's
    /// own name; callers identify the failing worker from the route they
    /// called. Only base exceptions take a `service` from [`ExceptionProps`].
    pub fn service(self) -> &'static str {
        match self {
            Branch::Base => "unknown",
            Branch::Gateway => "gateway",
            Branch::Microservice => "microservice",
        }
    }

    /// Code used when none is given
    pub fn default_code(self) -> i64 {
        match self {
            Branch::Base => 0,
            Branch::Gateway => 5,
            Branch::Microservice => 10,
        }
    }

    /// Message used when none (or an empty one) is given
    pub fn default_message(self) -> &'static str {
        match self {
            Branch::Base => "Undefined error.",
            Branch::Gateway => "Unknown gateway exception.",
            Branch::Microservice => "Unknown microservice exception.",
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            Branch::Base => "BaseException",
            Branch::Gateway => "GatewayException",
            Branch::Microservice => "MicroserviceException",
        }
    }
}

/// Partial input for building an exception. Unset (or zero/empty) fields
/// fall back to the branch defaults.
#[derive(Debug, Clone, Default)]
pub struct ExceptionProps {
    pub code: Option<i64>,
    pub status: Option<i64>,
    /// Only honoured on the base branch
    pub service: Option<String>,
    pub message: Option<String>,
    pub payload: Option<Value>,
}

impl ExceptionProps {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = (!payload.is_null()).then_some(payload);
        self
    }
}

/// Protocol level exception
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    branch: Branch,
    code: i64,
    status: i64,
    service: String,
    message: String,
    payload: Option<Value>,
    cause: Option<Cause>,
}

#[derive(Debug, Clone, PartialEq)]
struct Cause {
    type_name: String,
    chain: String,
}

impl Exception {
    pub fn new(branch: Branch, props: ExceptionProps) -> Self {
        let service = match branch {
            Branch::Base => props
                .service
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| branch.service().to_string()),
            _ => branch.service().to_string(),
        };

        Self {
            branch,
            code: props.code.filter(|c| *c != 0).unwrap_or(branch.default_code()),
            status: props.status.unwrap_or(0),
            service,
            message: props
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| branch.default_message().to_string()),
            payload: props.payload,
            cause: None,
        }
    }

    /// Exception with the base defaults (code 0, service `unknown`)
    pub fn base(props: ExceptionProps) -> Self {
        Self::new(Branch::Base, props)
    }

    /// Exception raised by the gateway (code 5)
    pub fn gateway(props: ExceptionProps) -> Self {
        Self::new(Branch::Gateway, props)
    }

    /// Exception raised by a worker (code 10)
    pub fn microservice(props: ExceptionProps) -> Self {
        Self::new(Branch::Microservice, props)
    }

    /// Rebuild an exception from a peer's error object, keeping its code,
    /// status and message but re-tagging it with `branch`.
    pub fn from_error_object(branch: Branch, error: &ErrorObject) -> Self {
        Self::new(
            branch,
            ExceptionProps {
                code: Some(error.code),
                status: Some(error.status),
                service: Some(error.service.clone()),
                message: Some(error.message.clone()),
                payload: error.extra.get("payload").cloned(),
            },
        )
    }

    /// Record the error that caused this exception for non-production diagnostics
    pub fn with_cause<E>(mut self, err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            chain.push_str("\n    caused by: ");
            chain.push_str(&inner.to_string());
            source = inner.source();
        }

        self.cause = Some(Cause {
            type_name: std::any::type_name::<E>().to_string(),
            chain,
        });
        self
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    /// Application error code
    pub fn code(&self) -> i64 {
        self.code
    }

    /// Protocol status, see the constants of this module
    pub fn status(&self) -> i64 {
        self.status
    }

    /// Service tag, usually [`Branch::service`]
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Extra data attached by the raiser, only sent outside production
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Wire form: exactly the four protocol fields in production, plus
    /// `stack`, `name`, `type` and `payload` everywhere else.
    pub fn to_error_object(&self, env: &Environment) -> ErrorObject {
        let mut error = ErrorObject::new(self.code, self.status, self.service.clone(), self.message.clone());
        if env.is_production() {
            return error;
        }

        let mut extra = Map::new();
        let stack = match &self.cause {
            Some(cause) => format!("{}: {}\n    caused by: {}", self.branch.type_name(), self.message, cause.chain),
            None => format!("{}: {}", self.branch.type_name(), self.message),
        };
        extra.insert("stack".into(), Value::String(stack));
        extra.insert("name".into(), Value::String(self.branch.type_name().into()));
        if let Some(cause) = &self.cause {
            extra.insert("type".into(), Value::String(cause.type_name.clone()));
        }
        if let Some(payload) = &self.payload {
            extra.insert("payload".into(), payload.clone());
        }
        error.extra = extra;
        error
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error: {}. Service: {}. Code: {} ({}).",
            self.message, self.service, self.code, self.status
        )
    }
}

impl std::error::Error for Exception {}
