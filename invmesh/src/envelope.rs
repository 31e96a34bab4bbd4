//! JSON-RPC shaped envelopes shared by the gateway, the broker and workers.
//!
//! A [`Request`] travels from a client through the gateway and the broker to a
//! worker; the matching [`Response`] travels back the same way. Absent fields
//! are omitted on the wire rather than emitted as `null`, and a response that
//! carries neither a result nor an error (a notification acknowledgment) has
//! no wire form at all.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;

use crate::error::Result;

/// Value of the `jsonrpc` marker on every envelope
pub const PROTOCOL_VERSION: &str = "2.0";

/// Call identifier. Present for calls expecting a reply, absent for notifications.
///
/// Any JSON number is accepted, floats and values above `i64::MAX` included,
/// and echoed back exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(Number),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => f.write_str(s),
        }
    }
}

impl From<i32> for Id {
    fn from(value: i32) -> Self {
        Id::Number(value.into())
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value.into())
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id::Number(value.into())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::String(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::String(value)
    }
}

impl From<uuid::Uuid> for Id {
    fn from(value: uuid::Uuid) -> Self {
        Id::String(value.to_string())
    }
}

/// Target of a request: `billing.charge` routes to service `billing`, endpoint `charge`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub endpoint: String,
}

impl Route {
    /// Split a method path on its first `.`. Returns `None` when the service
    /// segment is empty.
    pub fn parse(method: &str) -> Option<Self> {
        let (service, endpoint) = match method.split_once('.') {
            Some((service, endpoint)) => (service, endpoint),
            None => (method, ""),
        };

        if service.is_empty() {
            return None;
        }

        Some(Self {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

/// Request envelope
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    id: Option<Id>,
    method: String,
    params: Option<Value>,
}

#[derive(Deserialize)]
struct RequestWire {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

impl Request {
    /// Create a notification (no id) for a method
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// Set the call identifier
    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the call parameters. `null` is treated as absent.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = (!params.is_null()).then_some(params);
        self
    }

    /// Call identifier, `None` for a notification
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// Method path, e.g. `billing.charge`
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call parameters, `None` when absent
    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Replace the method path
    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    /// Resolve the service/endpoint this request targets
    pub fn route(&self) -> Option<Route> {
        Route::parse(&self.method)
    }

    /// Provenance marker stored at `params.payload.sender`
    pub fn sender(&self) -> Option<&str> {
        self.params
            .as_ref()?
            .get("payload")?
            .get("sender")?
            .as_str()
    }

    /// Overwrite `params.payload.sender`, creating the intermediate objects.
    ///
    /// Positional (array) or scalar params have nowhere to carry the tag and
    /// are left untouched.
    pub fn set_sender(&mut self, sender: impl Into<String>) {
        let params = self
            .params
            .get_or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(params) = params else {
            return;
        };

        let payload = params
            .entry("payload")
            .or_insert_with(|| Value::Object(Map::new()));
        if !payload.is_object() {
            *payload = Value::Object(Map::new());
        }
        if let Value::Object(payload) = payload {
            payload.insert("sender".to_string(), Value::String(sender.into()));
        }
    }

    /// Wire form with absent fields omitted
    pub fn to_wire(&self) -> Value {
        let mut json = Map::new();
        json.insert("jsonrpc".into(), Value::String(PROTOCOL_VERSION.into()));
        if let Some(id) = &self.id {
            json.insert("id".into(), id_to_value(id));
        }
        json.insert("method".into(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            json.insert("params".into(), params.clone());
        }
        Value::Object(json)
    }

    /// Decode from a JSON value. Missing or `null` fields become absent.
    pub fn from_wire(value: Value) -> Result<Self> {
        let wire: RequestWire = serde_json::from_value(value)?;
        Ok(wire.into())
    }

    /// Decode from raw body bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let wire: RequestWire = serde_json::from_slice(bytes)?;
        Ok(wire.into())
    }
}

impl From<RequestWire> for Request {
    fn from(wire: RequestWire) -> Self {
        Self {
            id: wire.id,
            method: wire.method.unwrap_or_default(),
            params: wire.params.filter(|p| !p.is_null()),
        }
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        RequestWire::deserialize(deserializer).map(Into::into)
    }
}

/// `error` member of a response.
///
/// The four protocol fields are always present on the wire; diagnostics
/// (stack, name, type, payload) ride in `extra` and are only attached outside
/// production.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorObject {
    /// Error member without diagnostics
    pub fn new(code: i64, status: i64, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            service: service.into(),
            message: message.into(),
            extra: Map::new(),
        }
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error: {}. Service: {}. Code: {} ({}).",
            self.message, self.service, self.code, self.status
        )
    }
}

/// What a completed call produced. Result and error can never coexist.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
    /// Notification acknowledgment: nothing to send back
    Acknowledged,
}

/// Response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    id: Option<Id>,
    outcome: Outcome,
}

#[derive(Deserialize)]
struct ResponseWire {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

impl Response {
    /// Successful response. A `null` result degrades to an acknowledgment.
    pub fn success(id: Option<Id>, result: Value) -> Self {
        let outcome = if result.is_null() {
            Outcome::Acknowledged
        } else {
            Outcome::Result(result)
        };
        Self { id, outcome }
    }

    /// Failed response carrying an error member
    pub fn failure(id: Option<Id>, error: ErrorObject) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Response with neither result nor error
    pub fn acknowledgment(id: Option<Id>) -> Self {
        Self {
            id,
            outcome: Outcome::Acknowledged,
        }
    }

    /// Identifier echoed from the request, if any
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// The result value, `None` for errors and acknowledgments
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            _ => None,
        }
    }

    /// The error member, if the call failed
    pub fn error(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_acknowledgment(&self) -> bool {
        matches!(self.outcome, Outcome::Acknowledged)
    }

    /// Split into the call result, or the embedded error
    pub fn into_result(self) -> std::result::Result<Option<Value>, ErrorObject> {
        match self.outcome {
            Outcome::Result(value) => Ok(Some(value)),
            Outcome::Acknowledged => Ok(None),
            Outcome::Error(error) => Err(error),
        }
    }

    /// Wire form. Acknowledgments have none.
    pub fn to_wire(&self) -> Option<Value> {
        let mut json = Map::new();
        json.insert("jsonrpc".into(), Value::String(PROTOCOL_VERSION.into()));
        if let Some(id) = &self.id {
            json.insert("id".into(), id_to_value(id));
        }
        match &self.outcome {
            Outcome::Result(result) => {
                json.insert("result".into(), result.clone());
            }
            Outcome::Error(error) => {
                json.insert("error".into(), serde_json::to_value(error).ok()?);
            }
            Outcome::Acknowledged => return None,
        }
        Some(Value::Object(json))
    }

    /// HTTP body bytes, or `None` for an empty body
    pub fn to_body(&self) -> Option<Vec<u8>> {
        self.to_wire().map(|json| json.to_string().into_bytes())
    }

    /// Parse a peer's JSON body. An error member wins over a result.
    pub fn from_wire(value: Value) -> Result<Self> {
        let wire: ResponseWire = serde_json::from_value(value)?;
        Ok(wire.into())
    }

    /// Parse a peer's body bytes. An empty body is an acknowledgment.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::acknowledgment(None));
        }
        let wire: ResponseWire = serde_json::from_slice(bytes)?;
        Ok(wire.into())
    }
}

impl From<ResponseWire> for Response {
    fn from(wire: ResponseWire) -> Self {
        match (wire.error, wire.result) {
            (Some(error), _) => Self::failure(wire.id, error),
            (None, Some(result)) => Self::success(wire.id, result),
            (None, None) => Self::acknowledgment(wire.id),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        ResponseWire::deserialize(deserializer).map(Into::into)
    }
}

/// Deep-merge `overlay` into `base`: objects merge key by key, anything else
/// replaces the base value.
pub fn merge_overlay(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_overlay(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn id_to_value(id: &Id) -> Value {
    match id {
        Id::Number(n) => Value::Number(n.clone()),
        Id::String(s) => Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let request = Request::new("a.b").with_id(1).with_params(json!({"x": 1}));
        let bytes = serde_json::to_vec(&request).unwrap();
        let decoded = Request::from_slice(&bytes).unwrap();

        assert_eq!(decoded.id(), Some(&Id::from(1)));
        assert_eq!(decoded.method(), "a.b");
        assert_eq!(decoded.params(), Some(&json!({"x": 1})));
    }

    #[test]
    fn test_request_omits_absent_fields() {
        let request = Request::new("test");
        assert_eq!(request.to_wire(), json!({"jsonrpc": "2.0", "method": "test"}));

        let request = Request::new("test").with_params(Value::Null);
        assert!(request.to_wire().get("params").is_none());
    }

    #[test]
    fn test_request_null_fields_decode_as_absent() {
        let request = Request::from_wire(json!({"id": null, "params": null})).unwrap();
        assert_eq!(request.id(), None);
        assert_eq!(request.method(), "");
        assert_eq!(request.params(), None);
    }

    #[test]
    fn test_route_parsing() {
        let route = Route::parse("billing.charge").unwrap();
        assert_eq!(route.service, "billing");
        assert_eq!(route.endpoint, "charge");

        let route = Route::parse("billing.invoices.list").unwrap();
        assert_eq!(route.endpoint, "invoices.list");

        let route = Route::parse("billing").unwrap();
        assert_eq!(route.endpoint, "");

        assert_eq!(Route::parse(""), None);
        assert_eq!(Route::parse(".charge"), None);
    }

    #[test]
    fn test_set_sender_creates_payload() {
        let mut request = Request::new("a.b");
        request.set_sender("Gateway");
        assert_eq!(request.sender(), Some("Gateway"));
        assert_eq!(request.params(), Some(&json!({"payload": {"sender": "Gateway"}})));

        let mut request = Request::new("a.b").with_params(json!({"x": 1, "payload": "junk"}));
        request.set_sender("Gateway");
        assert_eq!(
            request.params(),
            Some(&json!({"x": 1, "payload": {"sender": "Gateway"}}))
        );
    }

    #[test]
    fn test_set_sender_leaves_positional_params() {
        let mut request = Request::new("a.b").with_params(json!([1, 2, 3]));
        request.set_sender("Gateway");
        assert_eq!(request.params(), Some(&json!([1, 2, 3])));
        assert_eq!(request.sender(), None);

        let mut request = Request::new("a.b").with_params(json!("plain"));
        request.set_sender("Gateway");
        assert_eq!(request.to_wire()["params"], json!("plain"));
    }

    #[test]
    fn test_numeric_ids_echo_unchanged() {
        let request = Request::from_wire(json!({"id": 1.5, "method": "users.get"})).unwrap();
        assert_eq!(request.id().unwrap().to_string(), "1.5");
        assert_eq!(request.to_wire()["id"], json!(1.5));

        let request = Request::from_slice(br#"{"id": 18446744073709551615, "method": "users.get"}"#).unwrap();
        assert_eq!(request.id(), Some(&Id::from(u64::MAX)));

        let response = Response::success(request.id().cloned(), json!(true));
        assert_eq!(response.to_wire().unwrap()["id"], json!(u64::MAX));

        let response = Response::from_wire(json!({"id": -2.25, "result": 1})).unwrap();
        assert_eq!(response.to_wire().unwrap()["id"], json!(-2.25));
    }

    #[test]
    fn test_acknowledgment_has_no_body() {
        let response = Response::acknowledgment(Some(Id::from(3)));
        assert_eq!(response.to_wire(), None);
        assert_eq!(response.to_body(), None);

        let response = Response::success(None, Value::Null);
        assert!(response.is_acknowledgment());
    }

    #[test]
    fn test_result_response() {
        let response = Response::success(Some(1.into()), json!({"hello": "world"}));
        assert_eq!(
            response.to_wire(),
            Some(json!({"jsonrpc": "2.0", "id": 1, "result": {"hello": "world"}}))
        );
        assert_eq!(response.result(), Some(&json!({"hello": "world"})));
        assert!(response.error().is_none());
    }

    #[test]
    fn test_error_response() {
        let error = ErrorObject::new(5, 2, "gateway", "bad");
        let response = Response::failure(Some("abc".into()), error.clone());
        assert_eq!(
            response.to_wire(),
            Some(json!({
                "jsonrpc": "2.0",
                "id": "abc",
                "error": {"code": 5, "status": 2, "service": "gateway", "message": "bad"}
            }))
        );
        assert_eq!(response.error(), Some(&error));
    }

    #[test]
    fn test_response_decoding() {
        let response = Response::from_wire(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "error": {"message": "boom", "status": 4, "stack": "trace"}
        }))
        .unwrap();
        let error = response.error().unwrap();
        assert_eq!(error.message, "boom");
        assert_eq!(error.code, 0);
        assert_eq!(error.extra.get("stack"), Some(&json!("trace")));

        assert!(Response::from_slice(b"").unwrap().is_acknowledgment());
        assert!(Response::from_wire(json!({"id": 1})).unwrap().is_acknowledgment());
    }

    #[test]
    fn test_merge_overlay() {
        let mut base = json!({"params": {"payload": {"sender": "Gateway-Inner"}, "keep": true}});
        merge_overlay(
            &mut base,
            json!({"method": "charge", "params": {"payload": {"sender": "Gateway"}, "amount": 3}}),
        );
        assert_eq!(
            base,
            json!({
                "method": "charge",
                "params": {"payload": {"sender": "Gateway"}, "keep": true, "amount": 3}
            })
        );
    }
}
