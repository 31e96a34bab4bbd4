use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::envelope::{Request, Response, Route};
use crate::error::InvMeshError;
use crate::exception::{Branch, Exception, ExceptionProps, SERVICE_DOWN, SERVICE_REQUEST_FAILED};
use crate::resolver::BrokerAddress;
use crate::transport::{BrokerCall, BrokerTransport};

/// Client a worker uses to call other services through the broker
#[derive(Clone)]
pub struct ServiceClient {
    name: String,
    broker: Arc<BrokerAddress>,
    transport: Arc<dyn BrokerTransport>,
    timeout: Duration,
}

impl ServiceClient {
    /// Client tagging its calls as `<name> (srv)`, each bounded by `timeout`
    pub fn new(
        name: impl Into<String>,
        broker: Arc<BrokerAddress>,
        transport: Arc<dyn BrokerTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            broker,
            transport,
            timeout,
        }
    }

    /// Name of the calling service, used in the sender tag
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call `<service>.<endpoint>` and wait for its answer.
    ///
    /// An error embedded in the peer's response is re-raised as a
    /// microservice exception with the peer's code and status. Transport
    /// failures become status 4, or status 5 when the broker answers 404.
    pub async fn send_service_request(&self, method: &str, data: Value) -> Result<Response, Exception> {
        let (service, endpoint) = match Route::parse(method) {
            Some(route) => (route.service, route.endpoint),
            None => (String::new(), method.trim_start_matches('.').to_string()),
        };

        let id = Uuid::new_v4();
        let mut request = Request::new(endpoint).with_id(id).with_params(data);
        request.set_sender(format!("{} (srv)", self.name));

        info!("    --> Request ({} - {}): {}", service, id, request.to_wire());
        let started = Instant::now();

        let outcome = self.post(&service, &request).await;
        let elapsed = started.elapsed().as_millis();
        match &outcome {
            Ok(Some(body)) => info!("    <-- Response ({} - {}) {} ms: {}", service, id, elapsed, body),
            Ok(None) => info!("    <-- Response ({} - {}) {} ms: empty (async?).", service, id, elapsed),
            Err(e) => info!("    <-- Response ({} - {}) {} ms: {}", service, id, elapsed, e),
        }

        let body = outcome.map_err(|err| {
            let props = if err.is_not_found() {
                ExceptionProps::message(format!("Service \"{}\" is down.", service)).with_status(SERVICE_DOWN)
            } else {
                ExceptionProps::message(err.to_string()).with_status(SERVICE_REQUEST_FAILED)
            };
            Exception::microservice(props).with_cause(&err)
        })?;

        let Some(body) = body else {
            return Ok(Response::acknowledgment(Some(id.into())));
        };

        let response = Response::from_wire(body).map_err(|err| {
            Exception::microservice(ExceptionProps::message(err.to_string()).with_status(SERVICE_REQUEST_FAILED))
                .with_cause(&err)
        })?;

        match response.into_result() {
            Ok(Some(result)) => Ok(Response::success(Some(id.into()), result)),
            Ok(None) => Ok(Response::acknowledgment(Some(id.into()))),
            Err(error) => Err(Exception::from_error_object(Branch::Microservice, &error)),
        }
    }

    async fn post(&self, service: &str, request: &Request) -> Result<Option<Value>, InvMeshError> {
        let url = self.broker.url_for(service).await?;
        let call = BrokerCall::new(url)
            .with_body(Some(request.to_wire()))
            .with_timeout(Some(self.timeout));
        self.transport.post(call).await
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.name)
            .field("broker", &self.broker)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use serde_json::json;

    fn client(transport: Arc<ScriptedTransport>) -> ServiceClient {
        ServiceClient::new(
            "orders",
            Arc::new(BrokerAddress::new("http://broker:8001")),
            transport,
            Duration::from_secs(3),
        )
    }

    #[tokio::test]
    async fn test_builds_request_with_sender() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(Some(json!({
            "jsonrpc": "2.0",
            "result": {"charged": true}
        })))]));
        let response = client(transport.clone())
            .send_service_request("billing.charge", json!({"amount": 3}))
            .await
            .unwrap();

        assert_eq!(response.result(), Some(&json!({"charged": true})));
        assert!(response.id().is_some());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://broker:8001/billing");
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(3)));
        let body = calls[0].body.clone().unwrap();
        assert_eq!(body["method"], json!("charge"));
        assert_eq!(body["params"], json!({"amount": 3, "payload": {"sender": "orders (srv)"}}));
        assert_eq!(body["id"], json!(response.id().unwrap().to_string()));
    }

    #[tokio::test]
    async fn test_positional_params_are_sent_unchanged() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(Some(json!({"result": 6})))]));
        let response = client(transport.clone())
            .send_service_request("math.sum", json!([1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(response.result(), Some(&json!(6)));

        let body = transport.calls()[0].body.clone().unwrap();
        assert_eq!(body["method"], json!("sum"));
        assert_eq!(body["params"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_embedded_error_is_rethrown() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(Some(json!({
            "jsonrpc": "2.0",
            "error": {"code": 12, "status": 3, "service": "microservice", "message": "declined"}
        })))]));
        let err = client(transport)
            .send_service_request("billing.charge", Value::Null)
            .await
            .unwrap_err();

        assert_eq!(err.code(), 12);
        assert_eq!(err.status(), 3);
        assert_eq!(err.message(), "declined");
    }

    #[tokio::test]
    async fn test_not_found_means_service_down() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(InvMeshError::Status { status: 404, body: None }),
            Err(InvMeshError::Timeout { timeout_ms: 3000 }),
        ]));
        let client = client(transport);

        let down = client.send_service_request("billing.charge", Value::Null).await.unwrap_err();
        assert_eq!(down.status(), SERVICE_DOWN);
        assert_eq!(down.message(), "Service \"billing\" is down.");

        let failed = client.send_service_request("billing.charge", Value::Null).await.unwrap_err();
        assert_eq!(failed.status(), SERVICE_REQUEST_FAILED);
        assert_ne!(failed.status(), down.status());
    }

    #[tokio::test]
    async fn test_empty_body_is_acknowledgment() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(None)]));
        let response = client(transport)
            .send_service_request("audit.log", json!({}))
            .await
            .unwrap();
        assert!(response.is_acknowledgment());
    }
}
