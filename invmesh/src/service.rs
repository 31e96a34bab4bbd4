use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::client::ServiceClient;
use crate::config::MicroserviceConfig;
use crate::envelope::{Request, Response};
use crate::error::{InvMeshError, Result};
use crate::exception::{Exception, ExceptionProps};
use crate::instance::{ProcessSlot, SlotClaim};
use crate::resolver::{BrokerAddress, SrvLookup, SystemSrvLookup};
use crate::rpc::{Endpoint, EndpointContext, EndpointError, EndpointRegistry, Middleware};
use crate::transport::{BrokerCall, BrokerTransport, HttpTransport, TYPE_HEADER, WORKER_TYPE};

static MICROSERVICE_SLOT: ProcessSlot = ProcessSlot::new("microservice");

/// Pull-based worker.
///
/// The worker never accepts connections. It long-polls the broker at
/// `<broker>/<name>`, dispatches each task to its endpoint and sends the
/// response as the body of the next poll, so one HTTP exchange both answers
/// the previous task and fetches the next one. Tasks are handled strictly
/// one at a time.
///
/// Only one worker may be alive per process; see [`MicroserviceBuilder::build`].
pub struct Microservice {
    config: MicroserviceConfig,
    registry: EndpointRegistry,
    broker: Arc<BrokerAddress>,
    transport: Arc<dyn BrokerTransport>,
    client: ServiceClient,
    _slot: SlotClaim,
}

/// Result of one poll
#[derive(Debug)]
enum Incoming {
    Task(Request),
    /// The poll failed in a recoverable way; answered as an id-less error
    Fault(Exception),
}

impl Incoming {
    fn from_body(body: Option<Value>) -> Self {
        match body.map(Request::from_wire) {
            Some(Ok(task)) => Incoming::Task(task),
            Some(Err(err)) => Incoming::Fault(
                Exception::microservice(ExceptionProps::message(err.to_string())).with_cause(&err),
            ),
            None => Incoming::Fault(Exception::microservice(ExceptionProps::message(
                "Empty task received from broker",
            ))),
        }
    }
}

impl Microservice {
    /// Start building the worker described by `config`
    pub fn builder(config: MicroserviceConfig) -> MicroserviceBuilder {
        MicroserviceBuilder::new(config)
    }

    /// Service name, also the broker path the worker polls
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MicroserviceConfig {
        &self.config
    }

    /// Client for calling other services through the broker
    pub fn client(&self) -> ServiceClient {
        self.client.clone()
    }

    /// Run the poll → dispatch → reply loop.
    ///
    /// Only returns on a fatal fault: the first poll failing
    /// ([`InvMeshError::FirstPoll`]) or the broker resetting the connection
    /// ([`InvMeshError::PeerReset`]). Every other failure is answered in-band.
    pub async fn run(&self) -> Result<()> {
        info!(
            "{} microservice started. Version: {} ({})",
            self.config.name, self.config.version, self.config.env
        );

        let mut incoming = match self.poll(None).await {
            Ok(body) => Incoming::from_body(body),
            Err(err @ InvMeshError::PeerReset(_)) => {
                error!("First poll of {} failed: {}", self.config.name, err);
                return Err(err);
            }
            Err(err) => {
                error!("First poll of {} failed: {}", self.config.name, err);
                return Err(InvMeshError::FirstPoll(err.to_string()));
            }
        };

        loop {
            let started = Instant::now();
            let response = self.handle(incoming).await;

            match response.to_wire() {
                Some(body) => info!(
                    "<-- Response ({}) {} ms: {}",
                    display_id(&response),
                    started.elapsed().as_millis(),
                    body
                ),
                None => info!(
                    "<-- Response ({}) {} ms: empty (async?).",
                    display_id(&response),
                    started.elapsed().as_millis()
                ),
            }

            incoming = match self.poll(Some(&response)).await {
                Ok(body) => Incoming::from_body(body),
                Err(err) if err.is_fatal() => {
                    error!("Worker {} stopped: {}", self.config.name, err);
                    return Err(err);
                }
                Err(err) => Incoming::Fault(
                    Exception::microservice(ExceptionProps::message(err.to_string())).with_cause(&err),
                ),
            };
        }
    }

    /// One round trip to the broker: submit `reply` (if any) and fetch the next task
    async fn poll(&self, reply: Option<&Response>) -> Result<Option<Value>> {
        let url = self.broker.url_for(&self.config.name).await?;
        let call = BrokerCall::new(url)
            .with_body(reply.and_then(Response::to_wire))
            .with_header(TYPE_HEADER, WORKER_TYPE)
            .with_timeout(self.config.poll_timeout);
        self.transport.post(call).await
    }

    async fn handle(&self, incoming: Incoming) -> Response {
        let env = &self.config.env;
        let task = match incoming {
            Incoming::Task(task) => task,
            Incoming::Fault(exception) => {
                return Response::failure(None, exception.to_error_object(env));
            }
        };

        info!(
            "--> Request ({}) from {}: {}",
            task.id().map(ToString::to_string).unwrap_or_else(|| "0".into()),
            task.sender().unwrap_or("Client"),
            task.to_wire()
        );

        let id = task.id().cloned();
        match self.registry.dispatch(&task, self.client.clone()).await {
            Ok(result) => Response::success(id, result),
            Err(exception) => Response::failure(id, exception.to_error_object(env)),
        }
    }
}

impl std::fmt::Debug for Microservice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microservice")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("broker", &self.broker)
            .finish()
    }
}

fn display_id(response: &Response) -> String {
    response
        .id()
        .map(ToString::to_string)
        .unwrap_or_else(|| "0".into())
}

/// Collects endpoints, middleware and collaborators, then builds the single
/// [`Microservice`] of the process.
pub struct MicroserviceBuilder {
    config: MicroserviceConfig,
    registry: EndpointRegistry,
    transport: Option<Arc<dyn BrokerTransport>>,
    lookup: Option<Arc<dyn SrvLookup>>,
}

impl MicroserviceBuilder {
    /// Builder with no endpoints and the default HTTP transport
    pub fn new(config: MicroserviceConfig) -> Self {
        Self {
            config,
            registry: EndpointRegistry::new(),
            transport: None,
            lookup: None,
        }
    }

    /// Register an endpoint under its service-local method path
    pub fn endpoint<E>(mut self, path: impl Into<String>, endpoint: E) -> Self
    where
        E: Endpoint + 'static,
    {
        self.registry.register_endpoint(path, endpoint);
        self
    }

    /// Register a closure as an endpoint
    pub fn function<F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, EndpointContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, EndpointError>> + Send + 'static,
    {
        self.registry.register_function(path, handler);
        self
    }

    /// Append a middleware; middleware runs in registration order
    pub fn middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.registry.register_middleware(middleware);
        self
    }

    /// Replace the HTTP transport
    pub fn transport(mut self, transport: Arc<dyn BrokerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the SRV lookup used for `.srv` broker addresses
    pub fn srv_lookup(mut self, lookup: Arc<dyn SrvLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Build the worker of this process.
    ///
    /// Fails with [`InvMeshError::Config`] when the name is empty, or while
    /// another `Microservice` built in this process is still alive.
    pub fn build(self) -> Result<Microservice> {
        if self.config.name.is_empty() {
            return Err(InvMeshError::config_error("microservice name must not be empty"));
        }
        let slot = MICROSERVICE_SLOT.claim()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let lookup = self.lookup.unwrap_or_else(|| Arc::new(SystemSrvLookup));
        let broker = Arc::new(BrokerAddress::with_lookup(self.config.broker.clone(), lookup));
        let client = ServiceClient::new(
            self.config.name.clone(),
            broker.clone(),
            transport.clone(),
            self.config.request_timeout,
        );

        info!(
            "Created microservice {} with {} endpoints",
            self.config.name,
            self.registry.paths().count()
        );

        Ok(Microservice {
            config: self.config,
            registry: self.registry,
            broker,
            transport,
            client,
            _slot: slot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::exception::{SERVICE_ENDPOINT_FAILED, SERVICE_UNKNOWN_METHOD};
    use crate::test_support::ScriptedTransport;
    use serde_json::json;
    use std::time::Duration;

    fn worker(transport: Arc<ScriptedTransport>) -> Microservice {
        let mut config = MicroserviceConfig::new("billing");
        config.broker = "http://broker:8001".to_string();
        config.poll_timeout = Some(Duration::from_secs(30));

        Microservice::builder(config)
            .function("double", |params, _ctx| async move {
                let x = params["x"].as_i64().unwrap_or_default();
                Ok(json!({"x": x * 2}))
            })
            .function("fail", |_params, _ctx| async move {
                Err::<Value, _>(EndpointError::new("exploded"))
            })
            .transport(transport)
            .build()
            .unwrap()
    }

    fn task(id: i64, method: &str, params: Value) -> Value {
        Request::new(method).with_id(id).with_params(params).to_wire()
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_each_poll_carries_previous_reply() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(Some(task(1, "double", json!({"x": 1})))),
            Ok(Some(task(2, "double", json!({"x": 2})))),
            Ok(Some(task(3, "double", json!({"x": 3})))),
        ]));
        let err = worker(transport.clone()).run().await.unwrap_err();
        assert!(matches!(err, InvMeshError::PeerReset(_)));

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].body, None);
        for (n, call) in calls.iter().enumerate().skip(1) {
            let n = n as i64;
            assert_eq!(call.url, "http://broker:8001/billing");
            assert_eq!(
                call.body,
                Some(json!({"jsonrpc": "2.0", "id": n, "result": {"x": n * 2}}))
            );
        }
        assert!(calls
            .iter()
            .all(|c| c.headers == vec![("type".to_string(), "worker".to_string())]));
        assert!(calls.iter().all(|c| c.timeout == Some(Duration::from_secs(30))));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_first_poll_failure_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(InvMeshError::Transport(
            "connection refused".into(),
        ))]));
        let err = worker(transport.clone()).run().await.unwrap_err();
        assert!(matches!(err, InvMeshError::FirstPoll(_)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_later_transport_failure_is_replied_in_band() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(Some(task(1, "double", json!({"x": 1})))),
            Err(InvMeshError::Timeout { timeout_ms: 30_000 }),
        ]));
        worker(transport.clone()).run().await.unwrap_err();

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        let reply = calls[2].body.clone().unwrap();
        assert!(reply.get("id").is_none());
        assert_eq!(reply["error"]["service"], json!("microservice"));
        assert_eq!(reply["error"]["message"], json!("timeout of 30000ms exceeded"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_dispatch_errors_become_error_replies() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(Some(task(1, "fail", json!({})))),
            Ok(Some(task(2, "nope", json!({})))),
        ]));
        worker(transport.clone()).run().await.unwrap_err();

        let calls = transport.calls();
        let failed = calls[1].body.clone().unwrap();
        assert_eq!(failed["id"], json!(1));
        assert_eq!(failed["error"]["status"], json!(SERVICE_ENDPOINT_FAILED));
        assert_eq!(failed["error"]["message"], json!("Endpoint exception (fail): exploded"));
        assert!(failed["error"].get("stack").is_none());

        let unknown = calls[2].body.clone().unwrap();
        assert_eq!(unknown["id"], json!(2));
        assert_eq!(unknown["error"]["status"], json!(SERVICE_UNKNOWN_METHOD));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_diagnostics_outside_production() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(Some(task(1, "fail", json!({}))))]));
        let mut config = MicroserviceConfig::new("billing");
        config.env = Environment::development();
        let service = Microservice::builder(config)
            .function("fail", |_params, _ctx| async move {
                Err::<Value, _>(EndpointError::new("exploded"))
            })
            .transport(transport.clone())
            .build()
            .unwrap();
        service.run().await.unwrap_err();

        let reply = transport.calls()[1].body.clone().unwrap();
        assert_eq!(reply["error"]["name"], json!("MicroserviceException"));
        assert!(reply["error"]["stack"].as_str().unwrap().contains("exploded"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_notification_reply_has_no_body() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(Some(
            Request::new("log").to_wire(),
        ))]));
        let mut config = MicroserviceConfig::new("audit");
        config.broker = "http://broker:8001".to_string();
        let service = Microservice::builder(config)
            .function("log", |_params, _ctx| async move { Ok(Value::Null) })
            .transport(transport.clone())
            .build()
            .unwrap();
        service.run().await.unwrap_err();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].body, None);
    }

    #[test]
    #[serial_test::serial]
    fn test_empty_name_is_rejected() {
        let result = Microservice::builder(MicroserviceConfig::new(""))
            .transport(Arc::new(ScriptedTransport::default()))
            .build();
        assert!(matches!(result, Err(InvMeshError::Config(_))));
    }

    #[test]
    #[serial_test::serial]
    fn test_one_worker_per_process() {
        let first = worker(Arc::new(ScriptedTransport::default()));

        let second = Microservice::builder(MicroserviceConfig::new("ledger"))
            .transport(Arc::new(ScriptedTransport::default()))
            .build();
        match second {
            Err(InvMeshError::Config(message)) => assert!(message.contains("already running")),
            other => panic!("second worker was built: {:?}", other.map(|s| s.name().to_string())),
        }

        drop(first);
        let again = Microservice::builder(MicroserviceConfig::new("ledger"))
            .transport(Arc::new(ScriptedTransport::default()))
            .build()
            .unwrap();
        assert_eq!(again.name(), "ledger");
    }
}
