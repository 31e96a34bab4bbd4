use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use invmesh::envelope::merge_overlay;
use invmesh::exception::{GATEWAY_FORWARD_FAILED, GATEWAY_NO_SERVICE, GATEWAY_SERVICE_DOWN, GATEWAY_UNKNOWN_SERVICE};
use invmesh::transport::TYPE_HEADER;
use invmesh::{
    BrokerAddress, BrokerCall, BrokerTransport, Exception, ExceptionProps, HttpTransport, InvMeshError, ProcessSlot,
    Request, Route, SlotClaim, SrvLookup, SystemSrvLookup,
};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayFault};
use crate::registry::{ForwardingHandler, Inbound, Reply, ServiceHandler, ServiceRegistry};

/// Sender tag the gateway writes on forwarded calls
pub const GATEWAY_SENDER: &str = "Gateway";
/// Sender tag of the base template forwarded calls are merged over
pub const INNER_SENDER: &str = "Gateway-Inner";

static GATEWAY_SLOT: ProcessSlot = ProcessSlot::new("gateway");

/// Gateway context shared by every inbound call.
///
/// Read-only once built: the router state holds it behind an `Arc`, and
/// calls never coordinate with each other. A process holds at most one
/// live gateway.
pub struct Gateway {
    config: GatewayConfig,
    services: ServiceRegistry,
    broker: Arc<BrokerAddress>,
    transport: Arc<dyn BrokerTransport>,
    _slot: SlotClaim,
}

impl Gateway {
    /// Start building the gateway described by `config`
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Registered services and their handlers
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Broker address, resolved on first use
    pub fn broker(&self) -> &BrokerAddress {
        &self.broker
    }

    /// Route a call to its service handler.
    ///
    /// A method without a service segment is rejected with status 1, an
    /// unregistered service with status 2. Neither reaches the broker.
    pub async fn handle_request(&self, inbound: Inbound) -> Reply {
        let Some(route) = inbound.request.route() else {
            return self.reject(GATEWAY_NO_SERVICE);
        };
        let Some(handler) = self.services.get(&route.service) else {
            debug!("No handler for service: {}", route.service);
            return self.reject(GATEWAY_UNKNOWN_SERVICE);
        };

        handler.handle(self, inbound, route).await
    }

    fn reject(&self, status: i64) -> Reply {
        let exception = Exception::gateway(ExceptionProps::message("Service not found.").with_status(status));
        invmesh::Response::failure(None, exception.to_error_object(&self.config.env)).into()
    }

    /// Forward a call to `<broker>/<service>` and return the broker's body.
    ///
    /// The forwarded envelope is the inbound body, with the service-local
    /// method and the gateway sender tag, merged over the
    /// `{params: {payload: {sender: "Gateway-Inner"}}}` template. A 404 from
    /// the broker means no worker polls the service (status 4); every other
    /// failure is status 3.
    pub async fn forward(&self, inbound: Inbound, route: &Route) -> Result<Option<Value>, Exception> {
        let Inbound {
            mut request,
            type_header,
        } = inbound;
        request.set_sender(GATEWAY_SENDER);
        request.set_method(route.endpoint.clone());

        let mut body = json!({"params": {"payload": {"sender": INNER_SENDER}}});
        merge_overlay(&mut body, request.to_wire());

        self.post(&route.service, body, type_header).await.map_err(|err| {
            warn!("Forwarding to {} failed: {}", route.service, err);
            let props = if err.is_not_found() {
                ExceptionProps::message(format!("Service \"{}\" is down.", route.service))
                    .with_status(GATEWAY_SERVICE_DOWN)
            } else {
                ExceptionProps::message(format!("{} ({})", err, route.service)).with_status(GATEWAY_FORWARD_FAILED)
            };
            Exception::gateway(props).with_cause(&err)
        })
    }

    async fn post(&self, service: &str, body: Value, type_header: Option<String>) -> Result<Option<Value>, InvMeshError> {
        let url = self.broker.url_for(service).await?;
        let mut call = BrokerCall::new(url)
            .with_body(Some(body))
            .with_timeout(Some(self.config.request_timeout));
        if let Some(value) = type_header {
            call = call.with_header(TYPE_HEADER, value);
        }
        self.transport.post(call).await
    }

    /// Availability line served on the info route
    pub fn info(&self) -> String {
        format!(
            "{} Gateway - Available. Version: {}",
            self.config.name, self.config.version
        )
    }

    /// axum router: POST on the configured endpoint, plus the optional GET
    /// info route
    pub fn router(self: &Arc<Self>) -> Router {
        let endpoint = self.config.endpoint.as_str();
        let mut router = Router::new();
        let mut rpc = post(handle_rpc);

        match self.config.info_route.as_deref() {
            Some(route) if route == endpoint => rpc = rpc.get(handle_info),
            Some(route) => router = router.route(route, get(handle_info)),
            None => {}
        }

        let env = self.config.env.clone();
        router
            .route(endpoint, rpc)
            .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
                GatewayError::new(GatewayFault::Panicked(panic_message(panic.as_ref())), &env).into_response()
            }))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(self))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("broker", &self.broker)
            .finish()
    }
}

async fn handle_rpc(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, GatewayError> {
    let env = &gateway.config.env;
    let body = body.map_err(|e| GatewayError::new(e, env))?;
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        Request::default()
    } else {
        serde_json::from_slice::<Request>(&body).map_err(|e| GatewayError::new(e, env))?
    };

    let request_id = request.id().cloned();
    let id = request_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "0".into());
    info!(
        "--> Request ({}) from {}: {}",
        id,
        request.sender().unwrap_or("Client"),
        request.to_wire()
    );
    let started = Instant::now();

    let mut inbound = Inbound::new(request);
    if let Some(value) = headers.get(TYPE_HEADER).and_then(|v| v.to_str().ok()) {
        inbound = inbound.with_type(value);
    }

    let task = Arc::clone(&gateway);
    let reply = match tokio::spawn(async move { task.handle_request(inbound).await }).await {
        Ok(reply) => reply.into_body(),
        Err(err) if err.is_panic() => {
            let fault = GatewayFault::Panicked(panic_message(err.into_panic().as_ref()));
            return Err(GatewayError::new(fault, env).with_id(request_id));
        }
        Err(err) => {
            return Err(GatewayError::new(GatewayFault::Cancelled(err.to_string()), env).with_id(request_id));
        }
    };
    let elapsed = started.elapsed().as_millis();

    Ok(match reply {
        Some(body) => {
            info!("<-- Response ({}) {} ms: {}.", id, elapsed, body);
            Json(body).into_response()
        }
        None => {
            info!("<-- Response ({}) {} ms: empty (async?).", id, elapsed);
            StatusCode::OK.into_response()
        }
    })
}

async fn handle_info(State(gateway): State<Arc<Gateway>>) -> String {
    gateway.info()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Builds the gateway of the process. Services listed in the config start
/// out registered with the [`ForwardingHandler`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    services: ServiceRegistry,
    transport: Option<Arc<dyn BrokerTransport>>,
    lookup: Option<Arc<dyn SrvLookup>>,
}

impl GatewayBuilder {
    /// Builder with every service of `config.services` forwarded
    pub fn new(config: GatewayConfig) -> Self {
        let mut services = ServiceRegistry::new();
        for name in &config.services {
            services.register(name.clone(), Arc::new(ForwardingHandler));
        }
        Self {
            config,
            services,
            transport: None,
            lookup: None,
        }
    }

    /// Forward calls for `name` to the broker
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.services.register(name, Arc::new(ForwardingHandler));
        self
    }

    /// Answer calls for `name` with a custom handler
    pub fn custom_service<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: ServiceHandler + 'static,
    {
        self.services.register(name, Arc::new(handler));
        self
    }

    /// Drop every registered service, including those from the config
    pub fn remove_all_services(mut self) -> Self {
        self.services.clear();
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

    /// Build the gateway of this process.
    ///
    /// Fails with a configuration error while another `Gateway` built in
    /// this process is still alive.
    pub fn build(self) -> invmesh::Result<Arc<Gateway>> {
        let slot = GATEWAY_SLOT.claim()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let lookup = self.lookup.unwrap_or_else(|| Arc::new(SystemSrvLookup));
        let broker = Arc::new(BrokerAddress::with_lookup(self.config.broker.clone(), lookup));

        info!(
            "Created gateway {} with services: {:?}",
            self.config.name, self.services
        );

        Ok(Arc::new(Gateway {
            config: self.config,
            services: self.services,
            broker,
            transport,
            _slot: slot,
        }))
    }
}
