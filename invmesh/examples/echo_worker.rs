//! Small invmesh worker.
//!
//! Start an inverted JSON-RPC broker on `localhost:8001`, run
//! `cargo run --example echo_worker` and call it through the gateway with
//! `{"id": 1, "method": "echo.greet", "params": {"name": "Ada"}}`.
//!
//! `echo.relay` shows a sub-call: it forwards its params to another service
//! named in `params.target`.

use invmesh::{EndpointError, FunctionMiddleware, Microservice, MicroserviceConfig, Request};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

#[derive(Deserialize)]
struct GreetRequest {
    name: String,
}

#[derive(Serialize)]
struct GreetResponse {
    greeting: String,
    sender: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invmesh=info,echo_worker=info".into()),
        )
        .init();

    let config = MicroserviceConfig::load("echo")?;

    let service = Microservice::builder(config)
        .middleware(FunctionMiddleware::new(
            |draft: &mut Value, _original: &Value, request: &Request| {
                if let Value::Object(params) = draft {
                    params.insert("method".into(), json!(request.method()));
                }
                Ok(())
            },
        ))
        .function("greet", |params, ctx| async move {
            let request: GreetRequest = serde_json::from_value(params)?;
            let response = GreetResponse {
                greeting: format!("Hello, {}!", request.name),
                sender: ctx.request.sender().map(str::to_string),
            };
            Ok::<_, EndpointError>(serde_json::to_value(response)?)
        })
        .function("relay", |params, ctx| async move {
            let Some(target) = params["target"].as_str().map(str::to_string) else {
                return Err(EndpointError::new("missing target").with_status(400));
            };
            let response = ctx.client.send_service_request(&target, params).await?;
            Ok(response.result().cloned().unwrap_or(Value::Null))
        })
        .function("log", |params, _ctx| async move {
            info!("log: {}", params);
            Ok(Value::Null)
        })
        .build()?;

    service.run().await?;
    Ok(())
}
