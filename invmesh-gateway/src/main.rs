use anyhow::Result;
use invmesh_gateway::{serve, shutdown_signal, Gateway, GatewayConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invmesh=info,invmesh_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::load()?;
    if config.services.is_empty() {
        tracing::warn!("No services configured, every call will be rejected");
    }

    let gateway = Gateway::builder(config).build()?;
    serve(gateway, shutdown_signal()).await
}
