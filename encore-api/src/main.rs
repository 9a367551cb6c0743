use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use encore_api::{app, AppState, GatewayProxy};
use encore_store::app_config::Config;
use encore_store::HttpGatewayTransport;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encore_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Encore payment proxy on port {}", config.server.port);

    let credential = config.gateway.credential();
    if credential.is_none() {
        tracing::warn!("Gateway access token not set; payment endpoints will answer 500");
    }

    let transport = HttpGatewayTransport::new(
        &config.gateway.base_url,
        Duration::from_secs(config.gateway.timeout_seconds),
    )
    .expect("Failed to build gateway client");

    let app_state = AppState {
        proxy: Arc::new(GatewayProxy::new(Arc::new(transport), credential)),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
