use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod payments;
pub mod proxy;
pub mod state;

pub use error::ProxyError;
pub use proxy::{parse_or_raw, GatewayProxy, ProxyReply};
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::USER_AGENT,
            HeaderName::from_static("x-idempotency-key"),
        ]);

    Router::new()
        .merge(payments::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
