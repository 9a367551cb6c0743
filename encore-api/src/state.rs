use std::sync::Arc;

use crate::proxy::GatewayProxy;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<GatewayProxy>,
}
