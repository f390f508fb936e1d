use std::sync::Arc;

use handoff_core::TokenBroker;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Outstanding login endpoints. The only state that outlives a request.
    pub broker: Arc<TokenBroker>,
}
