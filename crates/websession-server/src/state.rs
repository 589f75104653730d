//! Application state shared across handlers.

use std::sync::Arc;

use websession::SessionGateway;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Gateway binding each request to its replicated session.
    pub gateway: Arc<SessionGateway>,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(gateway: SessionGateway, config: ServerConfig) -> Self {
        Self {
            gateway: Arc::new(gateway),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SessionGateway {
        &self.gateway
    }
}
