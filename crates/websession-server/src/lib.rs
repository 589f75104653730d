//! axum integration for replicated web sessions.
//!
//! Every request behind [`session_middleware`] is bound to a session kept
//! in the shared cache, so a client can move between nodes without losing
//! its session state. Handlers read and change the session through the
//! [`WebSession`] extractor.
//!
//! # Example
//!
//! ```ignore
//! use websession_server::{AppState, LocalContainer, Server, ServerConfig};
//!
//! let container = Arc::new(LocalContainer::new(config.default_max_inactive_secs));
//! let gateway = SessionGateway::new(store, container, GatewayConfig::default())?;
//!
//! Server::new(AppState::new(gateway, config)).run().await?;
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod routes;
pub mod session;
pub mod state;

pub use config::ServerConfig;
pub use container::LocalContainer;
pub use error::{Result, ServerError, SessionLayerError};
pub use routes::{CounterResponse, HealthResponse, SessionView};
pub use session::{WebSession, session_middleware};
pub use state::AppState;

use std::net::SocketAddr;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The session demo HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(self.session_routes())
            .merge(routes::health_routes());

        let router = if self.state.config().request_logging {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        };

        router.with_state(self.state.clone())
    }

    /// Wrap the session routes with the session middleware.
    fn session_routes(&self) -> Router<AppState> {
        routes::session_routes().layer(middleware::from_fn_with_state(
            self.state.clone(),
            session::session_middleware,
        ))
    }

    /// Run the server on the configured address.
    pub async fn run(self) -> Result<()> {
        let addr = self.bind_address();
        self.run_on(addr).await
    }

    /// Run the server on a specific address.
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(addr = %addr, "Serving web sessions");
        axum::serve(listener, router).await?;

        Ok(())
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.state.config().bind_address
    }
}
