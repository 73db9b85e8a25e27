pub mod config;
pub mod error;
pub mod gateway;
pub mod rooms;
pub mod routes;

use std::sync::Arc;

use config::Config;
use gateway::fanout::GatewayBroadcast;
use gateway::registry::ConnectionRegistry;
use rooms::membership::Membership;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub membership: Arc<Membership>,
    pub broadcast: Arc<GatewayBroadcast>,
}

impl AppState {
    /// Build fresh state. The lobby exists from the start.
    pub fn new(config: Config) -> Self {
        let registry = ConnectionRegistry::new();
        let membership = Membership::new(&config, registry.clone());
        membership.ensure_lobby();

        Self {
            config: Arc::new(config),
            registry,
            membership: Arc::new(membership),
            broadcast: Arc::new(GatewayBroadcast::new()),
        }
    }
}
