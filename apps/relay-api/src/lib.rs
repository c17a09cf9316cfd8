pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::dispatcher::Dispatcher;
use identity::IdentityProvider;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity: Arc<dyn IdentityProvider>,
    pub dispatcher: Arc<Dispatcher>,
}
