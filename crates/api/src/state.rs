//! Shared application state

use std::sync::Arc;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::store::{MessageStore, UserDirectory};
use crate::unread::UnreadAggregator;
use crate::websocket::PresenceRegistry;

/// Everything handlers need, cloned per request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub registry: Arc<PresenceRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub unread: Arc<UnreadAggregator>,
    pub jwt: Arc<JwtManager>,
}

impl AppState {
    /// Wire the components around a single backend that serves both the
    /// Message Store and the user directory.
    pub fn new<S>(config: Config, backend: Arc<S>) -> Self
    where
        S: MessageStore + UserDirectory + 'static,
    {
        let store: Arc<dyn MessageStore> = backend.clone();
        let directory: Arc<dyn UserDirectory> = backend;
        let registry = Arc::new(PresenceRegistry::new());

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            directory.clone(),
            registry.clone(),
            config.max_message_chars,
        ));
        let unread = Arc::new(UnreadAggregator::new(store.clone(), directory.clone()));
        let jwt = Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours));

        Self {
            config: Arc::new(config),
            store,
            directory,
            registry,
            dispatcher,
            unread,
            jwt,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt.clone(),
            directory: self.directory.clone(),
        }
    }
}
