//! Shared application state.

use std::sync::Arc;

use synckairos_core::SessionService;

use crate::ws::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(service: Arc<SessionService>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { service, registry }
    }
}
