//! Shared HTTP adapter state.

use std::sync::Arc;

use crate::push::PushHub;
use crate::registry::Registry;

/// Handler state: the registry plus the SSE fan-out hub.
#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<Registry>,
    pub hub: Arc<PushHub>,
}

impl HttpState {
    pub fn new(registry: Arc<Registry>, hub: Arc<PushHub>) -> Self {
        Self { registry, hub }
    }
}
