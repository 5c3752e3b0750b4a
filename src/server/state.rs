//! Server Application State
//!
//! Shared state handed to every handler. Cache, event log and health are
//! read-only from here; all writes happen on the inbound reader path.

use std::sync::Arc;

use crate::bridge::{CorrelationBridge, EventLog, HealthMonitor, StateCache};
use crate::config::ApiConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    bridge: Arc<CorrelationBridge>,
    cache: Arc<StateCache>,
    events: Arc<EventLog>,
    health: Arc<HealthMonitor>,
    api: ApiConfig,
}

impl AppState {
    pub fn new(
        bridge: Arc<CorrelationBridge>,
        cache: Arc<StateCache>,
        events: Arc<EventLog>,
        health: Arc<HealthMonitor>,
        api: ApiConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                bridge,
                cache,
                events,
                health,
                api,
            }),
        }
    }

    pub fn bridge(&self) -> &CorrelationBridge {
        &self.inner.bridge
    }

    pub fn cache(&self) -> &StateCache {
        &self.inner.cache
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    pub fn api(&self) -> &ApiConfig {
        &self.inner.api
    }
}
