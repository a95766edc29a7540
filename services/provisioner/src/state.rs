//! Application state shared across request handlers.

use std::sync::Arc;

use crate::flow::FlowManager;
use crate::store::StackStore;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn StackStore>,
    flows: Arc<FlowManager>,
}

impl AppState {
    pub fn new(store: Arc<dyn StackStore>, flows: Arc<FlowManager>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { store, flows }),
        }
    }

    pub fn store(&self) -> &dyn StackStore {
        self.inner.store.as_ref()
    }

    pub fn flows(&self) -> &FlowManager {
        &self.inner.flows
    }
}
