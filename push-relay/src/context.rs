//! Shared handles passed to every handler.

use std::sync::Arc;

use docstore::DocumentStore;
use fcm::Messaging;

use crate::config::NotifyConfig;

/// Store, push channel and settings, constructed once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn DocumentStore>,
    pub messaging: Arc<dyn Messaging>,
    pub config: NotifyConfig,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        messaging: Arc<dyn Messaging>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            store,
            messaging,
            config,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn messaging(&self) -> &dyn Messaging {
        self.messaging.as_ref()
    }
}
