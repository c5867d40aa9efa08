//! Routes committed document changes to handlers by path pattern.
//!
//! Each matching (event, handler) pair runs in its own task, mirroring a
//! platform that invokes one handler instance per event. Handler errors are
//! logged with the document path and bindings and then dropped.

use std::sync::Arc;

use async_trait::async_trait;
use docstore::{ChangeKind, DocumentChange, Fields, PathParams, PathPattern};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Which kinds of change fire a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TriggerKind {
    Create,
    Update,
    /// Any create, update or delete.
    Write,
    Delete,
}

impl TriggerKind {
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (Self::Write, _)
                | (Self::Create, ChangeKind::Created)
                | (Self::Update, ChangeKind::Updated)
                | (Self::Delete, ChangeKind::Deleted)
        )
    }
}

/// A change together with the bindings of the pattern that matched it.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub change: DocumentChange,
    pub params: PathParams,
}

impl TriggerEvent {
    pub fn param(&self, key: &str) -> Result<&str> {
        self.params.get(key).map(String::as_str).ok_or_else(|| {
            Error::validation(format!(
                "missing path parameter '{}' for {}",
                key, self.change.path
            ))
        })
    }

    pub fn before(&self) -> Option<&Fields> {
        self.change.before_fields()
    }

    pub fn after(&self) -> Option<&Fields> {
        self.change.after_fields()
    }
}

#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &TriggerEvent) -> Result<()>;
}

struct Route {
    pattern: PathPattern,
    kind: TriggerKind,
    handler: Arc<dyn TriggerHandler>,
}

/// Pattern-based fan-out from the change feed.
pub struct TriggerRouter {
    routes: Vec<Route>,
    tracker: TaskTracker,
}

impl Default for TriggerRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerRouter {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register `handler` for changes of `kind` on paths matching `pattern`.
    pub fn on(
        &mut self,
        pattern: &str,
        kind: TriggerKind,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<&mut Self> {
        let pattern = PathPattern::new(pattern)?;
        debug!(pattern = %pattern, kind = %kind, handler = handler.name(), "Registered trigger");
        self.routes.push(Route {
            pattern,
            kind,
            handler,
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn matching(&self, change: &DocumentChange) -> Vec<(Arc<dyn TriggerHandler>, TriggerEvent)> {
        let kind = change.kind();
        self.routes
            .iter()
            .filter(|route| route.kind.accepts(kind))
            .filter_map(|route| {
                route.pattern.matches(&change.path).map(|params| {
                    (
                        route.handler.clone(),
                        TriggerEvent {
                            change: change.clone(),
                            params,
                        },
                    )
                })
            })
            .collect()
    }

    /// Run every matching handler to completion, one after another.
    ///
    /// Returns the number of handlers invoked.
    pub async fn handle_change(&self, change: &DocumentChange) -> usize {
        let matched = self.matching(change);
        let count = matched.len();
        for (handler, event) in matched {
            run_handler(handler, event).await;
        }
        count
    }

    /// Spawn one task per matching handler.
    pub fn route(&self, change: &DocumentChange) -> usize {
        let matched = self.matching(change);
        let count = matched.len();
        for (handler, event) in matched {
            self.tracker.spawn(run_handler(handler, event));
        }
        count
    }

    /// Consume the change feed until cancelled, then wait for in-flight handlers.
    pub fn start(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<DocumentChange>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(routes = self.routes.len(), "Trigger router started");
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Trigger router shutting down");
                        break;
                    }
                    result = rx.recv() => {
                        match result {
                            Ok(change) => {
                                self.route(&change);
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Trigger router lagged behind the change feed");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Change feed closed");
                                break;
                            }
                        }
                    }
                }
            }
            self.tracker.close();
            self.tracker.wait().await;
            info!("Trigger router stopped");
        })
    }
}

async fn run_handler(handler: Arc<dyn TriggerHandler>, event: TriggerEvent) {
    if let Err(e) = handler.handle(&event).await {
        error!(
            handler = handler.name(),
            path = %event.change.path,
            params = ?event.params,
            error = %e,
            "Trigger handler failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use docstore::{DocumentStore, MemoryStore};
    use serde_json::json;

    struct Counter {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TriggerHandler for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(&self, event: &TriggerEvent) -> Result<()> {
            event.param("orgId")?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Other("boom".to_string()));
            }
            Ok(())
        }
    }

    fn counter(fail: bool) -> Arc<Counter> {
        Arc::new(Counter {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn kinds() {
        assert!(TriggerKind::Write.accepts(ChangeKind::Deleted));
        assert!(TriggerKind::Create.accepts(ChangeKind::Created));
        assert!(!TriggerKind::Create.accepts(ChangeKind::Updated));
        assert!(!TriggerKind::Update.accepts(ChangeKind::Deleted));
    }

    #[tokio::test]
    async fn routes_by_pattern_and_kind() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        let creates = counter(false);
        let updates = counter(true);
        let mut router = TriggerRouter::new();
        router
            .on("organizations/{orgId}/violations/{id}", TriggerKind::Create, creates.clone())
            .unwrap();
        router
            .on("organizations/{orgId}/violations/{id}", TriggerKind::Update, updates.clone())
            .unwrap();

        let path = docstore::DocumentPath::parse("organizations/o1/violations/v1").unwrap();
        let body = match json!({ "status": "reported" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        store.set(&path, body.clone(), false).await.unwrap();
        store.set(&path, body, true).await.unwrap();
        store
            .set(
                &docstore::DocumentPath::parse("organizations/o1").unwrap(),
                Fields::new(),
                false,
            )
            .await
            .unwrap();

        let mut handled = 0;
        while let Ok(change) = rx.try_recv() {
            handled += router.handle_change(&change).await;
        }

        assert_eq!(handled, 2);
        assert_eq!(creates.calls.load(Ordering::SeqCst), 1);
        // A failing handler is logged, not propagated.
        assert_eq!(updates.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_stops_on_cancel() {
        let store = MemoryStore::new();
        let router = Arc::new(TriggerRouter::new());
        let cancel = CancellationToken::new();
        let handle = router.start(store.subscribe(), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
