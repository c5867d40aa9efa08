//! Shared fixtures: a recording push channel and a store harness that runs
//! triggers inline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use docstore::{
    BatchOp, CollectionPath, Document, DocumentChange, DocumentPath, DocumentStore, Fields,
    FieldTransform, MemoryStore, Query, StoreError, WriteBatch,
};
use fcm::{BatchResponse, FcmError, Messaging, MessagingErrorCode, MulticastMessage, SendResponse};
use parking_lot::Mutex;
use push_relay::config::NotifyConfig;
use push_relay::triggers::TriggerRouter;
use push_relay::{AppContext, build_trigger_router};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Push channel that records every multicast and answers from a script.
#[derive(Default)]
pub struct RecordingMessaging {
    calls: Mutex<Vec<MulticastMessage>>,
    token_errors: Mutex<HashMap<String, MessagingErrorCode>>,
    fail_calls: Mutex<bool>,
}

impl RecordingMessaging {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `code` for `token` on every send.
    pub fn fail_token(&self, token: &str, code: MessagingErrorCode) {
        self.token_errors.lock().insert(token.to_string(), code);
    }

    /// Make whole send calls fail before anything is delivered.
    pub fn fail_calls(&self, fail: bool) {
        *self.fail_calls.lock() = fail;
    }

    /// Successful calls, in order.
    pub fn calls(&self) -> Vec<MulticastMessage> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Messaging for RecordingMessaging {
    async fn send_each_for_multicast(
        &self,
        message: &MulticastMessage,
    ) -> fcm::Result<BatchResponse> {
        message.validate()?;
        if *self.fail_calls.lock() {
            return Err(FcmError::TokenExchange {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        self.calls.lock().push(message.clone());

        let errors = self.token_errors.lock();
        let responses = message
            .tokens
            .iter()
            .enumerate()
            .map(|(i, token)| match errors.get(token) {
                Some(code) => SendResponse::failure(*code, "scripted failure"),
                None => SendResponse::success(format!("projects/demo/messages/{}", i)),
            })
            .collect();
        Ok(BatchResponse::new(responses))
    }
}

/// Memory store that rejects any batch removing array elements, the way a
/// backend that is down would reject a token prune.
#[derive(Default)]
pub struct RejectArrayRemove {
    inner: MemoryStore,
}

#[async_trait]
impl DocumentStore for RejectArrayRemove {
    async fn get(&self, path: &DocumentPath) -> docstore::Result<Option<Document>> {
        self.inner.get(path).await
    }

    async fn list(&self, collection: &CollectionPath) -> docstore::Result<Vec<Document>> {
        self.inner.list(collection).await
    }

    async fn query(&self, query: &Query) -> docstore::Result<Vec<Document>> {
        self.inner.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> docstore::Result<()> {
        for op in batch.ops() {
            if let BatchOp::Update { path, updates, .. } = op
                && updates
                    .iter()
                    .any(|(_, t)| matches!(t, FieldTransform::ArrayRemove(_)))
            {
                return Err(StoreError::corrupt(path.as_str(), "write rejected"));
            }
        }
        self.inner.commit(batch).await
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.inner.subscribe()
    }
}

/// Memory store whose queries fail for collections under `prefix`.
pub struct RejectQueries {
    inner: MemoryStore,
    prefix: String,
}

impl RejectQueries {
    pub fn new(prefix: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for RejectQueries {
    async fn get(&self, path: &DocumentPath) -> docstore::Result<Option<Document>> {
        self.inner.get(path).await
    }

    async fn list(&self, collection: &CollectionPath) -> docstore::Result<Vec<Document>> {
        self.inner.list(collection).await
    }

    async fn query(&self, query: &Query) -> docstore::Result<Vec<Document>> {
        let collection = query.collection().as_str();
        if collection.starts_with(&self.prefix) {
            return Err(StoreError::corrupt(collection, "query rejected"));
        }
        self.inner.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> docstore::Result<()> {
        self.inner.commit(batch).await
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.inner.subscribe()
    }
}

/// Store, recording channel and router, with the change feed pumped by hand.
pub struct Harness {
    pub store: Arc<dyn DocumentStore>,
    pub messaging: Arc<RecordingMessaging>,
    pub ctx: AppContext,
    pub router: TriggerRouter,
    rx: broadcast::Receiver<DocumentChange>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), NotifyConfig::default())
    }

    pub fn with_config(config: NotifyConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn DocumentStore>, config: NotifyConfig) -> Self {
        let messaging = RecordingMessaging::new();
        let ctx = AppContext::new(store.clone(), messaging.clone(), config);
        let router = build_trigger_router(&ctx).expect("Failed to build trigger router");
        let rx = store.subscribe();
        Self {
            store,
            messaging,
            ctx,
            router,
            rx,
        }
    }

    /// Run triggers for every pending change, including changes the handlers
    /// themselves write, until the feed is drained.
    pub async fn settle(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(change) => {
                    self.router.handle_change(&change).await;
                    handled += 1;
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        handled
    }

    /// Drop pending changes without running triggers.
    pub fn discard_pending(&mut self) {
        while let Ok(_) | Err(TryRecvError::Lagged(_)) = self.rx.try_recv() {}
    }

    pub async fn put(&self, path: &str, value: Value) {
        self.store
            .set(&doc_path(path), fields(value), false)
            .await
            .expect("Failed to write document");
    }

    pub async fn fields_of(&self, path: &str) -> Fields {
        self.store
            .get(&doc_path(path))
            .await
            .expect("Failed to read document")
            .unwrap_or_else(|| panic!("{} does not exist", path))
            .fields
    }

    pub async fn list(&self, collection: &CollectionPath) -> Vec<docstore::Document> {
        self.store
            .list(collection)
            .await
            .expect("Failed to list collection")
    }

    pub async fn tokens_of(&self, path: &str) -> Vec<String> {
        match self.fields_of(path).await.get("fcmTokens") {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub fn doc_path(path: &str) -> DocumentPath {
    DocumentPath::parse(path).expect("Invalid document path")
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}
