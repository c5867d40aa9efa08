//! Keeps a flat index field in sync with an array of objects.
//!
//! The reconciler's own write re-fires the trigger it listens on, so it only
//! writes when [`needs_reconciliation`] says the stored index is stale.

use std::sync::Arc;

use async_trait::async_trait;
use docstore::{DocumentPath, DocumentStore, Fields, Updates};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::triggers::{TriggerEvent, TriggerHandler};

/// Which array to read, which key to pull from each element, and where to
/// store the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub source_field: String,
    pub key_field: String,
    pub target_field: String,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            source_field: "vehicles".to_string(),
            key_field: "plate".to_string(),
            target_field: "vehicleLicensePlates".to_string(),
        }
    }
}

impl Projection {
    /// The derived index for `fields`: the string key of each source element,
    /// in order. Elements without a string key contribute nothing.
    pub fn project(&self, fields: &Fields) -> Vec<Value> {
        let Some(Value::Array(items)) = fields.get(&self.source_field) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| item.get(&self.key_field))
            .filter(|key| key.is_string())
            .cloned()
            .collect()
    }
}

/// Whether the stored index differs from the projection.
///
/// A missing stored field counts as an empty array; a stored value that is not
/// an array always needs rewriting.
pub fn needs_reconciliation(projected: &[Value], stored: Option<&Value>) -> bool {
    match stored {
        None => !projected.is_empty(),
        Some(Value::Array(stored)) => stored.as_slice() != projected,
        Some(_) => true,
    }
}

pub struct DenormalizationReconciler {
    store: Arc<dyn DocumentStore>,
    projection: Projection,
}

impl DenormalizationReconciler {
    pub fn new(store: Arc<dyn DocumentStore>, projection: Projection) -> Self {
        Self { store, projection }
    }

    /// Bring the index on `path` up to date with `after`. Returns whether a write
    /// was issued. A deleted document (`after` is `None`) needs nothing.
    pub async fn reconcile(&self, path: &DocumentPath, after: Option<&Fields>) -> Result<bool> {
        let Some(after) = after else {
            return Ok(false);
        };
        let projected = self.projection.project(after);
        if !needs_reconciliation(&projected, after.get(&self.projection.target_field)) {
            return Ok(false);
        }

        let count = projected.len();
        match self
            .store
            .update(
                path,
                Updates::new().set(self.projection.target_field.as_str(), Value::Array(projected)),
            )
            .await
        {
            Ok(()) => {
                info!(path = %path, count, field = %self.projection.target_field, "Rebuilt derived index");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(path = %path, "Document deleted before index rebuild");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TriggerHandler for DenormalizationReconciler {
    fn name(&self) -> &str {
        "denormalization"
    }

    async fn handle(&self, event: &TriggerEvent) -> Result<()> {
        self.reconcile(&event.change.path, event.after()).await?;
        Ok(())
    }
}
