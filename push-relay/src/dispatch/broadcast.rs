//! Property-wide broadcasts.
//!
//! A broadcast record is not marked `sent`: it is a property-level artifact and
//! its delivery is spread across independent chunks, so there is no single
//! point at which it was "sent". Single-recipient records do get marked.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fcm::{BatchResponse, MAX_MULTICAST_TOKENS, MulticastMessage};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::payload::build_message;
use super::reconcile::classify_failures;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::models::{NotificationRecord, RecipientProfile};
use crate::registry::prune_tokens;
use crate::scope::{RecipientScope, residents_collection};
use crate::triggers::{TriggerEvent, TriggerHandler};

/// Summary of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Residents with at least one token.
    pub recipients: usize,
    pub token_count: usize,
    /// Multicast calls issued.
    pub chunks: usize,
    /// Chunks whose send call failed as a whole.
    pub failed_chunks: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Pruned tokens per resident id.
    pub pruned: BTreeMap<String, Vec<String>>,
}

/// Fans a property notification out to every resident of the property.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    ctx: AppContext,
}

impl BroadcastDispatcher {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(org_id = %org_id, property_id = %property_id))]
    pub async fn dispatch(
        &self,
        org_id: &str,
        property_id: &str,
        record: &NotificationRecord,
    ) -> Result<BroadcastReport> {
        let residents = self.load_recipients(org_id, property_id).await?;
        let tokens: Vec<String> = residents
            .iter()
            .flat_map(|(_, tokens)| tokens.iter().cloned())
            .collect();

        let mut report = BroadcastReport {
            recipients: residents.len(),
            token_count: tokens.len(),
            ..Default::default()
        };
        if tokens.is_empty() {
            info!("No resident device tokens for property broadcast");
            return Ok(report);
        }

        let messages: Vec<MulticastMessage> = tokens
            .chunks(MAX_MULTICAST_TOKENS)
            .map(|chunk| build_message(record, chunk.to_vec()))
            .collect();
        report.chunks = messages.len();

        let messaging = self.ctx.messaging();
        let results: Vec<(MulticastMessage, fcm::Result<BatchResponse>)> =
            stream::iter(messages)
                .map(|message| async move {
                    let result = messaging.send_each_for_multicast(&message).await;
                    (message, result)
                })
                .buffered(self.ctx.config.broadcast_concurrency.max(1))
                .collect()
                .await;

        let mut dead_by_resident: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (index, (message, result)) in results.into_iter().enumerate() {
            let batch = match result {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(chunk = index, tokens = message.tokens.len(), error = %e, "Broadcast chunk failed");
                    report.failed_chunks += 1;
                    continue;
                }
            };
            report.success_count += batch.success_count;
            report.failure_count += batch.failure_count;

            let failures = classify_failures(&message.tokens, &batch);
            if !failures.transient.is_empty() {
                debug!(
                    chunk = index,
                    count = failures.transient.len(),
                    "Transient failures in broadcast chunk"
                );
            }
            for token in failures.permanent {
                match owner_of(&residents, &token) {
                    Some(resident_id) => {
                        let dead = dead_by_resident.entry(resident_id.to_string()).or_default();
                        if !dead.contains(&token) {
                            dead.push(token);
                        }
                    }
                    None => warn!("Invalid token has no owning resident"),
                }
            }
        }

        for (resident_id, dead) in &dead_by_resident {
            let scope = RecipientScope::resident(org_id, property_id, resident_id.as_str());
            if let Err(e) = prune_tokens(self.ctx.store(), &scope, dead).await {
                warn!(resident_id = %resident_id, error = %e, "Failed to prune resident tokens");
            }
        }
        report.pruned = dead_by_resident;

        info!(
            recipients = report.recipients,
            tokens = report.token_count,
            chunks = report.chunks,
            success = report.success_count,
            failure = report.failure_count,
            "Property broadcast dispatched"
        );
        Ok(report)
    }

    /// Residents of the property that have at least one token.
    async fn load_recipients(
        &self,
        org_id: &str,
        property_id: &str,
    ) -> Result<Vec<(String, Vec<String>)>> {
        let residents = self
            .ctx
            .store()
            .list(&residents_collection(org_id, property_id)?)
            .await?;
        Ok(residents
            .into_iter()
            .filter_map(|doc| {
                let tokens = RecipientProfile::tokens_from_fields(&doc.fields);
                (!tokens.is_empty()).then(|| (doc.id().to_string(), tokens))
            })
            .collect())
    }
}

/// First resident whose token set contains `token`.
fn owner_of<'a>(residents: &'a [(String, Vec<String>)], token: &str) -> Option<&'a str> {
    residents
        .iter()
        .find(|(_, tokens)| tokens.iter().any(|t| t == token))
        .map(|(id, _)| id.as_str())
}

#[async_trait]
impl TriggerHandler for BroadcastDispatcher {
    fn name(&self) -> &str {
        "property_broadcast"
    }

    async fn handle(&self, event: &TriggerEvent) -> Result<()> {
        let org_id = event.param("orgId")?;
        let property_id = event.param("propertyId")?;
        let Some(after) = event.change.after.as_ref() else {
            return Err(Error::validation("broadcast trigger fired without a document"));
        };
        let record: NotificationRecord = after.to_model()?;
        self.dispatch(org_id, property_id, &record).await?;
        Ok(())
    }
}
