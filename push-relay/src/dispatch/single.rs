//! Delivery of a notification record to one recipient.

use std::collections::BTreeMap;

use async_trait::async_trait;
use docstore::{DocumentPath, Precondition, Updates};
use fcm::MulticastMessage;
use tracing::{debug, info, instrument, warn};

use super::payload::build_message;
use super::reconcile::classify_failures;
use crate::context::AppContext;
use crate::error::Result;
use crate::models::{NotificationRecord, NotificationStatus};
use crate::registry::{load_tokens, prune_tokens};
use crate::scope::RecipientScope;
use crate::triggers::{TriggerEvent, TriggerHandler};

/// Result of one multicast to a recipient's tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub token_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Tokens removed from the recipient's registry.
    pub pruned: Vec<String>,
    pub transient_failures: usize,
}

/// What a dispatch attempt ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(DeliveryReport),
    /// The profile exists but has no tokens; the record is marked sent.
    NoTokens,
    /// The recipient profile does not exist; the record is left untouched.
    MissingProfile,
    /// The record was deleted before it could be read.
    MissingRecord,
    /// Another invocation already claimed or finished the record.
    AlreadyHandled(NotificationStatus),
}

/// Send `message` to the tokens it carries, then prune permanently failed
/// tokens from `scope`'s registry.
///
/// Only a failed send call is an error. Once the provider has answered, a
/// failed prune is logged and the report lists no pruned tokens.
pub(crate) async fn send_and_prune(
    ctx: &AppContext,
    scope: &RecipientScope,
    message: &MulticastMessage,
) -> Result<DeliveryReport> {
    let batch = ctx.messaging().send_each_for_multicast(message).await?;
    let failures = classify_failures(&message.tokens, &batch);

    for (token, code) in &failures.transient {
        warn!(
            recipient = %scope.describe(),
            token = %abbreviate(token),
            code = %code,
            "Transient delivery failure"
        );
    }
    let pruned = match prune_tokens(ctx.store(), scope, &failures.permanent).await {
        Ok(()) => failures.permanent,
        Err(e) => {
            warn!(
                recipient = %scope.describe(),
                count = failures.permanent.len(),
                error = %e,
                "Failed to prune invalid device tokens"
            );
            Vec::new()
        }
    };

    Ok(DeliveryReport {
        token_count: message.tokens.len(),
        success_count: batch.success_count,
        failure_count: batch.failure_count,
        pruned,
        transient_failures: failures.transient.len(),
    })
}

/// Send a message straight to a recipient, bypassing notification records.
///
/// Returns `None` when the profile is missing or has no tokens.
pub async fn deliver_to_recipient(
    ctx: &AppContext,
    scope: &RecipientScope,
    title: &str,
    body: &str,
    data: BTreeMap<String, String>,
) -> Result<Option<DeliveryReport>> {
    let Some(tokens) = load_tokens(ctx.store(), scope).await? else {
        info!(recipient = %scope.describe(), "Recipient profile not found, skipping");
        return Ok(None);
    };
    if tokens.is_empty() {
        debug!(recipient = %scope.describe(), "Recipient has no device tokens");
        return Ok(None);
    }
    let message = MulticastMessage::new(tokens, title, body).with_data(data);
    send_and_prune(ctx, scope, &message).await.map(Some)
}

/// Sends newly created notification records to their recipient.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: AppContext,
}

impl Dispatcher {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Deliver the record at `record_path` to `scope`.
    ///
    /// The record is marked `sent` after any send attempt, whatever the
    /// per-token results. If the send call fails as a whole, a claimed record
    /// is released back to `pending` and the error is returned.
    #[instrument(skip_all, fields(recipient = %scope.describe(), record = %record_path))]
    pub async fn dispatch(
        &self,
        scope: &RecipientScope,
        record_path: &DocumentPath,
    ) -> Result<DispatchOutcome> {
        let store = self.ctx.store();
        let Some(doc) = store.get(record_path).await? else {
            debug!("Notification record no longer exists");
            return Ok(DispatchOutcome::MissingRecord);
        };
        let record: NotificationRecord = doc.to_model()?;
        if record.status != NotificationStatus::Pending {
            debug!(status = %record.status, "Notification record already handled");
            return Ok(DispatchOutcome::AlreadyHandled(record.status));
        }

        let Some(tokens) = load_tokens(store, scope).await? else {
            info!("Recipient profile not found, nothing to deliver");
            return Ok(DispatchOutcome::MissingProfile);
        };

        let has_status = doc.get("status").is_some();
        if self.ctx.config.claim_records && !self.claim(record_path, has_status).await? {
            debug!("Notification record claimed by another invocation");
            return Ok(DispatchOutcome::AlreadyHandled(NotificationStatus::Processing));
        }

        if tokens.is_empty() {
            info!("Recipient has no device tokens, marking record sent");
            self.mark_sent(record_path).await?;
            return Ok(DispatchOutcome::NoTokens);
        }

        let message = build_message(&record, tokens);
        let report = match send_and_prune(&self.ctx, scope, &message).await {
            Ok(report) => report,
            Err(e) => {
                if self.ctx.config.claim_records {
                    self.release(record_path).await;
                }
                return Err(e);
            }
        };
        self.mark_sent(record_path).await?;

        info!(
            tokens = report.token_count,
            success = report.success_count,
            failure = report.failure_count,
            pruned = report.pruned.len(),
            "Notification dispatched"
        );
        Ok(DispatchOutcome::Delivered(report))
    }

    /// `pending -> processing`, atomically. Records written without a status
    /// count as pending.
    async fn claim(&self, record_path: &DocumentPath, has_status: bool) -> Result<bool> {
        let precondition = if has_status {
            Precondition::field_equals("status", NotificationStatus::Pending.as_ref())
        } else {
            Precondition::field_missing("status")
        };
        Ok(self
            .ctx
            .store()
            .update_if(
                record_path,
                precondition,
                Updates::new().set("status", NotificationStatus::Processing.as_ref()),
            )
            .await?)
    }

    async fn release(&self, record_path: &DocumentPath) {
        let released = self
            .ctx
            .store()
            .update_if(
                record_path,
                Precondition::field_equals("status", NotificationStatus::Processing.as_ref()),
                Updates::new().set("status", NotificationStatus::Pending.as_ref()),
            )
            .await;
        if let Err(e) = released {
            warn!(error = %e, "Failed to release notification record claim");
        }
    }

    async fn mark_sent(&self, record_path: &DocumentPath) -> Result<()> {
        self.ctx
            .store()
            .update(
                record_path,
                Updates::new()
                    .set("status", NotificationStatus::Sent.as_ref())
                    .server_timestamp("sentAt"),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TriggerHandler for Dispatcher {
    fn name(&self) -> &str {
        "notification_dispatch"
    }

    async fn handle(&self, event: &TriggerEvent) -> Result<()> {
        let scope = RecipientScope::from_event_params(&event.params)?;
        self.dispatch(&scope, &event.change.path).await?;
        Ok(())
    }
}

/// First characters of a token, enough to correlate log lines.
pub(crate) fn abbreviate(token: &str) -> String {
    let prefix: String = token.chars().take(12).collect();
    if prefix.len() < token.len() {
        format!("{}…", prefix)
    } else {
        prefix
    }
}
