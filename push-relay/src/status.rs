//! Push notifications for workflow status transitions.
//!
//! Sends directly to the affected resident rather than writing a notification
//! record first.

use std::collections::BTreeMap;

use async_trait::async_trait;
use docstore::Fields;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::catalog::{
    COMPLETE_STATUS, REVIEW_REQUEST_KEY, render_review_request, resolve_template, review_url,
};
use crate::context::AppContext;
use crate::dispatch::{DeliveryReport, deliver_to_recipient};
use crate::error::{Error, Result};
use crate::models::{OrganizationSettings, PropertyProfile, WorkflowDocument, WorkflowKind};
use crate::scope::{RecipientScope, organization_path, property_path};
use crate::triggers::{TriggerEvent, TriggerHandler};

/// What the notifier did for one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// `status` is identical before and after.
    Unchanged,
    /// No message is configured for the new status.
    NoMessage,
    /// The document does not name a resident.
    NoRecipient,
    Notified {
        status: String,
        /// `None` when the resident has no profile or no tokens.
        delivery: Option<DeliveryReport>,
        review: Option<DeliveryReport>,
    },
}

/// Whether `status` changed between two snapshots, returning the new value.
///
/// Only the `status` field is compared; edits to other fields never count.
pub fn status_transition<'a>(before: Option<&Fields>, after: &'a Fields) -> Option<&'a str> {
    let new_status = after.get("status").and_then(Value::as_str)?;
    let old_status = before.and_then(|b| b.get("status")).and_then(Value::as_str);
    (old_status != Some(new_status)).then_some(new_status)
}

#[derive(Clone)]
pub struct StatusChangeNotifier {
    ctx: AppContext,
}

impl StatusChangeNotifier {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(kind = %kind, org_id = %org_id, document_id = %document_id))]
    pub async fn on_update(
        &self,
        kind: WorkflowKind,
        org_id: &str,
        document_id: &str,
        before: Option<&Fields>,
        after: &Fields,
    ) -> Result<StatusOutcome> {
        let Some(status) = status_transition(before, after) else {
            return Ok(StatusOutcome::Unchanged);
        };

        let settings = self.organization_settings(org_id).await?;
        let Some(template) = resolve_template(settings.as_ref(), kind, status) else {
            debug!(status, "No message configured for status");
            return Ok(StatusOutcome::NoMessage);
        };

        let document: WorkflowDocument =
            serde_json::from_value(Value::Object(after.clone()))?;
        let (Some(property_id), Some(resident_id)) =
            (document.property_id.as_deref(), document.resident_id.as_deref())
        else {
            info!(status, "Document names no resident, skipping status notification");
            return Ok(StatusOutcome::NoRecipient);
        };
        let scope = RecipientScope::resident(org_id, property_id, resident_id);

        let mut data = BTreeMap::from([
            ("type".to_string(), kind.to_string()),
            ("documentId".to_string(), document_id.to_string()),
            ("status".to_string(), status.to_string()),
        ]);
        let delivery =
            deliver_to_recipient(&self.ctx, &scope, &template.title, &template.body, data.clone())
                .await?;

        let review = if kind == WorkflowKind::ServiceRequest && status == COMPLETE_STATUS {
            data.insert("type".to_string(), REVIEW_REQUEST_KEY.to_string());
            self.request_review(&scope, org_id, property_id, settings.as_ref(), data)
                .await?
        } else {
            None
        };

        info!(
            status,
            delivered = delivery.is_some(),
            review = review.is_some(),
            "Status change notification handled"
        );
        Ok(StatusOutcome::Notified {
            status: status.to_string(),
            delivery,
            review,
        })
    }

    /// Second send after completion, when the property has a review location and
    /// the organization has a review template.
    async fn request_review(
        &self,
        scope: &RecipientScope,
        org_id: &str,
        property_id: &str,
        settings: Option<&OrganizationSettings>,
        mut data: BTreeMap<String, String>,
    ) -> Result<Option<DeliveryReport>> {
        let Some(template) = settings.and_then(|s| s.template(REVIEW_REQUEST_KEY)) else {
            debug!("No review request template configured");
            return Ok(None);
        };
        let property = match self
            .ctx
            .store()
            .get(&property_path(org_id, property_id)?)
            .await?
        {
            Some(doc) => doc.to_model::<PropertyProfile>()?,
            None => return Ok(None),
        };
        let Some(place_id) = property
            .google_place_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            debug!("Property has no review location");
            return Ok(None);
        };

        let url = review_url(place_id);
        let message = render_review_request(&template, &url);
        data.insert("reviewUrl".to_string(), url);
        deliver_to_recipient(&self.ctx, scope, &message.title, &message.body, data).await
    }

    async fn organization_settings(&self, org_id: &str) -> Result<Option<OrganizationSettings>> {
        let Some(doc) = self.ctx.store().get(&organization_path(org_id)?).await? else {
            return Ok(None);
        };
        Ok(Some(doc.to_model()?))
    }
}

/// Binds the notifier to one workflow collection.
pub struct StatusTrigger {
    notifier: StatusChangeNotifier,
    kind: WorkflowKind,
    name: String,
}

impl StatusTrigger {
    pub fn new(notifier: StatusChangeNotifier, kind: WorkflowKind) -> Self {
        Self {
            notifier,
            kind,
            name: format!("{}_status", kind),
        }
    }
}

#[async_trait]
impl TriggerHandler for StatusTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &TriggerEvent) -> Result<()> {
        let org_id = event.param("orgId")?;
        let Some(after) = event.after() else {
            return Err(Error::validation("status trigger fired without a document"));
        };
        self.notifier
            .on_update(self.kind, org_id, event.change.path.id(), event.before(), after)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn same_status_is_not_a_transition() {
        let before = fields(json!({ "status": "complete", "notes": "a" }));
        let after = fields(json!({ "status": "complete", "notes": "b" }));
        assert_eq!(status_transition(Some(&before), &after), None);
    }

    #[test]
    fn changed_status_is_a_transition() {
        let before = fields(json!({ "status": "in_progress" }));
        let after = fields(json!({ "status": "complete" }));
        assert_eq!(status_transition(Some(&before), &after), Some("complete"));
        assert_eq!(status_transition(None, &after), Some("complete"));
    }

    #[test]
    fn removed_status_is_ignored() {
        let before = fields(json!({ "status": "complete" }));
        let after = fields(json!({}));
        assert_eq!(status_transition(Some(&before), &after), None);
    }
}
