//! Timed escalation of violations left unattended.
//!
//! Each [`EscalationRule`] runs as its own periodic sweep. A sweep visits every
//! organization; the matched violations of one organization are transitioned and
//! their reporter notifications created in a single atomic batch. An
//! organization whose batch fails is logged and skipped, and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use docstore::{CollectionPath, Document, DocumentStore, Precondition, Query, Updates, WriteBatch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EscalationConfig;
use crate::error::{Error, Result};
use crate::models::{MessageTemplate, NotificationRecord, WorkflowDocument, WorkflowKind};
use crate::scope::{ORGANIZATIONS, RecipientScope, organization_path};

const SYSTEM_CREATOR: &str = "system";

/// One escalation path: documents in `source_status` older than the grace
/// window move to `target_status`.
#[derive(Debug, Clone)]
pub struct EscalationRule {
    pub name: String,
    pub source_status: String,
    pub target_status: String,
    /// Restrict to these violation types; `None` matches every type.
    pub violation_types: Option<Vec<String>>,
    /// Timestamp field stamped with the transition time.
    pub transition_field: Option<String>,
    /// Message for the reporter.
    pub message: MessageTemplate,
}

impl EscalationRule {
    /// Unacknowledged violations go to the property manager.
    pub fn manager_escalation() -> Self {
        Self {
            name: "manager_escalation".to_string(),
            source_status: "pending_acknowledgement".to_string(),
            target_status: "escalated_to_manager".to_string(),
            violation_types: None,
            transition_field: Some("escalatedAt".to_string()),
            message: MessageTemplate::new(
                "Violation escalated",
                "A violation you reported was not acknowledged in time and has been escalated to the property manager.",
            ),
        }
    }

    /// Reported violations of tow-eligible types are queued for towing.
    pub fn tow_escalation(violation_types: Vec<String>) -> Self {
        Self {
            name: "tow_escalation".to_string(),
            source_status: "reported".to_string(),
            target_status: "pending_tow".to_string(),
            violation_types: Some(violation_types),
            transition_field: Some("towRequestedAt".to_string()),
            message: MessageTemplate::new(
                "Vehicle queued for tow",
                "A violation you reported is now pending tow.",
            ),
        }
    }

    fn query(&self, org_collection: CollectionPath, cutoff: DateTime<Utc>) -> Query {
        let mut query = Query::new(org_collection)
            .where_eq("status", self.source_status.as_str())
            .where_lt("createdAt", docstore::timestamp_value(cutoff));
        if let Some(types) = &self.violation_types {
            query = query.where_in("type", types.iter().map(String::as_str));
        }
        query
    }
}

/// Outcome of one sweep of one rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub organizations: usize,
    pub escalated: usize,
    pub notifications: usize,
    /// Organizations whose batch failed.
    pub failed_organizations: Vec<String>,
}

pub struct EscalationScheduler {
    store: Arc<dyn DocumentStore>,
    rules: Vec<EscalationRule>,
    grace: chrono::Duration,
    interval: Duration,
}

impl EscalationScheduler {
    pub fn new(store: Arc<dyn DocumentStore>, config: &EscalationConfig) -> Result<Self> {
        let rules = vec![
            EscalationRule::manager_escalation(),
            EscalationRule::tow_escalation(config.tow_violation_types.clone()),
        ];
        Self::with_rules(store, rules, config)
    }

    pub fn with_rules(
        store: Arc<dyn DocumentStore>,
        rules: Vec<EscalationRule>,
        config: &EscalationConfig,
    ) -> Result<Self> {
        let grace = chrono::Duration::from_std(config.grace)
            .map_err(|e| Error::config(format!("escalation grace out of range: {}", e)))?;
        Ok(Self {
            store,
            rules,
            grace,
            interval: config.interval,
        })
    }

    pub fn rules(&self) -> &[EscalationRule] {
        &self.rules
    }

    /// Escalate everything `rule` matches as of `now`.
    pub async fn sweep(&self, rule: &EscalationRule, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if rule.violation_types.as_ref().is_some_and(Vec::is_empty) {
            return Ok(report);
        }

        let cutoff = now
            .checked_sub_signed(self.grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let organizations = self
            .store
            .list(&CollectionPath::root(ORGANIZATIONS))
            .await?;
        report.organizations = organizations.len();

        for org in organizations {
            let org_id = org.id().to_string();
            match self.escalate_organization(rule, &org_id, cutoff, now).await {
                Ok((escalated, notifications)) => {
                    report.escalated += escalated;
                    report.notifications += notifications;
                }
                Err(e) => {
                    error!(
                        rule = %rule.name,
                        org_id = %org_id,
                        error = %e,
                        "Escalation failed for organization"
                    );
                    report.failed_organizations.push(org_id);
                }
            }
        }

        if report.escalated > 0 || !report.failed_organizations.is_empty() {
            info!(
                rule = %rule.name,
                escalated = report.escalated,
                notifications = report.notifications,
                failed = report.failed_organizations.len(),
                "Escalation sweep completed"
            );
        } else {
            debug!(rule = %rule.name, "Escalation sweep found nothing to escalate");
        }
        Ok(report)
    }

    /// Returns (documents escalated, notifications created).
    async fn escalate_organization(
        &self,
        rule: &EscalationRule,
        org_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize)> {
        let violations = organization_path(org_id)?.collection(WorkflowKind::Violation.collection());
        let stale = self.store.query(&rule.query(violations, cutoff)).await?;
        if stale.is_empty() {
            return Ok((0, 0));
        }

        let mut batch = WriteBatch::new();
        let mut notifications = 0;
        for doc in &stale {
            batch.update_if(
                doc.path.clone(),
                Precondition::field_equals("status", rule.source_status.as_str()),
                self.transition(rule),
            );
            match self.reporter_notification(rule, org_id, doc, now) {
                Ok(Some((path, fields))) => {
                    batch.create(path, fields);
                    notifications += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    rule = %rule.name,
                    org_id,
                    document = %doc.path,
                    error = %e,
                    "Unreadable violation, escalating without reporter notice"
                ),
            }
        }
        self.store.commit(batch).await?;

        info!(
            rule = %rule.name,
            org_id,
            escalated = stale.len(),
            "Escalated stale violations"
        );
        Ok((stale.len(), notifications))
    }

    fn transition(&self, rule: &EscalationRule) -> Updates {
        let updates = Updates::new().set("status", rule.target_status.as_str());
        match &rule.transition_field {
            Some(field) => updates.server_timestamp(field.as_str()),
            None => updates,
        }
    }

    fn reporter_notification(
        &self,
        rule: &EscalationRule,
        org_id: &str,
        doc: &Document,
        now: DateTime<Utc>,
    ) -> Result<Option<(docstore::DocumentPath, docstore::Fields)>> {
        let violation: WorkflowDocument = doc.to_model()?;
        let Some(reporter_id) = violation.reporter_id.filter(|id| !id.trim().is_empty()) else {
            return Ok(None);
        };
        let path = RecipientScope::org_user(org_id, reporter_id)
            .notifications_collection()?
            .doc(&docstore::new_document_id())?;
        let record = NotificationRecord::new(rule.message.title.clone(), rule.message.body.clone())
            .with_link(format!("/violations/{}", doc.id()))
            .created_by(SYSTEM_CREATOR)
            .created_at(now);
        Ok(Some((path, docstore::to_fields(&record)?)))
    }

    /// Spawn one periodic sweep per rule.
    pub fn start(self: &Arc<Self>, cancel_token: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.rules.len())
            .map(|index| {
                let scheduler = Arc::clone(self);
                let cancel_token = cancel_token.clone();
                tokio::spawn(async move { scheduler.run_rule(index, cancel_token).await })
            })
            .collect()
    }

    async fn run_rule(&self, index: usize, cancel_token: CancellationToken) {
        let Some(rule) = self.rules.get(index) else {
            return;
        };
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            rule = %rule.name,
            interval_secs = self.interval.as_secs(),
            grace_secs = self.grace.num_seconds(),
            "Escalation sweep started"
        );

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!(rule = %rule.name, "Escalation sweep shutting down");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.sweep(rule, Utc::now()).await {
                        error!(rule = %rule.name, error = %e, "Escalation sweep failed");
                    }
                }
            }
        }
    }
}
