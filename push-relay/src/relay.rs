//! Wires handlers to the collections they watch and runs them.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EscalationConfig;
use crate::context::AppContext;
use crate::dispatch::{BroadcastDispatcher, Dispatcher};
use crate::error::Result;
use crate::escalation::EscalationScheduler;
use crate::models::WorkflowKind;
use crate::reconciler::{DenormalizationReconciler, Projection};
use crate::status::{StatusChangeNotifier, StatusTrigger};
use crate::triggers::{TriggerKind, TriggerRouter};

pub const ADMIN_NOTIFICATIONS: &str = "admins/{adminId}/notifications/{notificationId}";
pub const USER_NOTIFICATIONS: &str =
    "organizations/{orgId}/users/{uid}/notifications/{notificationId}";
pub const RESIDENT_NOTIFICATIONS: &str = "organizations/{orgId}/properties/{propertyId}/residents/{residentId}/notifications/{notificationId}";
pub const PROPERTY_NOTIFICATIONS: &str =
    "organizations/{orgId}/properties/{propertyId}/notifications/{notificationId}";
pub const SERVICE_REQUESTS: &str = "organizations/{orgId}/serviceRequests/{requestId}";
pub const VIOLATIONS: &str = "organizations/{orgId}/violations/{violationId}";
pub const RESIDENTS: &str = "organizations/{orgId}/properties/{propertyId}/residents/{residentId}";

/// Router with every change-driven handler registered.
pub fn build_trigger_router(ctx: &AppContext) -> Result<TriggerRouter> {
    let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));
    let notifier = StatusChangeNotifier::new(ctx.clone());

    let mut router = TriggerRouter::new();
    router
        .on(ADMIN_NOTIFICATIONS, TriggerKind::Create, dispatcher.clone())?
        .on(USER_NOTIFICATIONS, TriggerKind::Create, dispatcher.clone())?
        .on(RESIDENT_NOTIFICATIONS, TriggerKind::Create, dispatcher)?
        .on(
            PROPERTY_NOTIFICATIONS,
            TriggerKind::Create,
            Arc::new(BroadcastDispatcher::new(ctx.clone())),
        )?
        .on(
            SERVICE_REQUESTS,
            TriggerKind::Update,
            Arc::new(StatusTrigger::new(
                notifier.clone(),
                WorkflowKind::ServiceRequest,
            )),
        )?
        .on(
            VIOLATIONS,
            TriggerKind::Update,
            Arc::new(StatusTrigger::new(notifier, WorkflowKind::Violation)),
        )?
        .on(
            RESIDENTS,
            TriggerKind::Write,
            Arc::new(DenormalizationReconciler::new(
                ctx.store.clone(),
                Projection::default(),
            )),
        )?;
    Ok(router)
}

/// Change-driven handlers plus the periodic escalation sweeps.
pub struct Relay {
    ctx: AppContext,
    router: Arc<TriggerRouter>,
    scheduler: Arc<EscalationScheduler>,
}

impl Relay {
    pub fn new(ctx: AppContext, escalation: &EscalationConfig) -> Result<Self> {
        let router = Arc::new(build_trigger_router(&ctx)?);
        let scheduler = Arc::new(EscalationScheduler::new(ctx.store.clone(), escalation)?);
        Ok(Self {
            ctx,
            router,
            scheduler,
        })
    }

    pub fn router(&self) -> &TriggerRouter {
        &self.router
    }

    pub fn scheduler(&self) -> &EscalationScheduler {
        &self.scheduler
    }

    /// Subscribe to the change feed and start the sweeps.
    pub fn start(&self, cancel_token: CancellationToken) -> Vec<JoinHandle<()>> {
        let rx = self.ctx.store().subscribe();
        let mut handles = vec![self.router.clone().start(rx, cancel_token.clone())];
        handles.extend(self.scheduler.start(cancel_token));
        info!(
            triggers = self.router.len(),
            sweeps = self.scheduler.rules().len(),
            "Relay started"
        );
        handles
    }
}
