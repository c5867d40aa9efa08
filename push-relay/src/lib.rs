//! Push notification relay for a property-management backend.
//!
//! Watches a hierarchical document store and reacts to its changes:
//! notification records are delivered to their recipient's devices, property
//! notifications are broadcast to every resident, workflow status changes turn
//! into notifications, stale workflows are escalated on a timer and resident
//! vehicle plates are kept denormalized for searching.

pub mod api;
pub mod catalog;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod models;
pub mod reconciler;
pub mod registry;
pub mod relay;
pub mod scope;
pub mod status;
pub mod triggers;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::{Error, Result};
pub use relay::{Relay, build_trigger_router};
pub use scope::RecipientScope;
