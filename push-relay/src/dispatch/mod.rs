//! Notification dispatch.
//!
//! - [`Dispatcher`] sends a record created under a single recipient
//! - [`BroadcastDispatcher`] sends a property-wide record to every resident
//!
//! Both classify per-token failures with [`classify_failures`] and prune
//! permanently invalid tokens before returning.

mod broadcast;
mod payload;
mod reconcile;
mod single;

pub use broadcast::{BroadcastDispatcher, BroadcastReport};
pub use payload::{LINK_KEY, MOBILE_LINK_KEY, build_message, link_data};
pub use reconcile::{FailureSummary, classify_failures};
pub use single::{DeliveryReport, DispatchOutcome, Dispatcher, deliver_to_recipient};
