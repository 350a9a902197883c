//! Reconciliation of push signals, authoritative fetches and read marks into
//! one notification list.

mod dispatch;
mod read_state;
mod reconciler;

pub use dispatch::{plan, DispatchPlan, RefetchTarget};
pub use read_state::{MarkOutcome, ReadStateTracker, Selection};
pub use reconciler::ReconciliationEngine;
