//! Emergency escalation subsystem.
//!
//! Detects a structured emergency block in specialist output, persists a
//! case, posts it to the veterinarian group, polls for the human reply, and
//! relays it back to the farmer. State machine:
//! `pending_review -> awaiting_expert -> expert_responded -> completed`.

pub mod coordinator;
pub mod detector;
pub mod reconciler;
pub mod store;
pub mod sweep;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{EscalationCoordinator, EscalationTicket, UNRECORDED_CASE_ID};
pub use detector::EmergencyDetector;
pub use reconciler::{ResponseReconciler, spawn_poll_loop};
pub use store::{CaseStats, CaseStore, ExpertResponse};
pub use sweep::{NotificationSweep, spawn_sweep_loop};
pub use types::{CaseState, EmergencyCase, EmergencyFields, Requester};
