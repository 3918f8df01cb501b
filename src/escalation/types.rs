//! Types for the emergency escalation state machine.

use crate::gateway::{ImageRef, MessageRef};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an emergency case.
///
/// Transitions are monotonic with no skips: each is triggered by exactly one
/// event type (post succeeded, expert replied, farmer notified), and
/// `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    /// Case exists but has not been posted to the expert channel yet.
    PendingReview,
    /// Posted to the expert channel; waiting for a human reply.
    AwaitingExpert,
    /// An expert replied; the farmer has not been notified yet.
    ExpertResponded,
    /// Farmer notified. Terminal.
    Completed,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::PendingReview => "pending_review",
            CaseState::AwaitingExpert => "awaiting_expert",
            CaseState::ExpertResponded => "expert_responded",
            CaseState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CaseState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending_review" => Ok(CaseState::PendingReview),
            "awaiting_expert" => Ok(CaseState::AwaitingExpert),
            "expert_responded" => Ok(CaseState::ExpertResponded),
            "completed" => Ok(CaseState::Completed),
            other => Err(format!(
                "invalid case state: '{other}', expected 'pending_review', \
                 'awaiting_expert', 'expert_responded', or 'completed'"
            )),
        }
    }
}

/// Fields extracted from a specialist's emergency block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyFields {
    pub disease: String,
    /// Coarse tier, carried through unvalidated from model output.
    pub severity: String,
    pub confidence: String,
    pub reasoning: String,
}

/// Identity of the farmer who sent the escalated message.
#[derive(Debug, Clone)]
pub struct Requester {
    pub id: String,
    pub name: String,
}

/// One escalation record, tracking a single emergency from detection to
/// farmer notification.
#[derive(Debug, Clone)]
pub struct EmergencyCase {
    /// Short opaque id, easy for a vet to type back in a reply.
    pub case_id: String,
    pub requester_id: String,
    pub requester_name: String,
    /// Session the farmer is in, preserved for relaying the expert's answer.
    pub conversation_ref: String,
    pub original_query: String,
    pub detected_condition: String,
    pub severity: String,
    pub confidence: String,
    pub reasoning: String,
    pub attached_image_ref: Option<ImageRef>,
    pub state: CaseState,
    /// Correlation key: id of the notice posted to the expert channel. Set
    /// iff the case has reached `awaiting_expert`.
    pub expert_message_ref: Option<MessageRef>,
    pub expert_response_text: Option<String>,
    pub expert_name: Option<String>,
    pub expert_id: Option<String>,
    pub expert_responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Generate a short human-typable case id: the first 8 hex chars of a v4
/// UUID, uppercased.
pub fn new_case_id() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full[..8].to_uppercase()
}
