//! CaseStore: persistence for emergency cases, backed by SQLite.
//!
//! Every lifecycle transition is a compare-and-set on the expected prior
//! state, applied as a single UPDATE. A duplicate event (second reply to the
//! same case, repeated sweep of a completed case) simply matches zero rows
//! and reports `false`; no stale transition can resurrect an earlier state.

use crate::error::{CaseError, DbError, Result};
use crate::escalation::types::{CaseState, EmergencyCase, EmergencyFields, Requester, new_case_id};
use crate::gateway::{ImageRef, MessageRef};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Persistent store for emergency cases.
#[derive(Clone)]
pub struct CaseStore {
    pool: SqlitePool,
}

/// Fields recorded when an expert responds to a case.
pub struct ExpertResponse<'a> {
    pub text: &'a str,
    pub expert_name: &'a str,
    pub expert_id: &'a str,
}

/// Case counts by lifecycle state.
#[derive(Debug, Default)]
pub struct CaseStats {
    pub total: i64,
    pub by_state: Vec<(CaseState, i64)>,
}

impl CaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new case in `pending_review`. Returns the generated case id.
    pub async fn create(
        &self,
        requester: &Requester,
        conversation_ref: &str,
        query: &str,
        fields: &EmergencyFields,
        image: Option<&ImageRef>,
    ) -> Result<String> {
        let case_id = new_case_id();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO emergency_cases
                 (case_id, requester_id, requester_name, conversation_ref,
                  original_query, detected_condition, severity, confidence,
                  reasoning, attached_image_ref, state, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&case_id)
        .bind(&requester.id)
        .bind(&requester.name)
        .bind(conversation_ref)
        .bind(query)
        .bind(&fields.disease)
        .bind(&fields.severity)
        .bind(&fields.confidence)
        .bind(&fields.reasoning)
        .bind(image.map(|image| image.0.as_str()))
        .bind(CaseState::PendingReview.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        tracing::info!(case_id = %case_id, requester_id = %requester.id, "emergency case created");
        Ok(case_id)
    }

    /// Get a case by id.
    pub async fn get(&self, case_id: &str) -> Result<Option<EmergencyCase>> {
        let row = sqlx::query_as::<_, CaseRow>(&select_query("WHERE case_id = ?"))
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(CaseRow::into_case).transpose()
    }

    /// Find the case whose expert-channel notice has the given message id.
    /// This is the correlation lookup used to match incoming replies.
    pub async fn find_by_expert_message(
        &self,
        message_ref: MessageRef,
    ) -> Result<Option<EmergencyCase>> {
        let row = sqlx::query_as::<_, CaseRow>(&select_query("WHERE expert_message_ref = ?"))
            .bind(message_ref.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(CaseRow::into_case).transpose()
    }

    /// All cases currently in the given state, oldest first.
    pub async fn list_in_state(&self, state: CaseState) -> Result<Vec<EmergencyCase>> {
        let rows =
            sqlx::query_as::<_, CaseRow>(&select_query("WHERE state = ? ORDER BY created_at ASC"))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable)?;

        rows.into_iter().map(CaseRow::into_case).collect()
    }

    /// Cases still waiting on an expert (`pending_review` or
    /// `awaiting_expert`), oldest first.
    pub async fn active_cases(&self) -> Result<Vec<EmergencyCase>> {
        let rows = sqlx::query_as::<_, CaseRow>(&select_query(
            "WHERE state IN ('pending_review', 'awaiting_expert') ORDER BY created_at ASC",
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(CaseRow::into_case).collect()
    }

    /// Record that the case was posted to the expert channel.
    /// `pending_review -> awaiting_expert`. Returns whether the transition
    /// applied.
    pub async fn mark_expert_posted(
        &self,
        case_id: &str,
        message_ref: MessageRef,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE emergency_cases
             SET state = ?, expert_message_ref = ?
             WHERE case_id = ? AND state = ?",
        )
        .bind(CaseState::AwaitingExpert.as_str())
        .bind(message_ref.0)
        .bind(case_id)
        .bind(CaseState::PendingReview.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let applied = result.rows_affected() > 0;
        if applied {
            tracing::info!(case_id = %case_id, message_ref = %message_ref, "case posted to expert channel");
        }
        Ok(applied)
    }

    /// Record an expert's reply. `awaiting_expert -> expert_responded`.
    /// Returns whether the transition applied; a later reply to an already
    /// answered case matches nothing and leaves the first responder recorded.
    pub async fn mark_expert_response(
        &self,
        case_id: &str,
        response: &ExpertResponse<'_>,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE emergency_cases
             SET state = ?, expert_response_text = ?, expert_name = ?,
                 expert_id = ?, expert_responded_at = ?
             WHERE case_id = ? AND state = ?",
        )
        .bind(CaseState::ExpertResponded.as_str())
        .bind(response.text)
        .bind(response.expert_name)
        .bind(response.expert_id)
        .bind(now)
        .bind(case_id)
        .bind(CaseState::AwaitingExpert.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let applied = result.rows_affected() > 0;
        if applied {
            tracing::info!(case_id = %case_id, expert = %response.expert_name, "expert response recorded");
        }
        Ok(applied)
    }

    /// Close the case after the farmer was notified.
    /// `expert_responded -> completed`. Returns whether the transition
    /// applied.
    pub async fn mark_completed(&self, case_id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE emergency_cases
             SET state = ?, completed_at = ?
             WHERE case_id = ? AND state = ?",
        )
        .bind(CaseState::Completed.as_str())
        .bind(now)
        .bind(case_id)
        .bind(CaseState::ExpertResponded.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let applied = result.rows_affected() > 0;
        if applied {
            tracing::info!(case_id = %case_id, "case completed");
        }
        Ok(applied)
    }

    /// Case counts by state, for the expert channel's `/stats` command.
    pub async fn stats(&self) -> Result<CaseStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM emergency_cases GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut stats = CaseStats::default();
        for (state, count) in rows {
            let state: CaseState = state.parse().map_err(CaseError::InvalidState)?;
            stats.total += count;
            stats.by_state.push((state, count));
        }
        Ok(stats)
    }
}

fn unavailable(error: sqlx::Error) -> DbError {
    DbError::Unavailable(error.to_string())
}

fn select_query(suffix: &str) -> String {
    format!(
        "SELECT case_id, requester_id, requester_name, conversation_ref,
                original_query, detected_condition, severity, confidence,
                reasoning, attached_image_ref, state, expert_message_ref,
                expert_response_text, expert_name, expert_id,
                expert_responded_at, created_at, completed_at
         FROM emergency_cases {suffix}"
    )
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct CaseRow {
    case_id: String,
    requester_id: String,
    requester_name: String,
    conversation_ref: String,
    original_query: String,
    detected_condition: String,
    severity: String,
    confidence: String,
    reasoning: String,
    attached_image_ref: Option<String>,
    state: String,
    expert_message_ref: Option<i64>,
    expert_response_text: Option<String>,
    expert_name: Option<String>,
    expert_id: Option<String>,
    expert_responded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl CaseRow {
    fn into_case(self) -> Result<EmergencyCase> {
        let state: CaseState = self.state.parse().map_err(CaseError::InvalidState)?;

        Ok(EmergencyCase {
            case_id: self.case_id,
            requester_id: self.requester_id,
            requester_name: self.requester_name,
            conversation_ref: self.conversation_ref,
            original_query: self.original_query,
            detected_condition: self.detected_condition,
            severity: self.severity,
            confidence: self.confidence,
            reasoning: self.reasoning,
            attached_image_ref: self.attached_image_ref.map(ImageRef),
            state,
            expert_message_ref: self.expert_message_ref.map(MessageRef),
            expert_response_text: self.expert_response_text,
            expert_name: self.expert_name,
            expert_id: self.expert_id,
            expert_responded_at: self.expert_responded_at,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}
