//! Specialist text-generation collaborator.
//!
//! The LLM agents (intent routing, agronomy, livestock triage) live in an
//! external service. From this crate's point of view they are an opaque
//! generator: conversation plus query in, free text out, possibly carrying
//! an emergency block for the detector to find.

use crate::gateway::ImageRef;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Delay between retries of a transient specialist fault.
const RETRY_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, thiserror::Error)]
pub enum SpecialistError {
    /// Worth retrying a bounded number of times (timeouts, overload).
    #[error("transient specialist fault: {0}")]
    Transient(String),

    /// Must be surfaced to the user.
    #[error("specialist fault: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait Specialist: Send + Sync {
    /// Generate a response for the given conversation and query.
    async fn generate(
        &self,
        conversation_ref: &str,
        query: &str,
        image: Option<&ImageRef>,
    ) -> Result<String, SpecialistError>;
}

/// Call the specialist, retrying transient faults up to `max_retries` times.
/// Permanent faults are returned immediately.
pub async fn generate_with_retry(
    specialist: &dyn Specialist,
    conversation_ref: &str,
    query: &str,
    image: Option<&ImageRef>,
    max_retries: u32,
) -> Result<String, SpecialistError> {
    let mut attempt = 0;
    loop {
        match specialist.generate(conversation_ref, query, image).await {
            Ok(text) => return Ok(text),
            Err(SpecialistError::Transient(reason)) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max = max_retries,
                    %reason,
                    "transient specialist fault, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// HTTP client for the external agent service.
pub struct HttpSpecialist {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSpecialist {
    pub fn new(endpoint: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Specialist for HttpSpecialist {
    async fn generate(
        &self,
        conversation_ref: &str,
        query: &str,
        image: Option<&ImageRef>,
    ) -> Result<String, SpecialistError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "conversation_ref": conversation_ref,
                "query": query,
                "image_ref": image.map(|image| image.0.clone()),
            }))
            .send()
            .await
            .map_err(|error| SpecialistError::Transient(error.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SpecialistError::Transient(format!(
                "agent service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(SpecialistError::Permanent(format!(
                "agent service returned {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| SpecialistError::Permanent(error.to_string()))?;

        payload
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SpecialistError::Permanent("agent service response missing text".to_string())
            })
    }
}
