//! Response reconciler: matches expert-channel replies to open cases.
//!
//! Runs on its own poll interval, independent of any single request. Three
//! matching paths, in order: a reply to the posted case notice (matched by
//! the correlation key), an explicit `/respond <case_id> <advice>` command,
//! and a free-text mention of an active case id. A message matching none of
//! them is normal channel chatter, not an error.

use crate::error::Result;
use crate::escalation::store::{CaseStats, CaseStore, ExpertResponse};
use crate::escalation::types::EmergencyCase;
use crate::gateway::{Gateway, GatewayMessage};

use std::sync::Arc;
use std::time::Duration;

/// Words that suggest a message is veterinary advice. Used only to decide
/// whether an unmatched message deserves a usage hint.
const ADVICE_KEYWORDS: &[&str] = &[
    "treatment",
    "diagnosis",
    "symptoms",
    "medicine",
    "dose",
    "injection",
    "isolate",
    "vaccine",
];

pub struct ResponseReconciler {
    store: CaseStore,
    gateway: Arc<dyn Gateway>,
    /// Poll cursor. Advances monotonically and is never rewound, so each
    /// expert message is considered at most once across poll cycles.
    cursor: i64,
}

impl ResponseReconciler {
    pub fn new(store: CaseStore, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            store,
            gateway,
            cursor: 0,
        }
    }

    /// Fetch and process expert-channel messages that arrived since the last
    /// poll. Transport errors leave the cursor untouched and are retried on
    /// the next interval; per-message failures are isolated.
    pub async fn poll_once(&mut self) -> Result<()> {
        let (messages, next_cursor) = match self.gateway.fetch_new_messages(self.cursor).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::warn!(%error, "expert channel poll failed, retrying next interval");
                return Ok(());
            }
        };
        self.cursor = next_cursor;

        for message in &messages {
            if let Err(error) = self.process_message(message).await {
                tracing::warn!(message_id = %message.id, %error, "failed to process expert message");
            }
        }

        Ok(())
    }

    async fn process_message(&self, message: &GatewayMessage) -> Result<()> {
        // 1. Reply threading: resolve the replied-to notice's id against the
        //    correlation index.
        if let Some(reply_to) = message.reply_to {
            if let Some(case) = self.store.find_by_expert_message(reply_to).await? {
                self.record_response(&case.case_id, message).await?;
                return Ok(());
            }
            // Reply to something that isn't a case notice; fall through to
            // the text-based paths.
        }

        // 2. Explicit command: /respond <case_id> <advice>.
        if let Some((case_id, advice)) = parse_respond_command(&message.text) {
            if advice.is_empty() {
                self.reply(
                    message,
                    "Usage: /respond [case_id] [your diagnosis/advice]\n\
                     Example: /respond ABC123 This is FMD. Start treatment with...",
                )
                .await;
                return Ok(());
            }

            match self.store.get(&case_id).await? {
                Some(_) => {
                    let applied = self
                        .record_advice(&case_id, &advice, message)
                        .await?;
                    if !applied {
                        self.reply(
                            message,
                            &format!("⚠️ Case #{case_id} has already been answered."),
                        )
                        .await;
                    }
                }
                None => {
                    self.reply(message, &format!("⚠️ Case #{case_id} not found."))
                        .await;
                }
            }
            return Ok(());
        }

        // 3. Channel status commands.
        match command_word(&message.text) {
            Some("/start") => {
                self.reply(
                    message,
                    "👋 Veterinary Response Bot\n\
                     \n\
                     I post emergency livestock cases here and relay your \
                     answers back to the farmer.\n\
                     \n\
                     To answer a case:\n\
                     - reply directly to the case message, or\n\
                     - use: /respond [case_id] [your diagnosis/advice]\n\
                     \n\
                     Other commands: /active, /stats",
                )
                .await;
                return Ok(());
            }
            Some("/active") => {
                let summary = active_summary(&self.store.active_cases().await?);
                self.reply(message, &summary).await;
                return Ok(());
            }
            Some("/stats") => {
                let summary = stats_summary(&self.store.stats().await?);
                self.reply(message, &summary).await;
                return Ok(());
            }
            _ => {}
        }

        // 4. Free-text mention of an active case id.
        let upper = message.text.to_uppercase();
        for case in self.store.active_cases().await? {
            if upper.contains(&case.case_id) {
                self.record_response(&case.case_id, message).await?;
                return Ok(());
            }
        }

        // 5. Looks like advice but matches nothing: tell the vet how to
        //    attach it to a case. Anything else is ordinary chatter.
        let lower = message.text.to_lowercase();
        if ADVICE_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
            self.reply(
                message,
                "⚠️ I see you're providing advice, but I don't know which case it is for.\n\
                 Please reply directly to the case message, include the case id, or use:\n\
                 /respond [case_id] [advice]",
            )
            .await;
        }

        Ok(())
    }

    /// Record the full message text as the expert response.
    async fn record_response(&self, case_id: &str, message: &GatewayMessage) -> Result<bool> {
        self.record_advice(case_id, &message.text, message).await
    }

    /// Apply the `awaiting_expert -> expert_responded` transition. First
    /// valid reply wins; a duplicate is a no-op and the original responder
    /// stays recorded.
    async fn record_advice(
        &self,
        case_id: &str,
        advice: &str,
        message: &GatewayMessage,
    ) -> Result<bool> {
        let response = ExpertResponse {
            text: advice,
            expert_name: &message.sender_name,
            expert_id: &message.sender_id,
        };

        let applied = self.store.mark_expert_response(case_id, &response).await?;
        if applied {
            self.reply(
                message,
                &format!(
                    "✅ Thank you Dr. {}! Response for Case #{case_id} recorded.\n\
                     The farmer will be notified shortly.",
                    message.sender_name
                ),
            )
            .await;
        } else {
            tracing::debug!(case_id = %case_id, "ignoring reply to case not awaiting an expert");
        }

        Ok(applied)
    }

    /// Best-effort acknowledgment back into the channel the message came
    /// from. A failed confirmation never fails the reconciliation itself.
    async fn reply(&self, message: &GatewayMessage, text: &str) {
        if let Err(error) = self.gateway.send_message(message.channel, text, None).await {
            tracing::warn!(%error, "failed to send expert-channel acknowledgment");
        }
    }
}

/// First word of the message when it is a command, with any `@botname`
/// suffix stripped.
fn command_word(text: &str) -> Option<&str> {
    let word = text.split_whitespace().next()?;
    let word = word.split('@').next().unwrap_or(word);
    word.starts_with('/').then_some(word)
}

/// Parse `/respond <case_id> <advice>`. The case id is case-insensitive;
/// the advice is the remainder of the message.
fn parse_respond_command(text: &str) -> Option<(String, String)> {
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    let command = command.split('@').next().unwrap_or(command);
    if !command.eq_ignore_ascii_case("/respond") {
        return None;
    }

    let case_id = parts.next().unwrap_or_default().to_uppercase();
    if case_id.is_empty() {
        return Some((String::new(), String::new()));
    }

    let advice = parts.collect::<Vec<_>>().join(" ");
    Some((case_id, advice))
}

fn active_summary(cases: &[EmergencyCase]) -> String {
    if cases.is_empty() {
        return "No active emergency cases.".to_string();
    }

    let mut summary = format!("📋 Active Emergency Cases ({})\n", cases.len());
    for case in cases {
        summary.push_str(&format!(
            "\n#{} - {} ({}) - farmer {} - {}",
            case.case_id, case.detected_condition, case.severity, case.requester_name, case.state,
        ));
    }
    summary
}

fn stats_summary(stats: &CaseStats) -> String {
    let mut summary = format!("📊 Emergency Case Stats\n\nTotal cases: {}", stats.total);
    for (state, count) in &stats.by_state {
        summary.push_str(&format!("\n{state}: {count}"));
    }
    summary
}

/// Spawn the reconciler's poll loop.
pub fn spawn_poll_loop(
    mut reconciler: ResponseReconciler,
    interval: Duration,
    start_delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "expert response polling started");
        tokio::time::sleep(start_delay).await;
        loop {
            if let Err(error) = reconciler.poll_once().await {
                tracing::error!(%error, "expert response poll cycle failed");
            }
            tokio::time::sleep(interval).await;
        }
    })
}
