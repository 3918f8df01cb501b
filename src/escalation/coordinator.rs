//! Escalation coordinator: creates cases and posts them to the expert channel.
//!
//! This is the only component that ever writes the expert channel. It never
//! mutates farmer-facing state beyond handing back a case id and a posted
//! flag; the request pipeline decides what the farmer sees.

use crate::escalation::store::CaseStore;
use crate::escalation::types::{EmergencyFields, Requester};
use crate::gateway::{ChannelId, Gateway, GatewayError, ImageRef, MessageRef};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Case id handed to the caller when the store write itself failed. The
/// farmer still gets an acknowledgment; the sentinel makes the failure
/// greppable in logs.
pub const UNRECORDED_CASE_ID: &str = "UNRECORDED";

/// Outcome of an escalation attempt. The caller must surface *some* reply to
/// the farmer in every variant, never silence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationTicket {
    pub case_id: String,
    /// Whether the case reached the expert channel (`awaiting_expert`).
    pub posted: bool,
}

pub struct EscalationCoordinator {
    store: CaseStore,
    gateway: Arc<dyn Gateway>,
    /// Cached expert-channel id. Replaced in place when the transport reports
    /// the channel relocated.
    expert_channel: RwLock<ChannelId>,
}

impl EscalationCoordinator {
    pub fn new(store: CaseStore, gateway: Arc<dyn Gateway>, expert_channel: ChannelId) -> Self {
        Self {
            store,
            gateway,
            expert_channel: RwLock::new(expert_channel),
        }
    }

    /// The currently cached expert channel id.
    pub async fn expert_channel(&self) -> ChannelId {
        *self.expert_channel.read().await
    }

    /// Create a case for a detected emergency and post it to the expert
    /// channel.
    ///
    /// Failure handling, step by step:
    /// - store write fails: sentinel case id, `posted = false`;
    /// - image attach fails: fall back to a text-only notice;
    /// - channel relocated: cache the new id and retry exactly once;
    /// - any other post failure: case stays `pending_review`, `posted = false`.
    pub async fn escalate(
        &self,
        requester: &Requester,
        conversation_ref: &str,
        query: &str,
        fields: &EmergencyFields,
        image: Option<&ImageRef>,
    ) -> EscalationTicket {
        let case_id = match self
            .store
            .create(requester, conversation_ref, query, fields, image)
            .await
        {
            Ok(case_id) => case_id,
            Err(error) => {
                tracing::error!(%error, "failed to create emergency case");
                return EscalationTicket {
                    case_id: UNRECORDED_CASE_ID.to_string(),
                    posted: false,
                };
            }
        };

        let notice = expert_notice(&case_id, requester, query, fields);

        let message_ref = match self.post_notice(&notice, image).await {
            Ok(message_ref) => message_ref,
            Err(error) => {
                // The case stays in pending_review with no post recorded.
                tracing::error!(case_id = %case_id, %error, "failed to post case to expert channel");
                return EscalationTicket {
                    case_id,
                    posted: false,
                };
            }
        };

        match self.store.mark_expert_posted(&case_id, message_ref).await {
            Ok(true) => EscalationTicket {
                case_id,
                posted: true,
            },
            Ok(false) => {
                tracing::error!(case_id = %case_id, "case left pending_review: posted transition did not apply");
                EscalationTicket {
                    case_id,
                    posted: false,
                }
            }
            Err(error) => {
                tracing::error!(case_id = %case_id, %error, "failed to record expert-channel post");
                EscalationTicket {
                    case_id,
                    posted: false,
                }
            }
        }
    }

    /// Post the notice, retrying once when the expert channel has relocated.
    async fn post_notice(
        &self,
        notice: &str,
        image: Option<&ImageRef>,
    ) -> Result<MessageRef, GatewayError> {
        let channel = *self.expert_channel.read().await;

        match self.send_with_image_fallback(channel, notice, image).await {
            Ok(message_ref) => Ok(message_ref),
            Err(GatewayError::ChannelRelocated { new_channel }) => {
                tracing::warn!(
                    old_channel = %channel,
                    %new_channel,
                    "expert channel relocated, retrying once"
                );
                *self.expert_channel.write().await = new_channel;
                self.send_with_image_fallback(new_channel, notice, image)
                    .await
            }
            Err(error) => Err(error),
        }
    }

    /// Send with the image attached when one is referenced. Any attach
    /// failure other than a relocation falls back to a plain-text post.
    async fn send_with_image_fallback(
        &self,
        channel: ChannelId,
        notice: &str,
        image: Option<&ImageRef>,
    ) -> Result<MessageRef, GatewayError> {
        if let Some(image) = image {
            match self.gateway.send_message(channel, notice, Some(image)).await {
                Ok(message_ref) => return Ok(message_ref),
                Err(relocated @ GatewayError::ChannelRelocated { .. }) => return Err(relocated),
                Err(error) => {
                    tracing::warn!(%error, "failed to attach image, posting text-only");
                }
            }
        }

        self.gateway.send_message(channel, notice, None).await
    }
}

/// Human-readable case notice for the expert channel, including instructions
/// on how to respond.
fn expert_notice(
    case_id: &str,
    requester: &Requester,
    query: &str,
    fields: &EmergencyFields,
) -> String {
    format!(
        "🚨 LIVESTOCK EMERGENCY CASE\n\
         \n\
         Case #{case_id}\n\
         \n\
         Disease Detected: {disease}\n\
         Severity: {severity}\n\
         Confidence: {confidence}\n\
         \n\
         Farmer: {farmer_name} (ID: {farmer_id})\n\
         Query: {query}\n\
         \n\
         AI Analysis:\n\
         {reasoning}\n\
         \n\
         ---\n\
         Instructions for Vets:\n\
         Reply to this message with your diagnosis and treatment advice,\n\
         or use: /respond {case_id} [your advice]\n\
         \n\
         The farmer will receive your guidance immediately.",
        disease = fields.disease,
        severity = fields.severity,
        confidence = fields.confidence,
        farmer_name = requester.name,
        farmer_id = requester.id,
        reasoning = fields.reasoning,
    )
}
