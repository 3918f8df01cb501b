//! Farmer request path.
//!
//! One inbound farmer message produces exactly one reply: the specialist's
//! ordinary response, an emergency acknowledgment with a case id, or an
//! apologetic failure notice. Never a raw error, never silence.

use crate::escalation::{EmergencyDetector, EscalationCoordinator, Requester};
use crate::gateway::{ChannelId, Gateway, ImageRef};
use crate::specialist::{Specialist, SpecialistError, generate_with_retry};

use std::sync::Arc;
use std::time::Duration;

/// Retries for transient specialist faults before giving up on a request.
const MAX_SPECIALIST_RETRIES: u32 = 2;

/// One farmer message, normalized from the transport.
#[derive(Debug, Clone)]
pub struct FarmerMessage {
    pub channel: ChannelId,
    pub sender: Requester,
    pub conversation_ref: String,
    pub text: String,
    pub image: Option<ImageRef>,
}

pub struct RequestPipeline {
    specialist: Arc<dyn Specialist>,
    detector: EmergencyDetector,
    /// `None` when the escalation feature is disabled by configuration; the
    /// bot then runs degraded: emergency blocks are still stripped from
    /// replies, but no case is created.
    coordinator: Option<Arc<EscalationCoordinator>>,
}

impl RequestPipeline {
    pub fn new(
        specialist: Arc<dyn Specialist>,
        coordinator: Option<Arc<EscalationCoordinator>>,
    ) -> Self {
        Self {
            specialist,
            detector: EmergencyDetector::new(),
            coordinator,
        }
    }

    /// Produce the reply for one farmer message.
    pub async fn handle_farmer_message(&self, message: &FarmerMessage) -> String {
        let response = match generate_with_retry(
            self.specialist.as_ref(),
            &message.conversation_ref,
            &message.text,
            message.image.as_ref(),
            MAX_SPECIALIST_RETRIES,
        )
        .await
        {
            Ok(response) => response,
            Err(SpecialistError::Transient(reason)) => {
                tracing::error!(%reason, "specialist unavailable after retries");
                return apology();
            }
            Err(SpecialistError::Permanent(reason)) => {
                tracing::error!(%reason, "specialist request failed");
                return apology();
            }
        };

        let fields = match self.detector.detect(&response) {
            Some(fields) => fields,
            None => return response,
        };
        let visible = self.detector.extract_visible_text(&response);

        let coordinator = match &self.coordinator {
            Some(coordinator) => coordinator,
            None => {
                // Escalation is disabled; the raw block markers still never
                // reach the farmer.
                tracing::warn!(disease = %fields.disease, "emergency detected but escalation is disabled");
                return visible_or_urgent_notice(visible, &fields.disease);
            }
        };

        let ticket = coordinator
            .escalate(
                &message.sender,
                &message.conversation_ref,
                &message.text,
                &fields,
                message.image.as_ref(),
            )
            .await;

        if ticket.posted {
            emergency_acknowledgment(&ticket.case_id, &fields.disease, visible)
        } else {
            // The case never reached the vets; give the farmer the
            // specialist's own instructions rather than a false promise of
            // expert review. The raw emergency block stays hidden, and a
            // block-only response still produces a non-empty reply.
            tracing::error!(case_id = %ticket.case_id, "escalation failed, sending specialist instructions only");
            visible_or_urgent_notice(visible, &fields.disease)
        }
    }
}

fn apology() -> String {
    "⚠️ Sorry, I couldn't get a response from the specialist. Please try again.".to_string()
}

/// The specialist's visible instructions, or an urgent-care notice when the
/// response was the emergency block alone.
fn visible_or_urgent_notice(visible: &str, disease: &str) -> String {
    if visible.is_empty() {
        format!(
            "🚨 URGENT: A serious condition ({disease}) may be affecting your \
             animal. Please contact your local veterinarian immediately."
        )
    } else {
        visible.to_string()
    }
}

fn emergency_acknowledgment(case_id: &str, disease: &str, visible: &str) -> String {
    let mut text = format!(
        "🚨 URGENT: Serious Condition Detected\n\
         \n\
         Case ID: #{case_id}\n\
         Suspected Disease: {disease}\n\
         \n\
         Your case has been escalated to our expert veterinary team for \
         immediate review. You will receive their guidance within 30 minutes."
    );
    if !visible.is_empty() {
        text.push_str("\n\n");
        text.push_str(visible);
    }
    text
}

/// Spawn the farmer-channel listener: poll the farmer bot for new messages,
/// run each through the pipeline, and send the reply back to the same chat.
pub fn spawn_farmer_listener(
    pipeline: Arc<RequestPipeline>,
    gateway: Arc<dyn Gateway>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("farmer listener started");
        let mut cursor = 0i64;
        loop {
            match gateway.fetch_new_messages(cursor).await {
                Ok((messages, next_cursor)) => {
                    cursor = next_cursor;
                    for message in messages {
                        let farmer_message = FarmerMessage {
                            channel: message.channel,
                            sender: Requester {
                                id: message.sender_id.clone(),
                                name: message.sender_name.clone(),
                            },
                            conversation_ref: format!("telegram-{}", message.sender_id),
                            text: message.text,
                            image: message.image,
                        };

                        let reply = pipeline.handle_farmer_message(&farmer_message).await;
                        if let Err(error) = gateway
                            .send_message(farmer_message.channel, &reply, None)
                            .await
                        {
                            tracing::error!(
                                channel = %farmer_message.channel,
                                %error,
                                "failed to deliver reply to farmer"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "farmer channel poll failed, retrying next interval");
                }
            }

            tokio::time::sleep(interval).await;
        }
    })
}
