//! Notification sweep: relays recorded expert responses to farmers.
//!
//! A periodic batch pass over every case in `expert_responded`. Delivery is
//! at-least-once: the case is only closed after the farmer channel accepts
//! the message, so a failed send simply leaves the case for the next sweep.

use crate::error::Result;
use crate::escalation::store::CaseStore;
use crate::escalation::types::{CaseState, EmergencyCase};
use crate::gateway::{ChannelId, Gateway};

use anyhow::Context as _;
use std::sync::Arc;
use std::time::Duration;

pub struct NotificationSweep {
    store: CaseStore,
    /// Farmer-facing gateway. Distinct bot identity from the expert channel's.
    gateway: Arc<dyn Gateway>,
}

impl NotificationSweep {
    pub fn new(store: CaseStore, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Relay every due expert response to its farmer. One case's failure
    /// never blocks the others.
    pub async fn sweep_once(&self) -> Result<()> {
        let due = self.store.list_in_state(CaseState::ExpertResponded).await?;

        for case in due {
            if let Err(error) = self.notify_farmer(&case).await {
                tracing::error!(case_id = %case.case_id, %error, "failed to notify farmer, will retry next sweep");
            }
        }

        Ok(())
    }

    async fn notify_farmer(&self, case: &EmergencyCase) -> Result<()> {
        let channel: ChannelId = case
            .requester_id
            .parse()
            .with_context(|| format!("requester id '{}' is not a channel id", case.requester_id))?;

        let notification = farmer_notification(case);
        self.gateway
            .send_message(channel, &notification, None)
            .await?;

        // Close only after the channel accepted the send. If this write
        // fails the farmer may be notified again next sweep.
        self.store.mark_completed(&case.case_id).await?;
        tracing::info!(case_id = %case.case_id, requester_id = %case.requester_id, "farmer notified of expert response");

        Ok(())
    }
}

/// Farmer-facing relay of the expert's answer.
fn farmer_notification(case: &EmergencyCase) -> String {
    let expert_name = case.expert_name.as_deref().unwrap_or("the veterinary team");
    let response = case.expert_response_text.as_deref().unwrap_or_default();

    format!(
        "✅ Expert Veterinary Guidance Received\n\
         \n\
         Case ID: #{case_id}\n\
         Disease: {disease}\n\
         Expert Vet: Dr. {expert_name}\n\
         \n\
         Diagnosis & Treatment Plan:\n\
         {response}\n\
         \n\
         ---\n\
         This expert advice was provided by a licensed veterinarian. Follow \
         the instructions carefully and contact your local vet if you have \
         questions.",
        case_id = case.case_id,
        disease = case.detected_condition,
    )
}

/// Spawn the sweep loop. Independent of the reconciler's poll loop because
/// the two have different failure domains.
pub fn spawn_sweep_loop(
    sweep: NotificationSweep,
    interval: Duration,
    start_delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "farmer notification sweep started");
        tokio::time::sleep(start_delay).await;
        loop {
            if let Err(error) = sweep.sweep_once().await {
                tracing::error!(%error, "notification sweep cycle failed");
            }
            tokio::time::sleep(interval).await;
        }
    })
}
