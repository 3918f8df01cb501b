//! In-memory gateway fake shared by the escalation unit tests.

use crate::gateway::{ChannelId, Gateway, GatewayError, GatewayMessage, ImageRef, MessageRef};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

/// A message captured by [`RecordingGateway::send_message`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel: ChannelId,
    pub text: String,
    pub image: Option<ImageRef>,
}

/// How a scripted failure presents.
#[derive(Debug, Clone)]
pub enum FailMode {
    Transport,
    Relocated(ChannelId),
}

impl FailMode {
    fn into_error(self) -> GatewayError {
        match self {
            FailMode::Transport => GatewayError::Transport("scripted failure".to_string()),
            FailMode::Relocated(new_channel) => GatewayError::ChannelRelocated { new_channel },
        }
    }
}

/// Gateway fake that records outbound messages and serves scripted inbound
/// ones. Inbound messages keep their update ids forever, so re-polling with
/// an unchanged cursor yields the same batch, matching the real transport.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<SentMessage>>,
    send_failures: Mutex<VecDeque<FailMode>>,
    fetch_failures: Mutex<VecDeque<FailMode>>,
    inbound: Mutex<Vec<(i64, GatewayMessage)>>,
    next_message_id: AtomicI64,
    next_update_id: AtomicI64,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            next_update_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    /// Queue a failure for the next `send_message` call.
    pub async fn fail_next_send(&self, mode: FailMode) {
        self.send_failures.lock().await.push_back(mode);
    }

    /// Queue a failure for the next `fetch_new_messages` call.
    pub async fn fail_next_fetch(&self, mode: FailMode) {
        self.fetch_failures.lock().await.push_back(mode);
    }

    /// Script an inbound message, assigning it the next update id.
    pub async fn push_inbound(&self, message: GatewayMessage) {
        let update_id = self.next_update_id.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().await.push((update_id, message));
    }

    /// Everything sent so far.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
        image: Option<&ImageRef>,
    ) -> Result<MessageRef, GatewayError> {
        if let Some(mode) = self.send_failures.lock().await.pop_front() {
            return Err(mode.into_error());
        }

        self.sent.lock().await.push(SentMessage {
            channel,
            text: text.to_string(),
            image: image.cloned(),
        });

        Ok(MessageRef(self.next_message_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn fetch_new_messages(
        &self,
        cursor: i64,
    ) -> Result<(Vec<GatewayMessage>, i64), GatewayError> {
        if let Some(mode) = self.fetch_failures.lock().await.pop_front() {
            return Err(mode.into_error());
        }

        let inbound = self.inbound.lock().await;
        let mut next_cursor = cursor;
        let mut messages = Vec::new();
        for (update_id, message) in inbound.iter() {
            if *update_id >= cursor {
                next_cursor = next_cursor.max(update_id + 1);
                messages.push(message.clone());
            }
        }

        Ok((messages, next_cursor))
    }
}

/// Build an expert-channel message for tests.
pub fn expert_message(
    id: i64,
    channel: ChannelId,
    sender_id: &str,
    sender_name: &str,
    text: &str,
    reply_to: Option<MessageRef>,
) -> GatewayMessage {
    GatewayMessage {
        id: MessageRef(id),
        channel,
        sender_id: sender_id.to_string(),
        sender_name: sender_name.to_string(),
        text: text.to_string(),
        reply_to,
        image: None,
    }
}
