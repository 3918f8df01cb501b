//! Two-channel messaging gateway.
//!
//! The escalation subsystem talks to two conversation surfaces through this
//! trait: the farmer channel (one conversation per farmer) and the expert
//! channel (one shared group). The Telegram adapter lives in
//! [`telegram`]; tests inject in-memory fakes.

pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Channel-native conversation identifier. For Telegram this is a chat id;
/// a farmer's one-to-one chat and the expert group are both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ChannelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(ChannelId)
    }
}

/// Channel-native message identifier. Used as the correlation key between a
/// posted case notice and the expert's reply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub i64);

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque reference to an image held by the transport (a Telegram file id).
/// The gateway re-sends by reference; bytes never pass through this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(pub String);

/// One inbound message as seen by a polling consumer.
#[derive(Debug, Clone)]
pub struct GatewayMessage {
    pub id: MessageRef,
    /// Channel the message arrived on.
    pub channel: ChannelId,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    /// Set when the message is a reply to an earlier message in the channel.
    pub reply_to: Option<MessageRef>,
    /// Set when the message carries a photo.
    pub image: Option<ImageRef>,
}

/// Gateway transport faults.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The channel's underlying identity changed (a Telegram group upgraded
    /// to a supergroup). Carries the replacement channel; the caller may
    /// retry once against it.
    #[error("channel relocated to {new_channel}")]
    ChannelRelocated { new_channel: ChannelId },

    #[error("transport error: {0}")]
    Transport(String),
}

/// A messaging gateway bound to one bot identity.
///
/// All operations carry the transport's own bounded timeouts; none may block
/// the event loop indefinitely.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send a message, optionally attaching an image by reference. Returns
    /// the channel-native id of the sent message.
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
        image: Option<&ImageRef>,
    ) -> Result<MessageRef, GatewayError>;

    /// Fetch messages that arrived since `cursor`, across all channels this
    /// bot identity can see. Returns the messages and the advanced cursor;
    /// re-polling with an unchanged cursor yields the same messages.
    async fn fetch_new_messages(
        &self,
        cursor: i64,
    ) -> Result<(Vec<GatewayMessage>, i64), GatewayError>;
}
