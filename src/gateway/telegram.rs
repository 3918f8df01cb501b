//! Telegram Bot API gateway adapter.
//!
//! Talks to the Bot API directly over HTTPS. Each adapter instance is bound
//! to one bot token, so the farmer-facing bot and the emergency bot are two
//! separate instances with independent update cursors.

use crate::gateway::{ChannelId, Gateway, GatewayError, GatewayMessage, ImageRef, MessageRef};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Request timeout for all Bot API calls. Long polling is not used; the
/// reconciler and farmer listener poll on their own intervals.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TelegramGateway {
    http: reqwest::Client,
    api_base: String,
}

impl TelegramGateway {
    pub fn new(token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_base: format!("https://api.telegram.org/bot{token}"),
        }
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, GatewayError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            // A group upgraded to a supergroup reports the replacement chat id.
            if let Some(new_chat_id) = payload
                .pointer("/parameters/migrate_to_chat_id")
                .and_then(Value::as_i64)
            {
                return Err(GatewayError::ChannelRelocated {
                    new_channel: ChannelId(new_chat_id),
                });
            }

            let description = payload
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown Bot API error");
            return Err(GatewayError::Transport(format!("{method}: {description}")));
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
        image: Option<&ImageRef>,
    ) -> Result<MessageRef, GatewayError> {
        let result = match image {
            Some(image) => {
                self.call(
                    "sendPhoto",
                    serde_json::json!({
                        "chat_id": channel.0,
                        "photo": image.0,
                        "caption": text,
                    }),
                )
                .await?
            }
            None => {
                self.call(
                    "sendMessage",
                    serde_json::json!({
                        "chat_id": channel.0,
                        "text": text,
                    }),
                )
                .await?
            }
        };

        let message_id = result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                GatewayError::Transport("send result missing message_id".to_string())
            })?;

        Ok(MessageRef(message_id))
    }

    async fn fetch_new_messages(
        &self,
        cursor: i64,
    ) -> Result<(Vec<GatewayMessage>, i64), GatewayError> {
        let result = self
            .call(
                "getUpdates",
                serde_json::json!({
                    "offset": cursor,
                    "timeout": 0,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;

        let updates = result.as_array().cloned().unwrap_or_default();
        let mut next_cursor = cursor;
        let mut messages = Vec::new();

        for update in &updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                next_cursor = next_cursor.max(update_id + 1);
            }

            if let Some(message) = parse_message(update) {
                messages.push(message);
            }
        }

        Ok((messages, next_cursor))
    }
}

/// Map one `getUpdates` entry to a [`GatewayMessage`]. Non-message updates
/// and messages with neither text, caption, nor photo are dropped.
fn parse_message(update: &Value) -> Option<GatewayMessage> {
    let message = update.get("message")?;

    let id = MessageRef(message.get("message_id").and_then(Value::as_i64)?);
    let channel = ChannelId(message.pointer("/chat/id").and_then(Value::as_i64)?);

    let sender_id = message
        .pointer("/from/id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();
    let sender_name = message
        .pointer("/from/first_name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let reply_to = message
        .pointer("/reply_to_message/message_id")
        .and_then(Value::as_i64)
        .map(MessageRef);

    // Telegram lists photo sizes smallest-first; the last entry is the
    // original resolution.
    let image = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
        .and_then(|size| size.get("file_id"))
        .and_then(Value::as_str)
        .map(|file_id| ImageRef(file_id.to_string()));

    if text.is_empty() && image.is_none() {
        return None;
    }

    Some(GatewayMessage {
        id,
        channel,
        sender_id,
        sender_name,
        text,
        reply_to,
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_extracts_reply_and_photo() {
        let update = serde_json::json!({
            "update_id": 42,
            "message": {
                "message_id": 7,
                "chat": { "id": -100123 },
                "from": { "id": 55, "first_name": "Amina" },
                "caption": "sick cow",
                "reply_to_message": { "message_id": 3 },
                "photo": [
                    { "file_id": "small" },
                    { "file_id": "large" }
                ]
            }
        });

        let message = parse_message(&update).expect("should parse");
        assert_eq!(message.id, MessageRef(7));
        assert_eq!(message.channel, ChannelId(-100123));
        assert_eq!(message.sender_id, "55");
        assert_eq!(message.sender_name, "Amina");
        assert_eq!(message.text, "sick cow");
        assert_eq!(message.reply_to, Some(MessageRef(3)));
        assert_eq!(message.image, Some(ImageRef("large".to_string())));
    }

    #[test]
    fn parse_message_drops_empty_updates() {
        let update = serde_json::json!({
            "update_id": 43,
            "message": {
                "message_id": 8,
                "chat": { "id": 1 },
                "from": { "id": 2, "first_name": "B" }
            }
        });

        assert!(parse_message(&update).is_none());
    }
}
