//! Configuration: TOML file plus environment-variable overrides.
//!
//! A missing expert-channel configuration is not fatal: the bot runs
//! degraded with emergency escalation disabled, and says so loudly at
//! startup.

use crate::gateway::ChannelId;

use anyhow::Context as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Directory for the SQLite database. Defaults to `./data`.
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    /// Token of the farmer-facing bot.
    pub farmer_bot_token: Option<String>,
    /// Token of the emergency bot posting into the vet group.
    pub emergency_bot_token: Option<String>,
    /// Chat id of the vet group.
    pub expert_group_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentsConfig {
    /// Endpoint of the external agent (text-generation) service.
    pub service_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Interval between expert-channel polls.
    pub poll_interval_secs: u64,
    /// Interval between farmer-notification sweeps.
    pub sweep_interval_secs: u64,
    /// Delay before the first poll/sweep after startup.
    pub start_delay_secs: u64,
    /// Interval between farmer-channel polls.
    pub farmer_poll_interval_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            sweep_interval_secs: 30,
            start_delay_secs: 10,
            farmer_poll_interval_secs: 2,
        }
    }
}

/// Everything required to run the escalation feature.
pub struct EscalationSettings {
    pub emergency_bot_token: String,
    pub expert_channel: ChannelId,
}

impl Config {
    /// Load configuration from the given TOML file (or `farmpilot.toml` in
    /// the working directory when present), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let default_path = PathBuf::from("farmpilot.toml");
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None if default_path.exists() => Some(default_path),
            None => None,
        };

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config: {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the file, matching the
    /// deployment convention of the hosted bot.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
            self.telegram.farmer_bot_token = Some(token);
        }
        if let Ok(token) = std::env::var("TELEGRAM_TOKEN_EMERGENCY_BOT") {
            self.telegram.emergency_bot_token = Some(token);
        }
        if let Ok(chat_id) = std::env::var("VET_GROUP_CHAT_ID") {
            match chat_id.parse() {
                Ok(chat_id) => self.telegram.expert_group_chat_id = Some(chat_id),
                Err(_) => tracing::warn!(%chat_id, "VET_GROUP_CHAT_ID is not a chat id, ignoring"),
            }
        }
        if let Ok(url) = std::env::var("AGENT_SERVICE_URL") {
            self.agents.service_url = Some(url);
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// The escalation feature's settings, when fully configured.
    pub fn escalation_settings(&self) -> Option<EscalationSettings> {
        let token = self.telegram.emergency_bot_token.clone()?;
        let chat_id = self.telegram.expert_group_chat_id?;
        Some(EscalationSettings {
            emergency_bot_token: token,
            expert_channel: ChannelId(chat_id),
        })
    }
}
