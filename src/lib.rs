//! farmpilot: farming-assistant chatbot daemon with human-in-the-loop
//! veterinary escalation.
//!
//! Farmer messages are answered by an external specialist service. When the
//! livestock specialist embeds an emergency block in its reply, the escalation
//! subsystem persists a case, posts it to the veterinarian group channel,
//! polls that channel for an expert's answer, and relays the answer back to
//! the farmer.

pub mod config;
pub mod db;
pub mod error;
pub mod escalation;
pub mod gateway;
pub mod pipeline;
pub mod specialist;

pub use error::{Error, Result};
pub use gateway::{ChannelId, Gateway, GatewayMessage, ImageRef, MessageRef};
