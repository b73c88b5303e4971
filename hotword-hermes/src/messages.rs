/// Hermes hotword protocol messages
///
/// Topic layout and JSON payloads for the messages this service consumes
/// (audio frames, toggles) and produces (detections, errors).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Site id used when a payload or caller doesn't name one
pub const DEFAULT_SITE_ID: &str = "default";

/// Wake-word id used when a model has no explicit id
pub const DEFAULT_WAKEWORD_ID: &str = "default";

pub const TOGGLE_ON_TOPIC: &str = "hermes/hotword/toggleOn";
pub const TOGGLE_OFF_TOPIC: &str = "hermes/hotword/toggleOff";
pub const HOTWORD_ERROR_TOPIC: &str = "hermes/error/hotword";

const AUDIO_FRAME_PREFIX: &str = "hermes/audioServer/";
const AUDIO_FRAME_SUFFIX: &str = "/audioFrame";

/// MQTT single-level wildcard
pub const SITE_WILDCARD: &str = "+";

/// Reported in every detection; models are user-trained
pub const MODEL_TYPE: &str = "personal";

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Invalid JSON payload on {topic}: {source}")]
    InvalidPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Audio frame topic for one site (or `+` for all sites)
pub fn audio_frame_topic(site_id: &str) -> String {
    format!("{AUDIO_FRAME_PREFIX}{site_id}{AUDIO_FRAME_SUFFIX}")
}

/// Extract the site id from an audio frame topic
pub fn audio_frame_site_id(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(AUDIO_FRAME_PREFIX)?
        .strip_suffix(AUDIO_FRAME_SUFFIX)
        .filter(|site_id| !site_id.is_empty() && !site_id.contains('/'))
}

/// Detection topic, parameterized by wake-word id
pub fn detected_topic(wakeword_id: &str) -> String {
    format!("hermes/hotword/{wakeword_id}/detected")
}

fn default_site_id() -> String {
    DEFAULT_SITE_ID.to_string()
}

/// Payload of `hermes/hotword/<wakewordId>/detected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotwordDetected {
    pub site_id: String,
    pub model_id: String,
    pub current_sensitivity: String,
    pub model_version: String,
    pub model_type: String,
}

/// Payload of `hermes/error/hotword`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotwordError {
    pub error: String,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_site_id")]
    pub site_id: String,
}

/// Payload of the toggle on/off topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotwordToggle {
    #[serde(default = "default_site_id")]
    pub site_id: String,
}

impl HotwordToggle {
    /// Parse a toggle payload; an empty payload means the default site
    pub fn from_payload(topic: &str, payload: &[u8]) -> Result<Self, MessageError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self {
                site_id: default_site_id(),
            });
        }

        serde_json::from_slice(payload).map_err(|source| MessageError::InvalidPayload {
            topic: topic.to_string(),
            source,
        })
    }
}

/// Result of a detection pass, ready to be published
#[derive(Debug, Clone, PartialEq)]
pub enum HotwordEvent {
    Detected {
        wakeword_id: String,
        message: HotwordDetected,
    },
    Error(HotwordError),
}

impl HotwordEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> String {
        match self {
            Self::Detected { wakeword_id, .. } => detected_topic(wakeword_id),
            Self::Error(_) => HOTWORD_ERROR_TOPIC.to_string(),
        }
    }

    pub fn site_id(&self) -> &str {
        match self {
            Self::Detected { message, .. } => &message.site_id,
            Self::Error(error) => &error.site_id,
        }
    }

    /// JSON payload (message fields only, no topic arguments)
    pub fn to_json(&self) -> Result<String, MessageError> {
        let json = match self {
            Self::Detected { message, .. } => serde_json::to_string(message)?,
            Self::Error(error) => serde_json::to_string(error)?,
        };
        Ok(json)
    }

    pub fn to_outbound(&self) -> Result<OutboundMessage, MessageError> {
        Ok(OutboundMessage {
            topic: self.topic(),
            payload: self.to_json()?.into_bytes(),
        })
    }
}

/// Serialized message addressed to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}
