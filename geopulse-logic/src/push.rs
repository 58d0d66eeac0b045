use anyhow::bail;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{UtcDT, prelude::*};

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A notification received from the messaging backend.
///
/// Content and identity are fixed at construction, the presentation flags (`in_app`,
/// `stateful`, `use_as_alert`, `silent`, `alert_text`) may be changed by the host afterwards.
///
/// The wire form is a JSON object with camelCase keys. Server and expiry times are epoch
/// milliseconds. `received_time` never goes on the wire, it's stamped when the message is
/// constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default = "generate_id")]
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    topic: String,
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    server_time: Option<UtcDT>,
    #[serde(
        rename = "expireAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    expire_time: Option<UtcDT>,
    #[serde(skip, default = "Utc::now")]
    received_time: UtcDT,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_id: Option<String>,
    /// Show the message inside the host while it's in the foreground
    #[serde(default)]
    pub in_app: bool,
    /// The message replaces earlier messages on the same topic
    #[serde(default)]
    pub stateful: bool,
    /// Present the message as a system alert
    #[serde(default)]
    pub use_as_alert: bool,
    /// Deliver without any user visible notification
    #[serde(default)]
    pub silent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_text: Option<String>,
}

impl PushMessage {
    /// Decode raw bytes as delivered by the backend. A JSON object is read as a full message,
    /// any other UTF-8 payload becomes the body of a plain text message.
    pub fn from_bytes(bytes: &[u8], topic: impl Into<String>) -> Result<Self> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(json)) => Self::from_json(json, topic),
            _ => {
                let text = std::str::from_utf8(bytes).context("Push payload is not UTF-8")?;
                Ok(Self::from_text(text, topic))
            }
        }
    }

    /// Build from an already parsed JSON object
    pub fn from_json(json: Map<String, Value>, topic: impl Into<String>) -> Result<Self> {
        let mut msg: Self = serde_json::from_value(Value::Object(json))
            .context("Push payload has an invalid shape")?;
        if msg.id.is_empty() {
            bail!("Push message has an empty id");
        }
        msg.topic = topic.into();
        Ok(msg)
    }

    pub fn from_text(content: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::from_text_with_data(content, Map::new(), topic)
    }

    pub fn from_text_with_data(
        content: impl Into<String>,
        data: Map<String, Value>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            body: content.into(),
            data,
            topic: topic.into(),
            server_time: None,
            expire_time: None,
            received_time: Utc::now(),
            sender_id: None,
            sent_id: None,
            in_app: false,
            stateful: false,
            use_as_alert: false,
            silent: false,
            alert_text: None,
        }
    }

    /// Serialize back to the wire form, for persisting or forwarding
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize push message")
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn server_time(&self) -> Option<UtcDT> {
        self.server_time
    }

    pub fn expire_time(&self) -> Option<UtcDT> {
        self.expire_time
    }

    pub fn received_time(&self) -> UtcDT {
        self.received_time
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    pub fn sent_id(&self) -> Option<&str> {
        self.sent_id.as_deref()
    }

    pub fn is_expired(&self) -> bool {
        self.expire_time.is_some_and(|expiry| Utc::now() > expiry)
    }
}
