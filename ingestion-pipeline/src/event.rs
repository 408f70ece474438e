//! Storage change notifications, delivered either as Pub/Sub push envelopes or as plain JSON.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{error::AppError, storage::document_uri::DocumentUri};
use serde::Deserialize;
use serde_json::Value;

/// Cloud Storage notification type for a newly written object.
const OBJECT_FINALIZE: &str = "OBJECT_FINALIZE";

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// An object-level storage event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    #[serde(rename = "objectName", alias = "name")]
    pub object_name: String,
    /// Fingerprint reported by the storage service; informational only.
    #[serde(default, rename = "contentFingerprint", alias = "md5Hash")]
    pub content_fingerprint: Option<String>,
}

impl StorageEvent {
    /// Document reference for the event, checked against the configured bucket.
    pub fn document_uri(&self, bucket: &str) -> Result<DocumentUri, AppError> {
        DocumentUri::parse(&format!("gs://{}/{}", self.bucket, self.object_name), bucket)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Object(StorageEvent),
    /// Delivered but not actionable, with the reason.
    Ignored(String),
}

pub fn decode_event(body: &[u8]) -> Result<DecodedEvent, AppError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("event body is not JSON: {e}")))?;

    let event = if value.get("message").is_some() {
        let envelope: PushEnvelope = serde_json::from_value(value)
            .map_err(|e| AppError::Validation(format!("malformed push envelope: {e}")))?;

        if let Some(event_type) = envelope.message.attributes.get("eventType") {
            if event_type != OBJECT_FINALIZE {
                return Ok(DecodedEvent::Ignored(format!("event type {event_type}")));
            }
        }

        let data = envelope
            .message
            .data
            .ok_or_else(|| AppError::Validation("push message has no data".into()))?;
        let decoded = STANDARD
            .decode(data.trim())
            .map_err(|e| AppError::Validation(format!("push data is not base64: {e}")))?;

        serde_json::from_slice::<StorageEvent>(&decoded)
            .map_err(|e| AppError::Validation(format!("malformed storage event: {e}")))?
    } else {
        serde_json::from_value::<StorageEvent>(value)
            .map_err(|e| AppError::Validation(format!("malformed storage event: {e}")))?
    };

    if event.object_name.is_empty() || event.object_name.ends_with('/') {
        return Ok(DecodedEvent::Ignored(format!(
            "folder placeholder {}",
            event.object_name
        )));
    }

    Ok(DecodedEvent::Object(event))
}
