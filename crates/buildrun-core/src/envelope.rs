//! Queue envelope decoding.
//!
//! A queue message is a JSON object `{"id": ..., "payload": ...}`. The payload
//! is either the job object itself or a base64 string holding it:
//!
//! ```json
//! {"function_definition": "place(0, 0, 0, \"stone\");", "metadata": {"name": "Pebble"}}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::CoreError;
use crate::job::Job;
use crate::JobId;

/// Raw message as carried by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub payload: Value,
}

/// Decoded payload of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub function_definition: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl JobPayload {
    pub fn new(function_definition: impl Into<String>) -> Self {
        Self {
            function_definition: function_definition.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Envelope {
    /// Build an envelope with a base64-encoded payload.
    pub fn encode(id: impl Into<String>, payload: &JobPayload) -> Result<Self, CoreError> {
        let json = serde_json::to_vec(payload).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Self {
            id: id.into(),
            payload: Value::String(STANDARD.encode(json)),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Parse raw message bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::EnvelopeDecode(format!("not an envelope: {}", e)))
    }

    /// Decode the payload, accepting either an inline object or base64 text.
    pub fn payload(&self) -> Result<JobPayload, CoreError> {
        let value = match &self.payload {
            Value::Object(_) => self.payload.clone(),
            Value::String(text) => decode_text_payload(text)?,
            other => {
                return Err(CoreError::EnvelopeDecode(format!(
                    "payload must be an object or string, got {}",
                    json_kind(other)
                )))
            }
        };
        serde_json::from_value(value)
            .map_err(|e| CoreError::EnvelopeDecode(format!("invalid payload: {}", e)))
    }

    /// Decode into a [`Job`].
    pub fn into_job(self) -> Result<Job, CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::EnvelopeDecode("missing job id".to_string()));
        }
        let payload = self.payload()?;
        if payload.function_definition.trim().is_empty() {
            return Err(CoreError::EnvelopeDecode(format!(
                "job {} has an empty function_definition",
                self.id
            )));
        }

        let mut job = Job::new(JobId::new(self.id), payload.function_definition);
        job.metadata = flatten_metadata(payload.metadata);
        Ok(job)
    }
}

/// Decode raw queue bytes straight into a [`Job`].
pub fn decode_job(bytes: &[u8]) -> Result<Job, CoreError> {
    Envelope::from_bytes(bytes)?.into_job()
}

fn decode_text_payload(text: &str) -> Result<Value, CoreError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| CoreError::EnvelopeDecode(format!("invalid inline payload: {}", e)));
    }
    let bytes = STANDARD
        .decode(trimmed)
        .map_err(|e| CoreError::EnvelopeDecode(format!("payload is not base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::EnvelopeDecode(format!("decoded payload is not JSON: {}", e)))
}

/// Strings stay as-is; any other JSON value is kept as its JSON text.
fn flatten_metadata(map: serde_json::Map<String, Value>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
