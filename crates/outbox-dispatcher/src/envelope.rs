//! Publish envelope.
//!
//! Wire shape: `{"action": "...", "data": <payload>, "traceparent": "..."}`.
//! A payload that is valid JSON is embedded as-is, so consumers see a nested
//! value rather than an escaped string. Anything else is embedded as a JSON
//! string.

use crate::error::DispatchResult;
use outbox_database::OutboxEntry;
use serde::Serialize;
use serde_json::value::RawValue;

/// Message sent to the broker for one outbox entry.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub action: String,
    pub data: Box<RawValue>,
    /// Empty when the entry was recorded without a trace context.
    pub traceparent: String,
}

impl Envelope {
    /// Build the envelope for an entry. The payload is never re-encoded.
    pub fn build(entry: &OutboxEntry) -> DispatchResult<Self> {
        Ok(Self {
            action: entry.action.clone(),
            data: embed_payload(&entry.payload)?,
            traceparent: entry.traceparent.clone().unwrap_or_default(),
        })
    }

    pub fn to_bytes(&self) -> DispatchResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn embed_payload(payload: &str) -> DispatchResult<Box<RawValue>> {
    match RawValue::from_string(payload.to_string()) {
        Ok(raw) => Ok(raw),
        Err(_) => Ok(RawValue::from_string(serde_json::to_string(payload)?)?),
    }
}
