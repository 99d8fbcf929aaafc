//! Encoding of a finished session for the stop -> summary hand-off.
//!
//! The payload is a versioned JSON envelope:
//! `{"version":1,"summary":{"id":"","title":"","startTimeMillis":...}}`.

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::types::TrackingSession;

pub const HANDOFF_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    summary: &'a TrackingSession,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    summary: serde_json::Value,
}

pub fn encode_summary(summary: &TrackingSession) -> TrackerResult<String> {
    Ok(serde_json::to_string(&EnvelopeRef {
        version: HANDOFF_VERSION,
        summary,
    })?)
}

pub fn decode_summary(encoded: &str) -> TrackerResult<TrackingSession> {
    let envelope: Envelope = serde_json::from_str(encoded)?;
    if envelope.version != HANDOFF_VERSION {
        return Err(TrackerError::Handoff(format!(
            "Unsupported summary version {} (expected {})",
            envelope.version, HANDOFF_VERSION
        )));
    }
    Ok(serde_json::from_value(envelope.summary)?)
}
