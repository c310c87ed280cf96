use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::FrameKind;

/// Envelope for all WebSocket communication.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization until a consumer asks for a concrete type. Replies
/// echo whichever correlation field the request carried, under the same
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub timestamp: DateTime<Utc>,
    /// Correlation id for acknowledged application sends.
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Correlation id for liveness probes.
    #[serde(rename = "healthCheckId", skip_serializing_if = "Option::is_none")]
    pub health_check_id: Option<String>,
    /// Correlation id for latency probes.
    #[serde(rename = "latencyId", skip_serializing_if = "Option::is_none")]
    pub latency_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
    /// Coalesced frames carried by a `batch` envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Frame>>,
}

impl Frame {
    /// Creates a frame of the given kind, stamped with the current time.
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            message_id: None,
            health_check_id: None,
            latency_id: None,
            payload: None,
            messages: None,
        }
    }

    /// Creates an application frame from its wire type string.
    pub fn app(kind: impl Into<String>) -> Self {
        Self::new(FrameKind::Other(kind.into()))
    }

    /// Creates a frame with a serialized payload.
    pub fn with_payload<T: Serialize>(
        kind: FrameKind,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(payload)?;
        let mut frame = Self::new(kind);
        frame.payload = Some(serde_json::value::RawValue::from_string(json)?);
        Ok(frame)
    }

    /// Creates a bare liveness ping.
    pub fn ping() -> Self {
        Self::new(FrameKind::Ping)
    }

    /// Creates a ping carrying a health-check correlation id.
    pub fn health_probe(id: impl Into<String>) -> Self {
        let mut frame = Self::new(FrameKind::Ping);
        frame.health_check_id = Some(id.into());
        frame
    }

    /// Creates a ping carrying a latency correlation id.
    pub fn latency_probe(id: impl Into<String>) -> Self {
        let mut frame = Self::new(FrameKind::Ping);
        frame.latency_id = Some(id.into());
        frame
    }

    /// Creates a batch envelope coalescing several frames.
    pub fn batch(messages: Vec<Frame>) -> Self {
        let mut frame = Self::new(FrameKind::Batch);
        frame.messages = Some(messages);
        frame
    }

    /// Builds the pong reply for an inbound ping, echoing its
    /// correlation fields.
    pub fn pong_for(ping: &Frame) -> Self {
        let mut frame = Self::new(FrameKind::Pong);
        frame.message_id = ping.message_id.clone();
        frame.health_check_id = ping.health_check_id.clone();
        frame.latency_id = ping.latency_id.clone();
        frame
    }

    /// Builds the acknowledgment reply for an inbound frame, echoing
    /// its `messageId`.
    pub fn ack_for(frame: &Frame) -> Self {
        let mut ack = Self::new(FrameKind::Ack);
        ack.message_id = frame.message_id.clone();
        ack
    }

    /// Returns whichever correlation id the frame carries, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .or(self.health_check_id.as_deref())
            .or(self.latency_id.as_deref())
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }
}
