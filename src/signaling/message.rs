//! Signaling wire messages
//!
//! A `SignalMessage` carries one negotiation step between two participants
//! of a channel. Messages travel over the relay topic `voice-{channel_id}`
//! serialized as JSON and are mirrored into the signaling record store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SDP description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description produced or consumed by a peer transport
///
/// `candidates` is empty when the transport trickles; non-trickle transports
/// bundle the full candidate set here so it is applied atomically with the
/// description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
    #[serde(default)]
    pub candidates: Vec<IceCandidate>,
}

/// A single ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: &str) -> Self {
        Self {
            candidate: candidate.to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// The negotiation step carried by a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl SignalPayload {
    /// The persisted `type` column value for this payload
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// One signaling message on a channel topic
///
/// `receiver_id: None` means broadcast to the whole channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    pub channel_id: String,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

/// Relay topic for a channel
pub fn channel_topic(channel_id: &str) -> String {
    format!("voice-{}", channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_topic() {
        assert_eq!(channel_topic("c1"), "voice-c1");
    }

    #[test]
    fn test_payload_kind_strings() {
        let desc = SessionDescription {
            kind: SdpType::Offer,
            sdp: "sdp".into(),
            candidates: vec![],
        };
        assert_eq!(SignalPayload::Offer(desc.clone()).kind(), "offer");
        assert_eq!(
            SignalPayload::Answer(SessionDescription {
                kind: SdpType::Answer,
                ..desc
            })
            .kind(),
            "answer"
        );
        assert_eq!(
            SignalPayload::IceCandidate(IceCandidate::new("cand")).kind(),
            "ice-candidate"
        );
    }

    #[test]
    fn test_message_serialize_roundtrip() {
        let msg = SignalMessage {
            channel_id: "c1".into(),
            sender_id: Uuid::new_v4(),
            receiver_id: None,
            payload: SignalPayload::IceCandidate(IceCandidate::new("candidate:0 1 udp")),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ice-candidate\""));

        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.channel_id, "c1");
        assert_eq!(parsed.sender_id, msg.sender_id);
        match parsed.payload {
            SignalPayload::IceCandidate(c) => assert_eq!(c.candidate, "candidate:0 1 udp"),
            _ => panic!("Wrong payload type"),
        }
    }

    #[test]
    fn test_offer_without_candidates_field_deserializes() {
        // Trickling senders omit the bundled candidate set
        let json = r#"{
            "channel_id": "c1",
            "sender_id": "7f2c0a4e-8d1b-4f63-9c1d-2a5f6b7c8d90",
            "receiver_id": null,
            "type": "offer",
            "data": { "kind": "offer", "sdp": "v=0" }
        }"#;
        let msg: SignalMessage = serde_json::from_str(json).unwrap();
        match msg.payload {
            SignalPayload::Offer(desc) => {
                assert_eq!(desc.sdp, "v=0");
                assert!(desc.candidates.is_empty());
            }
            _ => panic!("Wrong payload type"),
        }
    }
}
