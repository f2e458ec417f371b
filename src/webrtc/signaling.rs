//! Signaling types shared by the HTTP and SIP front ends

use serde::{Deserialize, Serialize};

/// Remote ICE candidate supplied alongside an offer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateInit {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Offer request body of `POST /offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// SDP offer
    #[serde(alias = "Offer")]
    pub offer: String,
    /// Remote candidates gathered before the offer was sent
    #[serde(alias = "Candidates", default, deserialize_with = "null_as_empty")]
    pub candidates: Vec<CandidateInit>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<CandidateInit>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<CandidateInit>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Transport connectivity as reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// The transport cannot carry media any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::New => write!(f, "new"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::Failed => write!(f, "failed"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_request_accepts_both_casings() {
        let lower: OfferRequest = serde_json::from_str(
            r#"{"offer": "v=0", "candidates": [{"candidate": "1 1 udp 1 10.0.0.1 9 typ host", "sdpMid": "0", "sdpMLineIndex": 0}]}"#,
        )
        .unwrap();
        assert_eq!(lower.offer, "v=0");
        assert_eq!(lower.candidates[0].sdp_mid.as_deref(), Some("0"));

        let upper: OfferRequest =
            serde_json::from_str(r#"{"Offer": "v=0", "Candidates": null}"#).unwrap();
        assert_eq!(upper.offer, "v=0");
        assert!(upper.candidates.is_empty());

        let bare: OfferRequest = serde_json::from_str(r#"{"offer": "v=0"}"#).unwrap();
        assert!(bare.candidates.is_empty());
    }

    #[test]
    fn test_candidate_serializes_browser_keys() {
        let json = serde_json::to_string(&CandidateInit::new("c").with_mid("1", 1)).unwrap();
        assert_eq!(json, r#"{"candidate":"c","sdpMid":"1","sdpMLineIndex":1}"#);
    }
}
