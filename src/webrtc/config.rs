//! WebRTC configuration

use serde::{Deserialize, Serialize};

/// WebRTC transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs (`SAMPLE_STUN_SERVER` is appended at startup)
    pub stun_servers: Vec<String>,
    /// Lowest local UDP port used for ICE host candidates
    pub udp_port_min: Option<u16>,
    /// Highest local UDP port used for ICE host candidates
    pub udp_port_max: Option<u16>,
    /// Skip DTLS fingerprint verification (the munged offer carries a synthetic one)
    pub disable_fingerprint_verification: bool,
    /// Fingerprint appended at session level to every munged offer
    pub offer_fingerprint: String,
    /// Protocol list forced onto the first answer section for SIP peers
    pub sip_answer_protos: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![],
            udp_port_min: Some(10000),
            udp_port_max: Some(10000),
            disable_fingerprint_verification: true,
            offer_fingerprint: DEFAULT_OFFER_FINGERPRINT.to_string(),
            sip_answer_protos: vec!["RTP".to_string(), "SAVP".to_string()],
        }
    }
}

impl WebRtcConfig {
    /// ICE server URLs handed to the peer connection and the `/stunServers` endpoint
    pub fn ice_server_urls(&self) -> Vec<String> {
        self.stun_servers
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Placeholder fingerprint; verification is disabled on the DTLS side
pub const DEFAULT_OFFER_FINGERPRINT: &str = "sha-256 5D:8F:6B:D0:15:11:95:06:2E:AE:2B:C3:32:99:06:7C:2D:EA:D1:D1:AA:BF:07:D4:D3:16:32:61:53:30:EB:01";
