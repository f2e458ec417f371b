//! Offer inspection and munging
//!
//! Extracts the requested media sections from a remote offer and produces
//! the rewritten offer handed to the peer connection: every media section
//! gets a mid and an explicit `sendrecv`, and a session level fingerprint is
//! appended (DTLS fingerprint verification is disabled on our side).

use std::io::Cursor;
use tracing::debug;
use webrtc::sdp::description::common::Attribute;
use webrtc::sdp::description::media::MediaDescription;
use webrtc::sdp::description::session::SessionDescription;

use crate::error::{AppError, Result};

/// First synthesized mid is `MID_COUNTER_START + 1`
const MID_COUNTER_START: u32 = 100;

/// Media kinds we can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Map an `m=` media type; other kinds (application, text...) yield `None`
    pub fn from_media(media: &str) -> Option<Self> {
        match media {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Media direction as seen from the offerer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    pub fn from_attribute(key: &str) -> Option<Self> {
        match key {
            "sendrecv" => Some(Direction::SendRecv),
            "sendonly" => Some(Direction::SendOnly),
            "recvonly" => Some(Direction::RecvOnly),
            "inactive" => Some(Direction::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::SendRecv => "sendrecv",
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested audio or video section of the offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub kind: MediaKind,
    pub mid: String,
    pub direction: Direction,
    /// First `b=` value of the section
    pub bandwidth_hint: Option<u64>,
}

impl MediaRequest {
    /// The offerer wants to receive media from us
    pub fn local_sends(&self) -> bool {
        matches!(self.direction, Direction::SendRecv | Direction::RecvOnly)
    }
}

/// Result of [`analyze_offer`]
#[derive(Debug, Clone)]
pub struct AnalyzedOffer {
    /// Audio/video sections in order of appearance
    pub requests: Vec<MediaRequest>,
    /// Mid of every media section (any kind), after synthesis
    pub section_mids: Vec<String>,
    /// Rewritten offer to apply as remote description
    pub munged_sdp: String,
    pub synthesized_mids: usize,
}

impl AnalyzedOffer {
    pub fn wants(&self, kind: MediaKind) -> bool {
        self.requests
            .iter()
            .any(|r| r.kind == kind && r.local_sends())
    }
}

/// Parse an SDP blob
pub fn parse_sdp(sdp: &str) -> std::result::Result<SessionDescription, String> {
    let mut reader = Cursor::new(sdp.as_bytes());
    SessionDescription::unmarshal(&mut reader).map_err(|e| e.to_string())
}

/// Value of the first `a=mid` attribute of a media section
pub fn media_mid(media: &MediaDescription) -> Option<&str> {
    media
        .attributes
        .iter()
        .find(|a| a.key == "mid")
        .and_then(|a| a.value.as_deref())
        .filter(|v| !v.is_empty())
}

fn media_direction(media: &MediaDescription) -> Direction {
    media
        .attributes
        .iter()
        .find_map(|a| Direction::from_attribute(&a.key))
        .unwrap_or_default()
}

/// Inspect and munge a remote offer
pub fn analyze_offer(offer: &str, fingerprint: &str) -> Result<AnalyzedOffer> {
    let mut sd = parse_sdp(offer).map_err(AppError::MalformedOffer)?;

    if sd.media_descriptions.is_empty() {
        return Err(AppError::MalformedOffer(
            "offer contains no media sections".to_string(),
        ));
    }

    let mut mid_counter = MID_COUNTER_START;
    let mut synthesized_mids = 0;
    let mut requests = Vec::new();
    let mut section_mids = Vec::with_capacity(sd.media_descriptions.len());

    for media in sd.media_descriptions.iter_mut() {
        let direction = media_direction(media);
        let bandwidth_hint = media.bandwidth.first().map(|b| b.bandwidth);

        let mid = match media_mid(media) {
            Some(mid) => mid.to_string(),
            None => {
                mid_counter += 1;
                synthesized_mids += 1;
                let mid = mid_counter.to_string();
                media
                    .attributes
                    .push(Attribute::new("mid".to_string(), Some(mid.clone())));
                mid
            }
        };
        media
            .attributes
            .push(Attribute::new("sendrecv".to_string(), None));

        let media_type = media.media_name.media.as_str();
        debug!(
            "Observed media {} mid={} direction={} bandwidth={:?}",
            media_type, mid, direction, bandwidth_hint
        );

        if let Some(kind) = MediaKind::from_media(media_type) {
            requests.push(MediaRequest {
                kind,
                mid: mid.clone(),
                direction,
                bandwidth_hint,
            });
        }
        section_mids.push(mid);
    }

    sd.attributes.push(Attribute::new(
        "fingerprint".to_string(),
        Some(fingerprint.to_string()),
    ));

    Ok(AnalyzedOffer {
        requests,
        section_mids,
        munged_sdp: sd.marshal(),
        synthesized_mids,
    })
}
