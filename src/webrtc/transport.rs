//! Transport collaborator seams
//!
//! The negotiator and the media pacer only see these traits; the production
//! implementation lives in [`super::peer`].

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use super::config::WebRtcConfig;
use super::offer::MediaKind;
use super::signaling::{CandidateInit, TransportState};
use crate::error::Result;

/// One media sample written to an outbound track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Bytes,
    pub duration: Duration,
    /// Explicit timestamp hint (frame index for video, 0 for audio)
    pub packet_timestamp: u32,
}

/// Outbound track accepting timed samples
#[async_trait]
pub trait MediaSink: Send + Sync {
    fn kind(&self) -> MediaKind;

    async fn write_sample(&self, sample: MediaSample) -> Result<()>;
}

/// Resolves once local candidate gathering is complete
pub type GatheringComplete = oneshot::Receiver<()>;

/// Peer connection as used by negotiation and pacing
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an outbound track of `kind`
    async fn add_local_track(&self, kind: MediaKind) -> Result<Arc<dyn MediaSink>>;

    /// Forward local candidate lines to `tx`; an empty line marks the end
    fn watch_gathering(&self, tx: mpsc::UnboundedSender<String>) -> GatheringComplete;

    async fn set_remote_description(&self, offer_sdp: &str) -> Result<()>;

    async fn create_answer(&self) -> Result<String>;

    async fn set_local_description(&self, answer_sdp: &str) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()>;

    /// Subscribe to connectivity changes
    fn state(&self) -> watch::Receiver<TransportState>;

    async fn close(&self) -> Result<()>;
}

/// Builds one transport per session
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(&self, config: &WebRtcConfig, session_id: &str) -> Result<Arc<dyn PeerTransport>>;
}
