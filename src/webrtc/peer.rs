//! Production transport over `webrtc` peer connections

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::config::WebRtcConfig;
use super::offer::MediaKind;
use super::signaling::{CandidateInit, TransportState};
use super::transport::{
    GatheringComplete, MediaSample, MediaSink, PeerTransport, PeerTransportFactory,
};
use crate::error::{AppError, Result};

/// H.264 RTP clock rate
const VIDEO_CLOCK_RATE: u32 = 90000;
const OPUS_CLOCK_RATE: u32 = 48000;
const STREAM_ID: &str = "voice-menu";
/// Buffer for draining RTCP from outbound senders
const RTCP_BUFFER_SIZE: usize = 1500;

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: 2,
            ..Default::default()
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: VIDEO_CLOCK_RATE,
            ..Default::default()
        },
    }
}

/// Outbound sample track
pub struct SampleTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl MediaSink for SampleTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn write_sample(&self, sample: MediaSample) -> Result<()> {
        let sample = Sample {
            data: sample.data,
            duration: sample.duration,
            packet_timestamp: sample.packet_timestamp,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write {} sample: {}", self.kind, e)))
    }
}

/// [`PeerTransport`] backed by an `RTCPeerConnection`
pub struct RtcPeerTransport {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<TransportState>,
}

impl RtcPeerTransport {
    pub async fn new(config: &WebRtcConfig, session_id: &str) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.disable_certificate_fingerprint_verification(
            config.disable_fingerprint_verification,
        );
        if let (Some(min), Some(max)) = (config.udp_port_min, config.udp_port_max) {
            let ephemeral = EphemeralUDP::new(min, max).map_err(|e| {
                AppError::Config(format!("Invalid UDP port range {}-{}: {}", min, max, e))
            })?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let urls = config.ice_server_urls();
        let ice_servers = if urls.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls,
                ..Default::default()
            }]
        };

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                AppError::NegotiationFailed(format!("Failed to create peer connection: {}", e))
            })?;
        let pc = Arc::new(pc);

        let (state_tx, state_rx) = watch::channel(TransportState::New);
        let state_tx = Arc::new(state_tx);
        let sid = session_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            let sid = sid.clone();
            Box::pin(async move {
                let new_state = match s {
                    RTCPeerConnectionState::New => TransportState::New,
                    RTCPeerConnectionState::Connecting => TransportState::Connecting,
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => return,
                };
                info!("Peer {} connection state: {}", sid, new_state);
                let _ = state_tx.send(new_state);
            })
        }));

        debug!("Peer connection created for session {}", session_id);

        Ok(Self {
            session_id: session_id.to_string(),
            pc,
            state_rx,
        })
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn add_local_track(&self, kind: MediaKind) -> Result<Arc<dyn MediaSink>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            codec_for(kind),
            kind.to_string(),
            STREAM_ID.to_string(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to add {} track: {}", kind, e)))?;

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buf).await.is_ok() {}
            trace!("RTCP reader for {} track finished", kind);
        });

        info!("Session {}: {} track added", self.session_id, kind);
        Ok(Arc::new(SampleTrack { kind, track }))
    }

    fn watch_gathering(&self, tx: mpsc::UnboundedSender<String>) -> GatheringComplete {
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                let done_tx = done_tx.clone();
                Box::pin(async move {
                    match candidate {
                        Some(c) => match c.to_json() {
                            Ok(init) => {
                                let line = init
                                    .candidate
                                    .trim_start_matches("candidate:")
                                    .to_string();
                                debug!("Local ICE candidate: {}", line);
                                let _ = tx.send(line);
                            }
                            Err(e) => warn!("Failed to serialize local candidate: {}", e),
                        },
                        None => {
                            let _ = tx.send(String::new());
                            if let Some(done) = done_tx.lock().take() {
                                let _ = done.send(());
                            }
                        }
                    }
                })
            }));

        done_rx
    }

    async fn set_remote_description(&self, offer_sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| AppError::MalformedOffer(format!("Invalid SDP offer: {}", e)))?;
        self.pc.set_remote_description(offer).await.map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to set remote description: {}", e))
        })
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to create answer: {}", e)))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, answer_sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string())
            .map_err(|e| AppError::NegotiationFailed(format!("Invalid local answer: {}", e)))?;
        self.pc.set_local_description(answer).await.map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to set local description: {}", e))
        })
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to add ICE candidate: {}", e)))
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        self.state_rx.clone()
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to close peer connection: {}", e)))
    }
}

/// Creates [`RtcPeerTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerTransportFactory;

#[async_trait]
impl PeerTransportFactory for RtcPeerTransportFactory {
    async fn create(&self, config: &WebRtcConfig, session_id: &str) -> Result<Arc<dyn PeerTransport>> {
        Ok(Arc::new(RtcPeerTransport::new(config, session_id).await?))
    }
}
