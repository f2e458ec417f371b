//! One answered call: transport, media endpoints and lifecycle

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument, Span};

use super::lifecycle::{CloseReason, SessionLifecycle, SessionState};
use crate::error::{AppError, Result};
use crate::video::EncodingPipeline;
use crate::webrtc::offer::MediaKind;
use crate::webrtc::signaling::TransportState;
use crate::webrtc::transport::{MediaSink, PeerTransport};

/// Video endpoint with its encoder
pub struct VideoEndpoint {
    pub sink: Arc<dyn MediaSink>,
    pub pipeline: Mutex<EncodingPipeline>,
}

/// Endpoints mutated only under the session write lock
#[derive(Default)]
pub struct SessionMedia {
    pub audio: Option<Arc<dyn MediaSink>>,
    pub video: Option<VideoEndpoint>,
}

impl SessionMedia {
    /// Split negotiated endpoints; video additionally needs a pipeline
    pub fn from_endpoints(
        mut endpoints: HashMap<MediaKind, Arc<dyn MediaSink>>,
        pipeline: Option<EncodingPipeline>,
    ) -> Self {
        let audio = endpoints.remove(&MediaKind::Audio);
        let video = match (endpoints.remove(&MediaKind::Video), pipeline) {
            (Some(sink), Some(pipeline)) => Some(VideoEndpoint {
                sink,
                pipeline: Mutex::new(pipeline),
            }),
            (_, Some(mut pipeline)) => {
                pipeline.close();
                None
            }
            _ => None,
        };
        Self { audio, video }
    }

    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        if self.audio.is_some() {
            kinds.push(MediaKind::Audio);
        }
        if self.video.is_some() {
            kinds.push(MediaKind::Video);
        }
        kinds
    }

    /// Close the pipeline and drop every endpoint; true if a pipeline was released
    pub fn release(&mut self) -> bool {
        self.audio = None;
        match self.video.take() {
            Some(video) => video.pipeline.lock().close(),
            None => false,
        }
    }
}

/// Negotiated session descriptions
#[derive(Debug, Clone, Default)]
pub struct Descriptions {
    pub remote: Option<String>,
    pub local: Option<String>,
}

/// Listing entry for a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub state: SessionState,
    pub age_secs: u64,
    pub remaining_secs: u64,
    pub media: Vec<String>,
}

/// A single call session
pub struct CallSession {
    id: String,
    created_at: Instant,
    lifecycle: SessionLifecycle,
    transport: Arc<dyn PeerTransport>,
    media: RwLock<SessionMedia>,
    descriptions: Mutex<Descriptions>,
    close_reason: Mutex<Option<CloseReason>>,
    span: Span,
}

impl CallSession {
    pub fn new(id: String, transport: Arc<dyn PeerTransport>, timeout: Duration) -> Arc<Self> {
        let created_at = Instant::now();
        let span = tracing::info_span!("session", id = %id);
        Arc::new(Self {
            id,
            created_at,
            lifecycle: SessionLifecycle::new(created_at + timeout),
            transport,
            media: RwLock::new(SessionMedia::default()),
            descriptions: Mutex::new(Descriptions::default()),
            close_reason: Mutex::new(None),
            span,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn media(&self) -> &RwLock<SessionMedia> {
        &self.media
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    pub fn descriptions(&self) -> Descriptions {
        self.descriptions.lock().clone()
    }

    pub fn set_remote_description(&self, sdp: &str) {
        self.descriptions.lock().remote = Some(sdp.to_string());
    }

    pub fn set_local_description(&self, sdp: &str) {
        self.descriptions.lock().local = Some(sdp.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.lifecycle.is_valid()
    }

    pub async fn wait_connected(&self) -> bool {
        self.lifecycle.wait_connected().await
    }

    /// Spawn a task bound to this session's span
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut.instrument(self.span.clone()))
    }

    /// Start the deadline watchdog and the transport monitor
    pub fn start_supervisors(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let watchdog = {
            let session = self.clone();
            self.spawn(async move {
                let cancel = session.lifecycle.cancel_token().clone();
                tokio::select! {
                    _ = tokio::time::sleep_until(session.lifecycle.deadline()) => {
                        info!("Session lifetime elapsed");
                        session.close(CloseReason::Timeout).await;
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let monitor = {
            let session = self.clone();
            self.spawn(async move {
                let cancel = session.lifecycle.cancel_token().clone();
                let mut state_rx = session.transport.state();
                loop {
                    let state = *state_rx.borrow_and_update();
                    if state == TransportState::Connected {
                        session.lifecycle.transition(SessionState::Connected);
                    } else if state.is_terminal() {
                        warn!("Transport {}, closing session", state);
                        session.close(CloseReason::TransportFailure).await;
                        return;
                    }

                    tokio::select! {
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = cancel.cancelled() => return,
                    }
                }
            })
        };

        vec![watchdog, monitor]
    }

    /// Install negotiated endpoints; fails if the session is already closing
    pub async fn install_media(&self, media: SessionMedia) -> Result<()> {
        let mut guard = self.media.write().await;
        if self.lifecycle.is_closing() {
            let mut media = media;
            media.release();
            return Err(AppError::NegotiationFailed(
                "session closed during negotiation".to_string(),
            ));
        }
        *guard = media;
        Ok(())
    }

    /// Tear the session down; returns false if it was already closing
    pub async fn close(&self, reason: CloseReason) -> bool {
        if !self.lifecycle.begin_close(reason) {
            debug!("Close ({}) ignored, session already closing", reason);
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        info!("Closing session: {}", reason);

        {
            let mut media = self.media.write().await;
            if media.release() {
                debug!("Encoding pipeline released");
            }
            if let Err(e) = self.transport.close().await {
                warn!("Failed to close transport: {}", e);
            }
        }

        self.lifecycle.finish_close();
        info!("Session closed after {:?}", self.created_at.elapsed());
        true
    }

    pub async fn info(&self) -> SessionInfo {
        let media = self.media.read().await;
        let now = Instant::now();
        SessionInfo {
            session_id: self.id.clone(),
            state: self.state(),
            age_secs: now.duration_since(self.created_at).as_secs(),
            remaining_secs: self.lifecycle.deadline().saturating_duration_since(now).as_secs(),
            media: media.kinds().iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;
    use crate::testing::{MockTransport, RecordingSink, ScriptedEncoder};
    use tokio::sync::Notify;

    fn video_media() -> (SessionMedia, Arc<crate::testing::EncoderCounters>) {
        let encoder = ScriptedEncoder::new(vec![]);
        let counters = encoder.counters();
        let config = VideoConfig {
            width: 320,
            height: 240,
            ..Default::default()
        };
        let pipeline = EncodingPipeline::open(Box::new(encoder), &config).unwrap();
        let mut endpoints: HashMap<MediaKind, Arc<dyn MediaSink>> = HashMap::new();
        endpoints.insert(MediaKind::Video, Arc::new(RecordingSink::new(MediaKind::Video)));
        endpoints.insert(MediaKind::Audio, Arc::new(RecordingSink::new(MediaKind::Audio)));
        (SessionMedia::from_endpoints(endpoints, Some(pipeline)), counters)
    }

    #[tokio::test]
    async fn test_double_close_tears_down_once() {
        let transport = Arc::new(MockTransport::new());
        let session = CallSession::new("s1".into(), transport.clone(), Duration::from_secs(60));
        let (media, counters) = video_media();
        session.install_media(media).await.unwrap();

        let (first, second) = tokio::join!(
            session.close(CloseReason::Explicit),
            session.close(CloseReason::Timeout)
        );
        assert!(first ^ second);
        assert_eq!(transport.calls().closes, 1);
        assert_eq!(counters.closes(), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.media().read().await.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_transport_closes_under_media_lock() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(MockTransport::new().holding_close(gate.clone()));
        let session = CallSession::new("s6".into(), transport.clone(), Duration::from_secs(60));

        let closing = tokio::spawn({
            let session = session.clone();
            async move { session.close(CloseReason::Explicit).await }
        });
        while transport.calls().closes == 0 {
            tokio::task::yield_now().await;
        }
        assert!(session.media().try_read().is_err());
        assert_eq!(session.state(), SessionState::Closing);

        gate.notify_one();
        assert!(closing.await.unwrap());
        assert!(session.media().try_read().is_ok());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_close_error_is_not_propagated() {
        let transport = Arc::new(MockTransport::new().failing_close());
        let session = CallSession::new("s2".into(), transport, Duration::from_secs(60));
        assert!(session.close(CloseReason::Explicit).await);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_install_after_close_releases_pipeline() {
        let transport = Arc::new(MockTransport::new());
        let session = CallSession::new("s3".into(), transport, Duration::from_secs(60));
        session.close(CloseReason::Shutdown).await;

        let (media, counters) = video_media();
        assert!(session.install_media(media).await.is_err());
        assert_eq!(counters.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_closes_once() {
        let transport = Arc::new(MockTransport::new());
        let session = CallSession::new("s4".into(), transport.clone(), Duration::from_secs(120));
        let handles = session.start_supervisors();
        session.lifecycle().transition(SessionState::Negotiating);

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(session.is_valid());

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.close_reason(), Some(CloseReason::Timeout));
        assert_eq!(transport.calls().closes, 1);
        assert!(!session.close(CloseReason::Explicit).await);
    }

    #[tokio::test]
    async fn test_transport_states_drive_lifecycle() {
        let transport = Arc::new(MockTransport::new());
        let session = CallSession::new("s5".into(), transport.clone(), Duration::from_secs(60));
        let handles = session.start_supervisors();
        session.lifecycle().transition(SessionState::Negotiating);

        transport.set_state(TransportState::Connected);
        assert!(session.wait_connected().await);

        transport.set_state(TransportState::Failed);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(session.close_reason(), Some(CloseReason::TransportFailure));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
