//! Session registry and the `negotiate` entry point

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn, Instrument};

use super::call::{CallSession, SessionInfo, SessionMedia};
use super::lifecycle::{CloseReason, SessionState};
use super::pacer::MediaPacer;
use crate::config::{AnswerNormalization, AppConfig};
use crate::error::{AppError, Result};
use crate::resources::MediaResourceCatalog;
use crate::video::{EncoderConfig, EncodingPipeline, FrameDrawer, VideoEncoderFactory};
use crate::webrtc::answer::post_processor;
use crate::webrtc::negotiator::Negotiator;
use crate::webrtc::offer::{analyze_offer, AnalyzedOffer, MediaKind};
use crate::webrtc::signaling::CandidateInit;
use crate::webrtc::transport::PeerTransportFactory;

/// Answer handed back to a signaling front end
#[derive(Debug, Clone, Serialize)]
pub struct NegotiatedCall {
    pub session_id: String,
    pub answer: String,
}

/// Owns every active call session
pub struct SessionManager {
    config: Arc<AppConfig>,
    catalog: Arc<MediaResourceCatalog>,
    drawer: Arc<dyn FrameDrawer>,
    transports: Arc<dyn PeerTransportFactory>,
    encoders: Arc<dyn VideoEncoderFactory>,
    sessions: Arc<RwLock<HashMap<String, Arc<CallSession>>>>,
}

impl SessionManager {
    pub fn new(
        config: Arc<AppConfig>,
        catalog: Arc<MediaResourceCatalog>,
        drawer: Arc<dyn FrameDrawer>,
        transports: Arc<dyn PeerTransportFactory>,
        encoders: Arc<dyn VideoEncoderFactory>,
    ) -> Self {
        Self {
            config,
            catalog,
            drawer,
            transports,
            encoders,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Answer an offer and start a session for it
    pub async fn negotiate(
        &self,
        offer: &str,
        candidates: Vec<CandidateInit>,
        normalization: AnswerNormalization,
    ) -> Result<NegotiatedCall> {
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.config.session.max_sessions {
                return Err(AppError::ServiceUnavailable(format!(
                    "Maximum sessions ({}) reached",
                    self.config.session.max_sessions
                )));
            }
        }

        let analyzed = analyze_offer(offer, &self.config.webrtc.offer_fingerprint)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let transport = self
            .transports
            .create(&self.config.webrtc, &session_id)
            .await?;
        let session = CallSession::new(
            session_id.clone(),
            transport.clone(),
            self.config.session.timeout(),
        );
        session.set_remote_description(&analyzed.munged_sdp);
        session.start_supervisors();
        self.register(&session).await;

        let span = session.span().clone();
        let result = self
            .answer(&session, &analyzed, candidates, normalization)
            .instrument(span)
            .await;

        match result {
            Ok(answer) => {
                info!(
                    "Session {} answered ({} active)",
                    session_id,
                    self.sessions.read().await.len()
                );
                Ok(NegotiatedCall { session_id, answer })
            }
            Err(e) => {
                warn!("Session {} negotiation failed: {}", session_id, e);
                let reason = match &e {
                    AppError::Encode(_) => CloseReason::Fault,
                    _ => CloseReason::NegotiationFailed,
                };
                session.close(reason).await;
                Err(e)
            }
        }
    }

    async fn answer(
        &self,
        session: &Arc<CallSession>,
        analyzed: &AnalyzedOffer,
        candidates: Vec<CandidateInit>,
        normalization: AnswerNormalization,
    ) -> Result<String> {
        session.lifecycle().transition(SessionState::Negotiating);

        let negotiation = Negotiator::new(self.config.session.gathering_timeout())
            .negotiate(session.transport().as_ref(), analyzed, candidates)
            .await?;

        let pipeline = if negotiation.endpoints.contains_key(&MediaKind::Video) {
            let encoder = self
                .encoders
                .create(EncoderConfig::from(&self.config.video))?;
            Some(EncodingPipeline::open(encoder, &self.config.video)?)
        } else {
            None
        };

        session.set_local_description(&negotiation.answer);
        session
            .install_media(SessionMedia::from_endpoints(negotiation.endpoints, pipeline))
            .await?;

        let answer = post_processor(normalization, &self.config.webrtc.sip_answer_protos)
            .process(&negotiation.answer)?;

        MediaPacer::new(
            session.clone(),
            self.catalog.clone(),
            self.drawer.clone(),
            &self.config.audio,
            &self.config.video,
        )
        .start()
        .await;

        Ok(answer)
    }

    async fn register(&self, session: &Arc<CallSession>) {
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session.clone());

        // Drop the registry entry once the session is closed
        let sessions = self.sessions.clone();
        let id = session.id().to_string();
        let mut state_rx = session.lifecycle().subscribe();
        session.spawn(async move {
            let _ = state_rx.wait_for(|s| *s == SessionState::Closed).await;
            sessions.write().await.remove(&id);
            debug!("Session {} removed from registry", id);
        });
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Close one session; NotFound if it does not exist
    pub async fn close_session(&self, session_id: &str, reason: CloseReason) -> Result<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", session_id)))?;
        session.close(reason).await;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by_key(|i| std::cmp::Reverse(i.age_secs));
        infos
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session (process shutdown)
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        for session in sessions {
            session.close(CloseReason::Shutdown).await;
        }
        if count > 0 {
            info!("Closed {} session(s)", count);
        }
    }
}
