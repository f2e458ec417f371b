//! Offer/answer negotiation against a [`PeerTransport`]
//!
//! Produces a complete (non-trickle) answer: local candidates are collected
//! until gathering finishes and written into the answer before it is handed
//! back to the signaling front end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::sdp::description::common::Attribute;

use super::offer::{media_mid, parse_sdp, AnalyzedOffer, MediaKind};
use super::signaling::CandidateInit;
use super::transport::{MediaSink, PeerTransport};
use crate::error::{AppError, Result};

/// Outcome of a successful negotiation
pub struct Negotiation {
    /// Final answer including gathered candidates
    pub answer: String,
    /// One outbound sink per requested kind
    pub endpoints: HashMap<MediaKind, Arc<dyn MediaSink>>,
    pub candidates_gathered: usize,
}

impl std::fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiation")
            .field("answer_len", &self.answer.len())
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("candidates_gathered", &self.candidates_gathered)
            .finish()
    }
}

/// Drives one offer/answer exchange
pub struct Negotiator {
    gathering_timeout: Duration,
}

impl Negotiator {
    pub fn new(gathering_timeout: Duration) -> Self {
        Self { gathering_timeout }
    }

    pub async fn negotiate(
        &self,
        transport: &dyn PeerTransport,
        analyzed: &AnalyzedOffer,
        remote_candidates: Vec<CandidateInit>,
    ) -> Result<Negotiation> {
        let mut endpoints: HashMap<MediaKind, Arc<dyn MediaSink>> = HashMap::new();
        for request in analyzed.requests.iter().filter(|r| r.local_sends()) {
            if endpoints.contains_key(&request.kind) {
                continue;
            }
            info!("Offer requests {} (mid {})", request.kind, request.mid);
            let sink = transport.add_local_track(request.kind).await?;
            endpoints.insert(request.kind, sink);
        }

        // Must be registered before the local description starts gathering
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let gathering_complete = transport.watch_gathering(tx);

        transport.set_remote_description(&analyzed.munged_sdp).await?;
        let answer_sdp = transport.create_answer().await?;
        transport.set_local_description(&answer_sdp).await?;

        let mut answer = parse_sdp(&answer_sdp)
            .map_err(|e| AppError::NegotiationFailed(format!("unparsable answer: {}", e)))?;

        let candidates = tokio::time::timeout(self.gathering_timeout, async {
            let mut lines = Vec::new();
            while let Some(line) = rx.recv().await {
                if line.is_empty() {
                    return Ok(lines);
                }
                lines.push(line);
            }
            Err(AppError::NegotiationFailed(
                "candidate channel closed before gathering completed".to_string(),
            ))
        })
        .await
        .map_err(|_| {
            AppError::NegotiationFailed(format!(
                "candidate gathering did not finish within {:?}",
                self.gathering_timeout
            ))
        })??;
        rx.close();

        // Every candidate goes to every section; with BUNDLE only the first one is used
        for media in answer.media_descriptions.iter_mut() {
            for line in &candidates {
                media
                    .attributes
                    .push(Attribute::new("candidate".to_string(), Some(line.clone())));
            }
        }

        for candidate in remote_candidates {
            transport.add_remote_candidate(candidate).await?;
        }

        gathering_complete.await.map_err(|_| {
            AppError::NegotiationFailed("gathering completion signal dropped".to_string())
        })?;

        for (index, media) in answer.media_descriptions.iter_mut().enumerate() {
            if media_mid(media).is_some() {
                continue;
            }
            let mid = analyzed
                .section_mids
                .get(index)
                .cloned()
                .unwrap_or_else(|| index.to_string());
            debug!("Restoring mid {} on answer section {}", mid, index);
            media.attributes.retain(|a| a.key != "mid");
            media
                .attributes
                .push(Attribute::new("mid".to_string(), Some(mid)));
        }

        info!(
            "Negotiation complete: {} endpoint(s), {} local candidate(s)",
            endpoints.len(),
            candidates.len()
        );

        Ok(Negotiation {
            answer: answer.marshal(),
            endpoints,
            candidates_gathered: candidates.len(),
        })
    }
}
