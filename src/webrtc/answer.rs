//! Answer post-processing per signaling front end

use std::sync::Arc;

use super::offer::parse_sdp;
use crate::config::AnswerNormalization;
use crate::error::{AppError, Result};

/// Rewrites a negotiated answer before it is handed to the remote side
pub trait AnswerPostProcessor: Send + Sync {
    fn process(&self, answer: &str) -> Result<String>;
}

/// Returns the answer unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughAnswer;

impl AnswerPostProcessor for PassthroughAnswer {
    fn process(&self, answer: &str) -> Result<String> {
        Ok(answer.to_string())
    }
}

/// Shapes the answer for plain SIP user agents
///
/// Media mids are removed and the first media section advertises the
/// configured protocol list (`RTP/SAVP` by default).
#[derive(Debug, Clone)]
pub struct SipInteropAnswer {
    protos: Vec<String>,
}

impl SipInteropAnswer {
    pub fn new(protos: Vec<String>) -> Self {
        Self { protos }
    }
}

impl Default for SipInteropAnswer {
    fn default() -> Self {
        Self::new(vec!["RTP".to_string(), "SAVP".to_string()])
    }
}

impl AnswerPostProcessor for SipInteropAnswer {
    fn process(&self, answer: &str) -> Result<String> {
        let mut sd = parse_sdp(answer)
            .map_err(|e| AppError::NegotiationFailed(format!("unparsable answer: {}", e)))?;

        for media in sd.media_descriptions.iter_mut() {
            media.attributes.retain(|a| a.key != "mid");
        }
        if let Some(first) = sd.media_descriptions.first_mut() {
            first.media_name.protos = self.protos.clone();
        }

        Ok(sd.marshal())
    }
}

/// Build the processor selected by configuration
pub fn post_processor(
    normalization: AnswerNormalization,
    sip_protos: &[String],
) -> Arc<dyn AnswerPostProcessor> {
    match normalization {
        AnswerNormalization::None => Arc::new(PassthroughAnswer),
        AnswerNormalization::SipInterop => Arc::new(SipInteropAnswer::new(sip_protos.to_vec())),
    }
}
