//! Per-session H.264 encoding pipeline
//!
//! Owns the encoder and the reusable RGBA input frame. The pipeline is opened
//! once per session with a video endpoint and released exactly once, either
//! by the session close path or on drop.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::encoder::VideoEncoder;
use super::frame::{RgbaFrame, VideoFramePacket};
use crate::config::VideoConfig;
use crate::error::{AppError, Result};

/// Pipeline statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames handed to the encoder
    pub frames_submitted: u64,
    /// Frames that produced a packet
    pub frames_encoded: u64,
    /// Frames the encoder skipped
    pub frames_skipped: u64,
    pub bytes_encoded: u64,
}

struct OpenState {
    encoder: Box<dyn VideoEncoder>,
    frame: RgbaFrame,
}

/// H.264 encoding pipeline bound to one session
pub struct EncodingPipeline {
    state: Option<OpenState>,
    frame_duration: Duration,
    stats: PipelineStats,
}

impl EncodingPipeline {
    /// Allocate the input frame and take ownership of `encoder`
    pub fn open(encoder: Box<dyn VideoEncoder>, config: &VideoConfig) -> Result<Self> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(AppError::Encode(format!(
                "Bad video dimensions ({}, {}), must be even",
                config.width, config.height
            )));
        }

        info!(
            "Opening encoding pipeline: {} {}x{} @ {} fps",
            encoder.name(),
            config.width,
            config.height,
            config.fps
        );

        Ok(Self {
            state: Some(OpenState {
                encoder,
                frame: RgbaFrame::new(config.width, config.height),
            }),
            frame_duration: config.frame_duration(),
            stats: PipelineStats::default(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Input frame to draw into before calling [`encode`](Self::encode)
    pub fn frame_mut(&mut self) -> Result<&mut RgbaFrame> {
        self.state
            .as_mut()
            .map(|state| &mut state.frame)
            .ok_or_else(|| AppError::Encode("pipeline is closed".to_string()))
    }

    /// Encode the current frame; `Ok(None)` when the encoder skips this tick
    pub fn encode(&mut self, index: u32) -> Result<Option<VideoFramePacket>> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| AppError::Encode("pipeline is closed".to_string()))?;

        self.stats.frames_submitted += 1;
        match state.encoder.encode(&state.frame, index)? {
            Some(data) => {
                self.stats.frames_encoded += 1;
                self.stats.bytes_encoded += data.len() as u64;
                Ok(Some(VideoFramePacket {
                    data,
                    presentation_index: index,
                    duration: self.frame_duration,
                }))
            }
            None => {
                self.stats.frames_skipped += 1;
                Ok(None)
            }
        }
    }

    /// Release the encoder and frame buffer; true if this call released them
    pub fn close(&mut self) -> bool {
        let Some(mut state) = self.state.take() else {
            return false;
        };
        state.encoder.close();
        debug!(
            "Encoding pipeline closed: {} submitted, {} encoded, {} skipped",
            self.stats.frames_submitted, self.stats.frames_encoded, self.stats.frames_skipped
        );
        true
    }
}

impl Drop for EncodingPipeline {
    fn drop(&mut self) {
        if self.close() {
            warn!("Encoding pipeline released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptStep, ScriptedEncoder};

    fn small_config() -> VideoConfig {
        VideoConfig {
            width: 320,
            height: 240,
            ..Default::default()
        }
    }

    #[test]
    fn test_skip_then_packet() {
        let encoder = ScriptedEncoder::new(vec![ScriptStep::Skip, ScriptStep::Packet(b"idr")]);
        let mut pipeline = EncodingPipeline::open(Box::new(encoder), &small_config()).unwrap();

        assert!(pipeline.encode(0).unwrap().is_none());
        let packet = pipeline.encode(1).unwrap().unwrap();
        assert_eq!(packet.presentation_index, 1);
        assert_eq!(&packet.data[..], b"idr");
        assert_eq!(packet.duration, Duration::from_millis(100));

        let stats = pipeline.stats();
        assert_eq!(stats.frames_submitted, 2);
        assert_eq!(stats.frames_skipped, 1);
        assert_eq!(stats.bytes_encoded, 3);
    }

    #[test]
    fn test_close_releases_once() {
        let encoder = ScriptedEncoder::new(vec![]);
        let counters = encoder.counters();
        let mut pipeline = EncodingPipeline::open(Box::new(encoder), &small_config()).unwrap();

        assert!(pipeline.close());
        assert!(!pipeline.close());
        drop(pipeline);
        assert_eq!(counters.closes(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let encoder = ScriptedEncoder::new(vec![]);
        let counters = encoder.counters();
        drop(EncodingPipeline::open(Box::new(encoder), &small_config()).unwrap());
        assert_eq!(counters.closes(), 1);
    }

    #[test]
    fn test_encode_after_close_fails() {
        let mut pipeline =
            EncodingPipeline::open(Box::new(ScriptedEncoder::new(vec![])), &small_config()).unwrap();
        pipeline.close();
        assert!(matches!(pipeline.encode(0), Err(AppError::Encode(_))));
        assert!(pipeline.frame_mut().is_err());
    }

    #[test]
    fn test_encoder_error_surfaces() {
        let encoder = ScriptedEncoder::new(vec![ScriptStep::Fail]);
        let mut pipeline = EncodingPipeline::open(Box::new(encoder), &small_config()).unwrap();
        assert!(matches!(pipeline.encode(0), Err(AppError::Encode(_))));
    }
}
