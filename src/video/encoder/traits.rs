//! Encoder traits and common types

use bytes::Bytes;

use crate::config::VideoConfig;
use crate::error::Result;
use crate::video::frame::RgbaFrame;

/// Encoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    /// Target frame rate
    pub fps: u32,
    /// Target bitrate in kbps
    pub bitrate_kbps: u32,
}

impl From<&VideoConfig> for EncoderConfig {
    fn from(config: &VideoConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            bitrate_kbps: config.bitrate_kbps,
        }
    }
}

/// Frame encoder
/// Note: Not Sync, native encoders keep thread-affine state
pub trait VideoEncoder: Send {
    /// Get encoder name
    fn name(&self) -> &str;

    /// Encode one frame; `Ok(None)` means the encoder skipped this tick
    fn encode(&mut self, frame: &RgbaFrame, pts: u32) -> Result<Option<Bytes>>;

    /// Release native resources; further encodes fail
    fn close(&mut self) {}
}

/// Encoder factory for creating encoders
pub trait VideoEncoderFactory: Send + Sync {
    fn create(&self, config: EncoderConfig) -> Result<Box<dyn VideoEncoder>>;

    /// Get encoder type name
    fn encoder_type(&self) -> &str;
}
