//! H.264 encoder using openh264
//!
//! Frames are converted RGBA -> RGB24 -> I420 before encoding. The output is
//! an Annex B bitstream suitable for `video/H264` sample tracks.

use bytes::Bytes;
use openh264::encoder::{Encoder as OpenH264, EncoderConfig as OpenH264Config, FrameType};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use tracing::{debug, info};

use super::traits::{EncoderConfig, VideoEncoder, VideoEncoderFactory};
use crate::error::{AppError, Result};
use crate::video::frame::RgbaFrame;

/// Software H.264 encoder
pub struct OpenH264Encoder {
    config: EncoderConfig,
    inner: Option<OpenH264>,
    /// RGB24 scratch buffer
    rgb: Vec<u8>,
    yuv: YUVBuffer,
    frame_count: u64,
}

impl OpenH264Encoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(AppError::Encode(format!(
                "Bad video dimensions ({}, {}), must be even",
                config.width, config.height
            )));
        }

        let native = OpenH264Config::new(config.width, config.height)
            .set_bitrate_bps(config.bitrate_kbps.saturating_mul(1000))
            .max_frame_rate(config.fps as f32);

        let inner = OpenH264::with_config(OpenH264API::from_source(), native)
            .map_err(|e| AppError::Encode(format!("Failed to create H.264 encoder: {}", e)))?;

        info!(
            "H.264 encoder created: {}x{} @ {} fps, {} kbps",
            config.width, config.height, config.fps, config.bitrate_kbps
        );

        Ok(Self {
            config,
            inner: Some(inner),
            rgb: Vec::with_capacity(config.width as usize * config.height as usize * 3),
            yuv: YUVBuffer::new(config.width as usize, config.height as usize),
            frame_count: 0,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

// SAFETY: the openh264 encoder wraps a raw pointer to the native encoder
// context. OpenH264Encoder is only driven by one task at a time (it lives
// behind the pipeline mutex) and the pointer never escapes the wrapper.
unsafe impl Send for OpenH264Encoder {}

impl VideoEncoder for OpenH264Encoder {
    fn name(&self) -> &str {
        "openh264"
    }

    fn encode(&mut self, frame: &RgbaFrame, pts: u32) -> Result<Option<Bytes>> {
        let Some(encoder) = self.inner.as_mut() else {
            return Err(AppError::Encode("encoder already closed".to_string()));
        };

        if frame.width() != self.config.width || frame.height() != self.config.height {
            return Err(AppError::Encode(format!(
                "Frame size {}x{} does not match encoder {}x{}",
                frame.width(),
                frame.height(),
                self.config.width,
                self.config.height
            )));
        }

        frame.write_rgb(&mut self.rgb);
        self.yuv.read_rgb(&self.rgb);

        let bitstream = encoder
            .encode(&self.yuv)
            .map_err(|e| AppError::Encode(format!("H.264 encode failed: {}", e)))?;

        self.frame_count += 1;

        if matches!(bitstream.frame_type(), FrameType::Skip) {
            debug!("Encoder skipped frame {}", pts);
            return Ok(None);
        }

        let data = bitstream.to_vec();
        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(Bytes::from(data)))
    }

    fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("H.264 encoder closed after {} frames", self.frame_count);
        }
    }
}

/// Factory producing [`OpenH264Encoder`] instances
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenH264Factory;

impl VideoEncoderFactory for OpenH264Factory {
    fn create(&self, config: EncoderConfig) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(OpenH264Encoder::new(config)?))
    }

    fn encoder_type(&self) -> &str {
        "openh264"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_dimensions_rejected() {
        let config = EncoderConfig {
            width: 641,
            height: 480,
            fps: 10,
            bitrate_kbps: 400,
        };
        assert!(matches!(
            OpenH264Encoder::new(config),
            Err(AppError::Encode(_))
        ));
    }

    #[test]
    fn test_first_frame_is_annex_b() {
        let config = EncoderConfig {
            width: 64,
            height: 48,
            fps: 10,
            bitrate_kbps: 100,
        };
        let mut encoder = OpenH264Encoder::new(config).unwrap();
        let mut frame = RgbaFrame::new(64, 48);
        frame.fill(crate::video::frame::Rgba::ORANGE);

        let data = encoder.encode(&frame, 0).unwrap().unwrap();
        assert!(data.starts_with(&[0, 0, 0, 1]) || data.starts_with(&[0, 0, 1]));

        encoder.close();
        assert!(encoder.encode(&frame, 1).is_err());
    }
}
