use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
pub use crate::webrtc::config::WebRtcConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session lifetime and negotiation limits
    pub session: SessionConfig,
    /// Synthetic video track settings
    pub video: VideoConfig,
    /// Audio playback schedule
    pub audio: AudioConfig,
    /// WebRTC transport settings
    pub webrtc: WebRtcConfig,
    /// HTTP signaling settings
    pub web: WebConfig,
    /// SIP signaling settings
    pub sip: SipConfig,
    /// Resource file locations
    pub resources: ResourceConfig,
}

impl AppConfig {
    /// Check values that would otherwise fail deep inside a session
    pub fn validate(&self) -> Result<()> {
        if self.session.timeout_secs == 0 {
            return Err(AppError::Config("session.timeout_secs must be > 0".into()));
        }
        if self.session.max_sessions == 0 {
            return Err(AppError::Config("session.max_sessions must be > 0".into()));
        }
        if self.video.width % 2 == 1 || self.video.height % 2 == 1 {
            return Err(AppError::Config(format!(
                "Bad video dimensions ({}, {}), must be even",
                self.video.width, self.video.height
            )));
        }
        if self.video.width <= 200 || self.video.height == 0 {
            return Err(AppError::Config(format!(
                "Video frame {}x{} is too small",
                self.video.width, self.video.height
            )));
        }
        if self.video.fps == 0 {
            return Err(AppError::Config("video.fps must be > 0".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(AppError::Config("audio.sample_rate must be > 0".into()));
        }
        if let (Some(min), Some(max)) = (self.webrtc.udp_port_min, self.webrtc.udp_port_max) {
            if min > max {
                return Err(AppError::Config(format!(
                    "webrtc udp port range {}-{} is inverted",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard cap on a session's lifetime in seconds
    pub timeout_secs: u64,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Upper bound for local candidate gathering in milliseconds
    pub gathering_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_sessions: 16,
            gathering_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }
}

/// Synthetic video configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Frame width (must be even)
    pub width: u32,
    /// Frame height (must be even)
    pub height: u32,
    /// Frame rate of the paced video loop
    pub fps: u32,
    /// Target bitrate in kbps
    pub bitrate_kbps: u32,
    /// Caption drawn above the moving box
    pub caption: String,
    /// Label size in pixels
    pub label_px: f32,
    /// Line of code drawn in black below the frame counter; empty to omit
    pub code_line: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 10,
            bitrate_kbps: 400,
            caption: "Thanks for calling!".to_string(),
            label_px: 32.0,
            code_line: "public void JetBrainsMonoSpace(int here) { print(\"Hello World!\"); }"
                .to_string(),
        }
    }
}

impl VideoConfig {
    /// Nominal duration of a single frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Audio playback schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate used to turn granule deltas into durations
    pub sample_rate: u32,
    /// Delay between connectivity and the greeting
    pub start_delay_ms: u64,
    /// Pause between greeting and notice
    pub notice_delay_ms: u64,
    /// Pause before every repetition of the filler clip
    pub filler_interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            start_delay_ms: 1000,
            notice_delay_ms: 2000,
            filler_interval_ms: 5000,
        }
    }
}

/// HTTP signaling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Enable the HTTP offer endpoint
    pub enabled: bool,
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Answer normalization applied to HTTP answers
    pub answer_normalization: AnswerNormalization,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            http_port: 8885,
            answer_normalization: AnswerNormalization::None,
        }
    }
}

/// SIP signaling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    /// Enable the SIP UDP listener
    pub enabled: bool,
    /// UDP bind address
    pub bind_address: String,
    /// Display name used in the Contact header
    pub display_name: String,
    /// Answer normalization applied to SIP answers
    pub answer_normalization: AnswerNormalization,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:5060".to_string(),
            display_name: "voice menu".to_string(),
            answer_normalization: AnswerNormalization::SipInterop,
        }
    }
}

/// Post-negotiation answer rewriting applied per signaling collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerNormalization {
    /// Return the negotiated answer unchanged
    #[default]
    None,
    /// Strip media mids and force `RTP/SAVP` on the first media section
    SipInterop,
}

/// Resource locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Directory holding the clips and the font
    pub dir: PathBuf,
    pub greeting: String,
    pub notice: String,
    pub filler: String,
    pub font: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./resources"),
            greeting: "greeting.ogg".to_string(),
            notice: "durationWarn.ogg".to_string(),
            filler: "dtmf.ogg".to_string(),
            font: "JetBrainsMono-Regular.ttf".to_string(),
        }
    }
}

impl ResourceConfig {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.timeout(), Duration::from_secs(120));
        assert_eq!(config.video.frame_duration(), Duration::from_millis(100));
        assert_eq!(config.sip.answer_normalization, AnswerNormalization::SipInterop);
        assert_eq!(config.web.answer_normalization, AnswerNormalization::None);
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let mut config = AppConfig::default();
        config.video.width = 1281;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"video": {"fps": 25}, "sip": {"enabled": false}}"#).unwrap();
        assert_eq!(config.video.fps, 25);
        assert_eq!(config.video.width, 1280);
        assert!(!config.sip.enabled);
        assert_eq!(config.session.timeout_secs, 120);
    }
}
