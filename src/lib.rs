//! voice-menu - answers WebRTC and SIP calls with a paced audio/video menu
//!
//! An incoming offer is analyzed and munged ([`webrtc::offer`]), negotiated
//! through a peer transport ([`webrtc::negotiator`]) and turned into a
//! [`session::CallSession`] whose [`session::MediaPacer`] plays Opus clips
//! and a synthetic H.264 video track until the session ends.

pub mod config;
pub mod error;
pub mod resources;
pub mod session;
pub mod sip;
pub mod video;
pub mod web;
pub mod webrtc;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, Result};
