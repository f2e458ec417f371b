//! Video encoder implementations
//!
//! The pipeline only talks to [`VideoEncoder`]; the native H.264 backend is
//! confined to [`h264`].

pub mod h264;
pub mod traits;

pub use h264::{OpenH264Encoder, OpenH264Factory};
pub use traits::{EncoderConfig, VideoEncoder, VideoEncoderFactory};
