//! Synthetic video production
//!
//! A [`FrameDrawer`] paints into the pipeline's RGBA frame, the pipeline
//! encodes it to H.264 and hands back a [`VideoFramePacket`].

pub mod canvas;
pub mod encoder;
pub mod frame;
pub mod pipeline;

pub use canvas::{FrameDrawer, SceneDrawer};
pub use encoder::{EncoderConfig, OpenH264Factory, VideoEncoder, VideoEncoderFactory};
pub use frame::{Rgba, RgbaFrame, VideoFramePacket};
pub use pipeline::{EncodingPipeline, PipelineStats};
