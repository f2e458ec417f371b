//! Call sessions
//!
//! [`SessionManager::negotiate`] is the single inbound operation: it answers
//! an offer, creates a [`CallSession`] and starts its [`MediaPacer`]. The
//! session owns its transport, endpoints and encoder and tears them down
//! exactly once.

pub mod call;
pub mod lifecycle;
pub mod manager;
pub mod pacer;

pub use call::{CallSession, SessionInfo, SessionMedia, VideoEndpoint};
pub use lifecycle::{CloseReason, SessionLifecycle, SessionState};
pub use manager::{NegotiatedCall, SessionManager};
pub use pacer::MediaPacer;
