//! WebRTC negotiation
//!
//! ```text
//! offer ──> offer::analyze_offer ──> negotiator::Negotiator ──> answer
//!                                          │
//!                                          v
//!                               transport::PeerTransport
//!                                 (peer::RtcPeerTransport)
//! ```

pub mod answer;
pub mod config;
pub mod negotiator;
pub mod offer;
pub mod peer;
pub mod signaling;
pub mod transport;

pub use answer::{AnswerPostProcessor, PassthroughAnswer, SipInteropAnswer};
pub use config::WebRtcConfig;
pub use negotiator::{Negotiation, Negotiator};
pub use offer::{analyze_offer, AnalyzedOffer, Direction, MediaKind, MediaRequest};
pub use peer::{RtcPeerTransport, RtcPeerTransportFactory};
pub use signaling::{CandidateInit, OfferRequest, TransportState};
pub use transport::{MediaSample, MediaSink, PeerTransport, PeerTransportFactory};
