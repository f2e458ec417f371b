//! SIP signaling over UDP

pub mod message;
pub mod server;

pub use server::SipServer;
