//! SIP user agent server over UDP
//!
//! Each INVITE is answered through [`SessionManager::negotiate`]; the
//! Call-ID is remembered so that BYE can close the session it created.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rsip::{Method, Request};

use super::message::{
    call_id, contact_for, encode, options_response, parse_request, response_to, sdp_body,
    set_sdp_body,
};
use crate::config::SipConfig;
use crate::error::{AppError, Result};
use crate::session::{CloseReason, SessionManager, SessionState};

const SIP_BUF_SIZE: usize = 65_535;

/// Call-ID bookkeeping
enum CallEntry {
    /// INVITE accepted, negotiation still running
    Pending,
    /// Answered; the final response is kept for INVITE retransmissions
    Answered { session_id: String, response: Vec<u8> },
}

pub struct SipServer {
    socket: UdpSocket,
    sessions: Arc<SessionManager>,
    config: SipConfig,
    calls: Arc<Mutex<HashMap<String, CallEntry>>>,
}

impl SipServer {
    pub async fn bind(config: SipConfig, sessions: Arc<SessionManager>) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(&config.bind_address).await.map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("SIP bind to {} failed: {}", config.bind_address, e),
            ))
        })?;
        Ok(Arc::new(Self {
            socket,
            sessions,
            config,
            calls: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop; returns when `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            info!("SIP server listening on udp://{}", addr);
        }
        let mut buf = vec![0u8; SIP_BUF_SIZE];

        loop {
            let (len, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("SIP server shutdown signal received");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("SIP receive failed: {}", e);
                        continue;
                    }
                },
            };

            // Keep-alive pings are bare CRLFs
            if buf[..len].iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            let request = match parse_request(&buf[..len]) {
                Ok(request) => request,
                Err(e) => {
                    debug!("Dropping datagram from {}: {}", peer, e);
                    continue;
                }
            };

            debug!("SIP {} from {}", request.method, peer);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_request(request, peer).await {
                    warn!("SIP request from {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn handle_request(&self, request: Request, peer: SocketAddr) -> Result<()> {
        match request.method {
            Method::Invite => self.handle_invite(request, peer).await,
            Method::Bye => self.handle_bye(request, peer).await,
            Method::Ack => Ok(()),
            Method::Options => self.send(&encode(options_response(&request)), peer).await,
            _ => {
                self.send(&encode(response_to(&request, 501, None)), peer)
                    .await
            }
        }
    }

    async fn handle_invite(&self, request: Request, peer: SocketAddr) -> Result<()> {
        let Some(call_id) = call_id(&request) else {
            return self.send(&encode(response_to(&request, 400, None)), peer).await;
        };

        let retransmit = {
            let mut calls = self.calls.lock();
            match calls.get(&call_id) {
                Some(CallEntry::Pending) => Some(None),
                Some(CallEntry::Answered { response, .. }) => Some(Some(response.clone())),
                None => {
                    calls.insert(call_id.clone(), CallEntry::Pending);
                    None
                }
            }
        };
        match retransmit {
            Some(Some(response)) => {
                debug!("INVITE retransmission for answered call {}", call_id);
                return self.send(&response, peer).await;
            }
            Some(None) => {
                debug!("Ignoring INVITE retransmission for call {}", call_id);
                return Ok(());
            }
            None => {}
        }

        self.send(&encode(response_to(&request, 100, None)), peer)
            .await?;

        let to_tag = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

        // SIP peers embed their candidates in the offer
        let result = match sdp_body(&request) {
            Ok(offer) => {
                self.sessions
                    .negotiate(offer, Vec::new(), self.config.answer_normalization)
                    .await
            }
            Err(e) => Err(e),
        };

        let call = match result {
            Ok(call) => call,
            Err(e) => {
                self.calls.lock().remove(&call_id);
                let status = match &e {
                    AppError::MalformedOffer(_) => 488,
                    AppError::ServiceUnavailable(_) => 503,
                    _ => 500,
                };
                warn!("INVITE {} rejected with {}: {}", call_id, status, e);
                let response = response_to(&request, status, Some(&to_tag));
                return self.send(&encode(response), peer).await;
            }
        };

        let mut response = response_to(&request, 200, Some(&to_tag));
        if let Some(contact) = contact_for(&request, &self.config.display_name) {
            response.headers.push(contact);
        }
        set_sdp_body(&mut response, call.answer);
        let bytes = encode(response);

        self.calls.lock().insert(
            call_id.clone(),
            CallEntry::Answered {
                session_id: call.session_id.clone(),
                response: bytes.clone(),
            },
        );
        info!("INVITE {} answered, session {}", call_id, call.session_id);
        self.forget_when_closed(&call_id, &call.session_id).await;

        self.send(&bytes, peer).await
    }

    async fn handle_bye(&self, request: Request, peer: SocketAddr) -> Result<()> {
        let entry = call_id(&request).and_then(|id| self.calls.lock().remove(&id));

        let status = match entry {
            Some(CallEntry::Answered { session_id, .. }) => {
                match self
                    .sessions
                    .close_session(&session_id, CloseReason::Explicit)
                    .await
                {
                    Ok(()) => info!("BYE closed session {}", session_id),
                    Err(e) => debug!("BYE for session {}: {}", session_id, e),
                }
                200
            }
            Some(CallEntry::Pending) | None => 481,
        };

        self.send(&encode(response_to(&request, status, None)), peer)
            .await
    }

    /// Drop the Call-ID mapping once its session is closed
    async fn forget_when_closed(&self, call_id: &str, session_id: &str) {
        let Some(session) = self.sessions.get(session_id).await else {
            self.calls.lock().remove(call_id);
            return;
        };

        let calls = self.calls.clone();
        let call_id = call_id.to_string();
        let session_id = session_id.to_string();
        let mut state_rx = session.lifecycle().subscribe();
        session.spawn(async move {
            let _ = state_rx.wait_for(|s| *s == SessionState::Closed).await;
            let mut calls = calls.lock();
            let owned = matches!(
                calls.get(&call_id),
                Some(CallEntry::Answered { session_id: id, .. }) if *id == session_id
            );
            if owned {
                calls.remove(&call_id);
                debug!("Call {} forgotten", call_id);
            }
        });
    }

    async fn send(&self, data: &[u8], peer: SocketAddr) -> Result<()> {
        self.socket.send_to(data, peer).await?;
        Ok(())
    }
}
