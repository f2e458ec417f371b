//! SIP message helpers on top of `rsip`
//!
//! Parsing and serialization belong to `rsip`; this module only copies the
//! dialog headers of a request into its response the way RFC 3261 §8.2.6
//! asks, and derives the Contact we advertise from the request's To.

use rsip::headers::{Allow, Contact, ContentLength, ContentType, To};
use rsip::prelude::*;
use rsip::{Header, Headers, Request, Response, SipMessage, StatusCode, Version};

use crate::error::{AppError, Result};

/// Methods this user agent handles
pub const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, OPTIONS";

/// Parse one datagram; only requests are accepted
pub fn parse_request(data: &[u8]) -> Result<Request> {
    let message =
        SipMessage::try_from(data).map_err(|e| AppError::Sip(format!("unparseable message: {}", e)))?;
    match message {
        SipMessage::Request(request) => Ok(request),
        SipMessage::Response(response) => Err(AppError::Sip(format!(
            "unexpected response {}",
            response.status_code
        ))),
    }
}

pub fn call_id(request: &Request) -> Option<String> {
    request.headers.iter().find_map(|header| match header {
        Header::CallId(id) => Some(id.value().to_string()),
        _ => None,
    })
}

/// Request body as SDP text
pub fn sdp_body(request: &Request) -> Result<&str> {
    std::str::from_utf8(&request.body)
        .map_err(|e| AppError::MalformedOffer(format!("body is not UTF-8: {}", e)))
}

/// Response carrying the Via, From, To, Call-ID and CSeq of `request`
///
/// `to_tag` is appended to To unless the request already has one.
pub fn response_to(request: &Request, status: u16, to_tag: Option<&str>) -> Response {
    let mut headers = Headers::default();
    for header in request.headers.iter() {
        match header {
            Header::Via(_) | Header::From(_) | Header::CallId(_) | Header::CSeq(_) => {
                headers.push(header.clone())
            }
            Header::To(to) => {
                let value = match to_tag {
                    Some(tag) if !to.value().contains(";tag=") => {
                        format!("{};tag={}", to.value(), tag)
                    }
                    _ => to.value().to_string(),
                };
                headers.push(Header::To(To::new(value)));
            }
            _ => {}
        }
    }

    Response {
        status_code: StatusCode::from(status),
        version: Version::V2,
        headers,
        body: Vec::new(),
    }
}

/// OPTIONS answer listing [`ALLOWED_METHODS`]
pub fn options_response(request: &Request) -> Response {
    let mut response = response_to(request, 200, None);
    response.headers.push(Header::Allow(Allow::new(ALLOWED_METHODS)));
    response
}

/// Contact advertising the request's To address under `display_name`
pub fn contact_for(request: &Request, display_name: &str) -> Option<Header> {
    let to = request.headers.iter().find_map(|header| match header {
        Header::To(to) => Some(to),
        _ => None,
    })?;
    let uri = to.typed().ok()?.uri;
    Some(Header::Contact(Contact::new(format!(
        "\"{}\" <{}>",
        display_name, uri
    ))))
}

pub fn set_sdp_body(response: &mut Response, sdp: String) {
    response
        .headers
        .push(Header::ContentType(ContentType::new("application/sdp")));
    response.body = sdp.into_bytes();
}

/// Wire form with a Content-Length matching the body
pub fn encode(mut response: Response) -> Vec<u8> {
    let len = response.body.len();
    response
        .headers
        .push(Header::ContentLength(ContentLength::new(len.to_string())));
    response.to_string().into_bytes()
}
