//! Outbound HTTP seam.
//!
//! The proxy and the extractor never talk to `ureq` directly; they go through
//! [`HttpClient`] so that handlers can be exercised without touching the
//! network. Every request carries its own timeout, which `ureq` enforces as an
//! overall deadline covering connect, headers and body.
//!
//! Redirects are never followed here: a 3xx comes back as a response with its
//! `Location`, and callers that accept redirects re-check the target first.

use std::{
    fmt, io,
    io::Read,
    time::Duration,
};

use crate::error::TransportError;

/// Desktop browser identity sent to third-party origins and platform APIs.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A single GET request with explicit headers and a bounded wait.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub timeout: Duration,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Case-insensitive header lookup, mostly useful for assertions.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response head plus a lazily consumed body.
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    /// Raw `Location` header, kept for 3xx responses.
    pub location: Option<String>,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Outcome of reading a body under a byte ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    TooLarge,
    Transport(TransportError),
}

impl UpstreamResponse {
    pub fn new(
        status: u16,
        content_type: Option<String>,
        content_length: Option<u64>,
        body: impl Read + Send + 'static,
    ) -> Self {
        Self {
            status,
            content_type,
            content_length,
            location: None,
            body: Box::new(body),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Reads the body, refusing anything above `limit` bytes. A declared
    /// `content-length` over the limit is rejected before reading.
    pub fn read_limited(self, limit: u64) -> Result<Vec<u8>, BodyError> {
        if self.content_length.is_some_and(|declared| declared > limit) {
            return Err(BodyError::TooLarge);
        }
        let mut bytes = Vec::new();
        self.body
            .take(limit.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|err| BodyError::Transport(classify_io(&err)))?;
        if bytes.len() as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        Ok(bytes)
    }
}

pub trait HttpClient: Send + Sync {
    /// Issues a GET. Non-2xx statuses (3xx included) are returned as
    /// responses, only transport-level failures become errors.
    fn get(&self, request: &OutboundRequest) -> Result<UpstreamResponse, TransportError>;
}

/// Production client backed by a shared `ureq` agent (connection pooling is
/// handled by the agent itself). The agent has redirects switched off.
#[derive(Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new().redirects(0).build();
        Self { agent }
    }
}

impl Default for UreqClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for UreqClient {
    fn get(&self, request: &OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let mut call = self.agent.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let response = match call.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => return Err(classify_transport(&transport)),
        };

        let status = response.status();
        let content_type = response.header("content-type").map(str::to_owned);
        let content_length = response
            .header("content-length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        let location = response.header("location").map(str::to_owned);
        let upstream =
            UpstreamResponse::new(status, content_type, content_length, response.into_reader());
        Ok(match location {
            Some(location) => upstream.with_location(location),
            None => upstream,
        })
    }
}

fn classify_transport(transport: &ureq::Transport) -> TransportError {
    let io_timeout = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|err| is_timeout_kind(err.kind()));
    let message = transport.to_string();
    if io_timeout || message.contains("timed out") {
        TransportError::Timeout
    } else {
        TransportError::Network(message)
    }
}

fn classify_io(err: &io::Error) -> TransportError {
    if is_timeout_kind(err.kind()) {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

// SO_RCVTIMEO surfaces as EAGAIN on Linux.
fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
