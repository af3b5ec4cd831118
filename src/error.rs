//! Error taxonomy shared by the proxy, the extractor and the catalog stores.

use std::fmt;

use thiserror::Error;

/// Failure raised by the outbound HTTP seam. Only two flavours matter to the
/// callers: the bounded wait elapsed, or anything else went wrong on the wire.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

/// Why a single candidate URL did not produce an image.
#[derive(Debug)]
pub struct CandidateFailure {
    pub url: String,
    pub error: ProxyError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.url, self.error)
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid image url: {0}")]
    InvalidUrl(String),
    #[error("domain not allowed: {0}")]
    DisallowedHost(String),
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    #[error("upstream timed out")]
    UpstreamTimeout,
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),
    #[error("upstream content is not an image ({0})")]
    NotAnImage(String),
    #[error("image exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("all {} candidates failed", .0.len())]
    Exhausted(Vec<CandidateFailure>),
}

impl ProxyError {
    /// Fatal errors stop the candidate loop instead of moving on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. })
    }

    /// True when every attempt behind this error ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::UpstreamTimeout => true,
            Self::Exhausted(failures) => {
                !failures.is_empty() && failures.iter().all(|failure| failure.error.is_timeout())
            }
            _ => false,
        }
    }
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::UpstreamTimeout,
            TransportError::Network(message) => Self::UpstreamUnreachable(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("unsupported video platform")]
    UnsupportedPlatform,
    #[error("platform api timed out")]
    UpstreamTimeout,
    #[error("upstream error: {0}")]
    UpstreamError(String),
    #[error("platform api error: {0}")]
    PlatformApiError(String),
}

impl From<TransportError> for ExtractError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::UpstreamTimeout,
            TransportError::Network(message) => Self::UpstreamError(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("invalid video: {0}")]
    Invalid(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
