//! Server-side image fetching for covers hosted behind hotlink protection.
//!
//! A requested URL is expanded into a short, ordered list of candidates
//! (https first, then the original, then plain http). Candidates are tried one
//! at a time with browser-like headers and a per-attempt timeout; the first
//! image wins. Redirects are followed only while every hop stays on the host
//! allowlist. When nothing works the caller gets either a generated
//! placeholder or the list of failures, depending on [`ExhaustionPolicy`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{CandidateFailure, ProxyError},
    http::{BROWSER_USER_AGENT, BodyError, HttpClient, OutboundRequest, UpstreamResponse},
    placeholder,
    security::{HostPolicy, host_matches},
};

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;
pub const MAX_REDIRECTS: usize = 5;

pub const IMAGE_CACHE_CONTROL: &str = "public, max-age=86400";
pub const PLACEHOLDER_CACHE_CONTROL: &str = "public, max-age=300";

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
const PLACEHOLDER_MESSAGE: &str = "Image unavailable";

const BILIBILI_HOSTS: &[&str] = &["hdslb.com", "biliimg.com", "bilibili.com"];
const BILIBILI_REFERER: &str = "https://www.bilibili.com/";
const YOUTUBE_HOSTS: &[&str] = &["ytimg.com", "youtube.com", "ggpht.com"];
const YOUTUBE_REFERER: &str = "https://www.youtube.com/";

/// What to do once every candidate has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Answer 200 with a generated SVG so `<img>` tags never break.
    Placeholder,
    /// Surface [`ProxyError::Exhausted`] with every candidate's failure.
    Error,
}

impl ExhaustionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "placeholder" | "svg" | "fallback" => Some(Self::Placeholder),
            "error" | "json" | "fail" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub attempt_timeout: Duration,
    pub max_bytes: u64,
    pub on_exhausted: ExhaustionPolicy,
    pub host_policy: HostPolicy,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            on_exhausted: ExhaustionPolicy::Placeholder,
            host_policy: HostPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub is_placeholder: bool,
    /// Candidate that produced the bytes; `None` for placeholders.
    pub source_url: Option<String>,
}

impl ProxiedImage {
    pub fn placeholder(message: &str) -> Self {
        Self {
            bytes: placeholder::default_svg(message).into_bytes(),
            content_type: placeholder::PLACEHOLDER_CONTENT_TYPE.to_string(),
            is_placeholder: true,
            source_url: None,
        }
    }

    pub fn cache_control(&self) -> &'static str {
        if self.is_placeholder {
            PLACEHOLDER_CACHE_CONTROL
        } else {
            IMAGE_CACHE_CONTROL
        }
    }
}

pub struct ImageProxy {
    client: Arc<dyn HttpClient>,
    settings: ProxySettings,
}

impl ImageProxy {
    pub fn new(client: Arc<dyn HttpClient>, settings: ProxySettings) -> Self {
        Self { client, settings }
    }

    /// Fetches `requested_url`, walking the candidate list in order. Blocking:
    /// async callers should run it on the blocking pool.
    pub fn fetch(&self, requested_url: &str) -> Result<ProxiedImage, ProxyError> {
        let url = parse_image_url(requested_url)?;
        if !self.settings.host_policy.permits(&url) {
            return Err(ProxyError::DisallowedHost(
                url.host_str().unwrap_or_default().to_string(),
            ));
        }

        let mut failures = Vec::new();
        for candidate in candidate_urls(&url) {
            match self.attempt(&candidate) {
                Ok(image) => {
                    debug!(url = %candidate, bytes = image.bytes.len(), "proxied image");
                    return Ok(image);
                }
                Err(err) if err.is_fatal() => {
                    warn!(url = %candidate, reason = %err, "image rejected");
                    return Err(err);
                }
                Err(err) => {
                    warn!(url = %candidate, reason = %err, "image candidate failed");
                    failures.push(CandidateFailure {
                        url: candidate.to_string(),
                        error: err,
                    });
                }
            }
        }

        match self.settings.on_exhausted {
            ExhaustionPolicy::Placeholder => {
                warn!(url = %url, attempts = failures.len(), "serving placeholder image");
                Ok(ProxiedImage::placeholder(PLACEHOLDER_MESSAGE))
            }
            ExhaustionPolicy::Error => Err(ProxyError::Exhausted(failures)),
        }
    }

    /// One candidate, redirects included, within a single attempt timeout.
    fn attempt(&self, candidate: &Url) -> Result<ProxiedImage, ProxyError> {
        let deadline = Instant::now() + self.settings.attempt_timeout;
        let mut current = candidate.clone();
        let mut hops = 0;
        let response = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProxyError::UpstreamTimeout);
            }
            let response = self.client.get(&build_request(&current, remaining))?;
            if !response.is_redirect() {
                break response;
            }
            let next = self.redirect_target(&current, &response)?;
            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(ProxyError::UpstreamUnreachable(format!(
                    "more than {MAX_REDIRECTS} redirects"
                )));
            }
            debug!(from = %current, to = %next, "following image redirect");
            current = next;
        };

        if !response.is_success() {
            return Err(ProxyError::UpstreamStatus(response.status));
        }
        let limit = self.settings.max_bytes;
        if response.content_length.is_some_and(|declared| declared > limit) {
            return Err(ProxyError::PayloadTooLarge { limit });
        }

        let content_type = response
            .content_type
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            let shown = if content_type.is_empty() {
                "missing content-type".to_string()
            } else {
                content_type
            };
            return Err(ProxyError::NotAnImage(shown));
        }

        let declared = response.content_length;
        let bytes = response.read_limited(limit).map_err(|err| match err {
            BodyError::TooLarge => ProxyError::PayloadTooLarge { limit },
            BodyError::Transport(transport) => transport.into(),
        })?;
        if let Some(declared) = declared
            && declared != bytes.len() as u64
        {
            return Err(ProxyError::UpstreamUnreachable(format!(
                "body truncated: got {} of {declared} bytes",
                bytes.len()
            )));
        }

        Ok(ProxiedImage {
            bytes,
            content_type,
            is_placeholder: false,
            source_url: Some(current.to_string()),
        })
    }

    /// Resolves a 3xx `Location` against `from` and holds it to the same
    /// rules as the requested URL.
    fn redirect_target(&self, from: &Url, response: &UpstreamResponse) -> Result<Url, ProxyError> {
        let Some(location) = response.location.as_deref() else {
            return Err(ProxyError::UpstreamStatus(response.status));
        };
        let next = from.join(location.trim()).map_err(|err| {
            ProxyError::UpstreamUnreachable(format!("bad redirect location: {err}"))
        })?;
        if !matches!(next.scheme(), "http" | "https") {
            return Err(ProxyError::UpstreamUnreachable(format!(
                "redirect to unsupported scheme {}",
                next.scheme()
            )));
        }
        if !self.settings.host_policy.permits(&next) {
            return Err(ProxyError::DisallowedHost(
                next.host_str().unwrap_or_default().to_string(),
            ));
        }
        Ok(next)
    }
}

/// Parses a caller-supplied URL, accepting only absolute http(s) URLs with a
/// host.
pub fn parse_image_url(raw: &str) -> Result<Url, ProxyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::InvalidUrl("missing url".into()));
    }
    let url = Url::parse(trimmed).map_err(|err| ProxyError::InvalidUrl(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProxyError::InvalidUrl(format!("unsupported scheme {other}")));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProxyError::InvalidUrl("missing host".into()));
    }
    Ok(url)
}

/// https-upgraded form, then the original, then the http-downgraded form,
/// with duplicates removed.
pub fn candidate_urls(url: &Url) -> Vec<Url> {
    let mut candidates: Vec<Url> = Vec::with_capacity(3);
    let variants = [
        with_scheme(url, "https"),
        Some(url.clone()),
        with_scheme(url, "http"),
    ];
    for variant in variants.into_iter().flatten() {
        if !candidates.contains(&variant) {
            candidates.push(variant);
        }
    }
    candidates
}

fn with_scheme(url: &Url, scheme: &str) -> Option<Url> {
    let mut variant = url.clone();
    variant.set_scheme(scheme).ok()?;
    Some(variant)
}

/// Referer/Origin pair an origin expects before it serves its images.
pub fn referer_for(url: &Url) -> (String, String) {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let platform = if BILIBILI_HOSTS.iter().any(|domain| host_matches(&host, domain)) {
        Some(BILIBILI_REFERER)
    } else if YOUTUBE_HOSTS.iter().any(|domain| host_matches(&host, domain)) {
        Some(YOUTUBE_REFERER)
    } else {
        None
    };

    match platform {
        Some(referer) => (
            referer.to_string(),
            referer.trim_end_matches('/').to_string(),
        ),
        None => {
            let origin = url.origin().ascii_serialization();
            (format!("{origin}/"), origin)
        }
    }
}

pub fn build_request(candidate: &Url, timeout: Duration) -> OutboundRequest {
    let (referer, origin) = referer_for(candidate);
    OutboundRequest::get(candidate.as_str(), timeout)
        .header("User-Agent", BROWSER_USER_AGENT)
        .header("Accept", IMAGE_ACCEPT)
        .header("Accept-Language", ACCEPT_LANGUAGE)
        .header("Referer", referer)
        .header("Origin", origin)
}
