//! Video metadata extraction from public platform APIs.
//!
//! The watch URL's host decides the platform through an ordered table; the
//! first match wins. Each platform module then turns the URL into an id and
//! calls that platform's JSON endpoint (or a deterministic thumbnail URL
//! convention) at most once.

mod bilibili;
mod tencent;
mod youtube;

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{info, warn};
use url::Url;

use crate::{
    error::ExtractError,
    http::{BodyError, HttpClient, OutboundRequest},
    security::host_matches,
};

pub use bilibili::BILIBILI_VIEW_API;
pub use youtube::{oembed_url, thumbnail_url};

pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(8);

const MAX_API_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Human-readable list served by `GET /api/extract-cover`.
pub const SUPPORTED_PLATFORMS: &[&str] = &[
    "Bilibili (bilibili.com, b23.tv)",
    "YouTube (youtube.com, youtu.be)",
    "Tencent Video (v.qq.com) - cover only",
    "iQiyi (iqiyi.com) - not supported yet",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bilibili,
    Youtube,
    Tencent,
    Iqiyi,
    Unknown,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bilibili => "bilibili",
            Self::Youtube => "youtube",
            Self::Tencent => "tencent",
            Self::Iqiyi => "iqiyi",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hosts per platform, checked in order; subdomains match too.
const PLATFORM_HOSTS: &[(Platform, &[&str])] = &[
    (Platform::Bilibili, &["bilibili.com", "b23.tv"]),
    (Platform::Youtube, &["youtube.com", "youtu.be"]),
    (Platform::Tencent, &["v.qq.com"]),
    (Platform::Iqiyi, &["iqiyi.com"]),
];

/// First platform whose hosts include the URL's host. Scheme-less input such
/// as `youtu.be/abc` is read as https.
pub fn detect_platform(video_url: &str) -> Platform {
    let video_url = video_url.trim();
    let parsed = Url::parse(video_url).or_else(|_| Url::parse(&format!("https://{video_url}")));
    let Some(host) = parsed
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    else {
        return Platform::Unknown;
    };
    PLATFORM_HOSTS
        .iter()
        .find(|(_, hosts)| hosts.iter().any(|domain| host_matches(&host, domain)))
        .map(|(platform, _)| *platform)
        .unwrap_or(Platform::Unknown)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedMetadata {
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExtractedMetadata {
    fn empty(platform: Platform) -> Self {
        Self {
            platform,
            title: None,
            cover_url: None,
            duration: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub timeout: Duration,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }
}

pub struct CoverExtractor {
    client: Arc<dyn HttpClient>,
    settings: ExtractorSettings,
}

impl CoverExtractor {
    pub fn new(client: Arc<dyn HttpClient>, settings: ExtractorSettings) -> Self {
        Self { client, settings }
    }

    /// Resolves metadata for a watch URL. Blocking, like the proxy.
    pub fn extract(&self, video_url: &str) -> Result<ExtractedMetadata, ExtractError> {
        let video_url = video_url.trim();
        if video_url.is_empty() {
            return Err(ExtractError::InvalidInput("missing videoUrl".into()));
        }

        let platform = detect_platform(video_url);
        let result = match platform {
            Platform::Bilibili => bilibili::extract(self, video_url),
            Platform::Youtube => youtube::extract(self, video_url),
            Platform::Tencent => tencent::extract(video_url),
            Platform::Iqiyi | Platform::Unknown => Err(ExtractError::UnsupportedPlatform),
        };

        match &result {
            Ok(metadata) => info!(
                platform = %platform,
                has_title = metadata.title.is_some(),
                has_cover = metadata.cover_url.is_some(),
                "extracted video metadata"
            ),
            Err(err) => warn!(platform = %platform, url = video_url, reason = %err, "metadata extraction failed"),
        }
        result
    }

    fn request(&self, url: impl Into<String>) -> OutboundRequest {
        OutboundRequest::get(url, self.settings.timeout)
    }

    /// GETs a JSON document. Non-2xx answers count as platform errors,
    /// unparseable bodies as upstream errors.
    fn get_json<T: DeserializeOwned>(&self, request: &OutboundRequest) -> Result<T, ExtractError> {
        let response = self.client.get(request)?;
        if !response.is_success() {
            return Err(ExtractError::PlatformApiError(format!(
                "HTTP {}",
                response.status
            )));
        }
        let bytes = response
            .read_limited(MAX_API_RESPONSE_BYTES)
            .map_err(|err| match err {
                BodyError::TooLarge => ExtractError::UpstreamError("response too large".into()),
                BodyError::Transport(transport) => transport.into(),
            })?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ExtractError::UpstreamError(format!("malformed response: {err}")))
    }
}

/// `H:MM:SS` when there is at least one hour, otherwise `M:SS`.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Upgrades protocol-relative and plain-http URLs to https.
pub fn ensure_https(url: &str) -> String {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else {
        url.to_string()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
