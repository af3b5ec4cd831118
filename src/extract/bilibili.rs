use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{CoverExtractor, ExtractedMetadata, Platform, ensure_https, format_duration, non_empty};
use crate::{error::ExtractError, http::BROWSER_USER_AGENT};

pub const BILIBILI_VIEW_API: &str = "https://api.bilibili.com/x/web-interface/view";

// The view API refuses requests without a bilibili.com referer.
const REFERER: &str = "https://www.bilibili.com/";

static BV_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(BV[0-9A-Za-z]+)").expect("bvid pattern should compile"));
static AV_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bav(\d+)").expect("aid pattern should compile"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum VideoId {
    Bvid(String),
    Aid(String),
}

impl VideoId {
    fn api_url(&self) -> String {
        match self {
            Self::Bvid(bvid) => format!("{BILIBILI_VIEW_API}?bvid={bvid}"),
            Self::Aid(aid) => format!("{BILIBILI_VIEW_API}?aid={aid}"),
        }
    }
}

/// BV ids win over av ids when a URL carries both.
fn video_id(video_url: &str) -> Option<VideoId> {
    if let Some(caps) = BV_ID.captures(video_url) {
        return Some(VideoId::Bvid(caps[1].to_string()));
    }
    AV_ID
        .captures(video_url)
        .map(|caps| VideoId::Aid(caps[1].to_string()))
}

#[derive(Debug, Deserialize)]
struct ViewEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<ViewData>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    title: Option<String>,
    pic: Option<String>,
    duration: Option<u64>,
    desc: Option<String>,
}

pub(super) fn extract(
    extractor: &CoverExtractor,
    video_url: &str,
) -> Result<ExtractedMetadata, ExtractError> {
    // Without a BV/av segment the URL is not a video page.
    let id = video_id(video_url).ok_or(ExtractError::UnsupportedPlatform)?;

    let request = extractor
        .request(id.api_url())
        .header("User-Agent", BROWSER_USER_AGENT)
        .header("Referer", REFERER)
        .header("Accept", "application/json");
    let envelope: ViewEnvelope = extractor.get_json(&request)?;

    if envelope.code != 0 {
        let message = if envelope.message.trim().is_empty() {
            format!("code {}", envelope.code)
        } else {
            format!("{} (code {})", envelope.message.trim(), envelope.code)
        };
        return Err(ExtractError::PlatformApiError(message));
    }
    let data = envelope
        .data
        .ok_or_else(|| ExtractError::UpstreamError("bilibili response has no data".into()))?;

    Ok(ExtractedMetadata {
        platform: Platform::Bilibili,
        title: non_empty(data.title),
        cover_url: non_empty(data.pic).map(|pic| ensure_https(&pic)),
        duration: data.duration.map(format_duration),
        description: non_empty(data.desc),
    })
}
