use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use super::{CoverExtractor, ExtractedMetadata, Platform, non_empty};
use crate::{error::ExtractError, http::BROWSER_USER_AGENT};

const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:youtube\.com/watch\?(?:[^#]*&)?v=|youtu\.be/|youtube\.com/embed/)([^&\n?#/]+)",
    )
    .expect("youtube id pattern should compile")
});

fn video_id(video_url: &str) -> Option<String> {
    VIDEO_ID
        .captures(video_url)
        .map(|caps| caps[1].to_string())
}

/// Thumbnails follow a fixed URL convention, no API call needed.
pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")
}

pub fn oembed_url(video_id: &str) -> String {
    let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
    let encoded: String = form_urlencoded::byte_serialize(watch_url.as_bytes()).collect();
    format!("{OEMBED_ENDPOINT}?url={encoded}&format=json")
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
}

/// The cover is always available; the title lookup degrades to `None` when
/// oEmbed is slow, blocked or returns garbage.
pub(super) fn extract(
    extractor: &CoverExtractor,
    video_url: &str,
) -> Result<ExtractedMetadata, ExtractError> {
    let id = video_id(video_url).ok_or(ExtractError::UnsupportedPlatform)?;

    let request = extractor
        .request(oembed_url(&id))
        .header("User-Agent", BROWSER_USER_AGENT)
        .header("Accept", "application/json");
    let title = match extractor.get_json::<OEmbed>(&request) {
        Ok(oembed) => non_empty(oembed.title),
        Err(err) => {
            debug!(video_id = %id, reason = %err, "oembed title lookup failed");
            None
        }
    };

    Ok(ExtractedMetadata {
        platform: Platform::Youtube,
        title,
        cover_url: Some(thumbnail_url(&id)),
        duration: None,
        description: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extract::ExtractorSettings,
        http::fake::{FakeClient, Reply},
    };
    use serde_json::json;
    use std::sync::Arc;

    fn extractor(client: Arc<FakeClient>) -> CoverExtractor {
        CoverExtractor::new(client, ExtractorSettings::default())
    }

    #[test]
    fn extracts_ids_from_known_shapes() {
        assert_eq!(video_id("https://youtu.be/abc123").as_deref(), Some("abc123"));
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            video_id("https://www.youtube.com/watch?feature=share&v=xyz_-9").as_deref(),
            Some("xyz_-9")
        );
        assert_eq!(
            video_id("https://www.youtube.com/embed/E1?autoplay=1").as_deref(),
            Some("E1")
        );
        assert_eq!(video_id("https://www.youtube.com/channel/UCx"), None);
    }

    #[test]
    fn oembed_url_encodes_watch_url() {
        assert_eq!(
            oembed_url("abc123"),
            "https://www.youtube.com/oembed?url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabc123&format=json"
        );
    }

    #[test]
    fn cover_survives_failed_title_lookup() {
        let client = Arc::new(FakeClient::new().reply(oembed_url("abc123"), Reply::Timeout));
        let metadata = extractor(client.clone())
            .extract("https://youtu.be/abc123")
            .unwrap();
        assert_eq!(
            metadata.cover_url.as_deref(),
            Some("https://img.youtube.com/vi/abc123/maxresdefault.jpg")
        );
        assert_eq!(metadata.title, None);
        assert_eq!(metadata.platform, Platform::Youtube);
        assert_eq!(client.calls().len(), 1);
    }

    #[test]
    fn title_comes_from_oembed() {
        let client = Arc::new(FakeClient::new().json(
            oembed_url("dQw4w9WgXcQ"),
            json!({"title": "Never Gonna Give You Up", "author_name": "Rick Astley"}),
        ));
        let metadata = extractor(client)
            .extract("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Never Gonna Give You Up"));
        assert_eq!(metadata.duration, None);
    }

    #[test]
    fn page_without_video_id_is_unsupported() {
        let client = Arc::new(FakeClient::new());
        let err = extractor(client.clone())
            .extract("https://www.youtube.com/feed/trending")
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedPlatform));
        assert!(client.calls().is_empty());
    }
}
