//! Catalog records and the storage seam the HTTP handlers are given.
//!
//! The JSON shapes mirror what the gallery and admin pages exchange with the
//! API (`coverImage`, `publishDate`, ...). Where the records live is up to the
//! [`VideoStore`] implementation handed to the server at startup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};

use crate::{error::StoreError, placeholder, security::host_matches};

pub const MISSING_COVER_MESSAGE: &str = "No cover";
pub const PROXY_ENDPOINT: &str = "/api/proxy-image";

/// Cover hosts that refuse hotlinked requests and therefore go through the
/// proxy. Each entry must also pass the proxy's default allowlist.
const PROXIED_COVER_DOMAINS: &[&str] = &[
    "hdslb.com",
    "biliimg.com",
    "bilibili.com",
    "img.youtube.com",
    "ytimg.com",
    "ggpht.com",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Github,
    Baidu,
    Aliyun,
    Onedrive,
    #[default]
    Other,
}

/// A download link attached to a video (repository, cloud drive share, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub publish_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Admin form payload for a new video. `id` and `publishDate` are assigned by
/// the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover_image: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

impl VideoDraft {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.title.trim().is_empty() {
            return Err(StoreError::Invalid("title is required".into()));
        }
        validate_resources(&self.resources)
    }

    pub fn into_video(self, id: String, publish_date: NaiveDate) -> Video {
        Video {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            cover_image: self.cover_image.trim().to_string(),
            video_url: blank_to_none(self.video_url),
            resources: self.resources,
            tags: normalize_tags(self.tags),
            publish_date,
            duration: blank_to_none(self.duration),
        }
    }
}

/// Partial update: absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub video_url: Option<String>,
    pub resources: Option<Vec<Resource>>,
    pub tags: Option<Vec<String>>,
    pub duration: Option<String>,
}

impl VideoPatch {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self
            .title
            .as_deref()
            .is_some_and(|title| title.trim().is_empty())
        {
            return Err(StoreError::Invalid("title must not be empty".into()));
        }
        match &self.resources {
            Some(resources) => validate_resources(resources),
            None => Ok(()),
        }
    }
}

impl Video {
    pub fn apply(&mut self, patch: VideoPatch) {
        if let Some(title) = patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(cover_image) = patch.cover_image {
            self.cover_image = cover_image.trim().to_string();
        }
        if let Some(video_url) = patch.video_url {
            self.video_url = blank_to_none(Some(video_url));
        }
        if let Some(resources) = patch.resources {
            self.resources = resources;
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(duration) = patch.duration {
            self.duration = blank_to_none(Some(duration));
        }
    }
}

/// Gallery filter: free-text search plus an optional exact tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoQuery {
    pub q: Option<String>,
    pub tag: Option<String>,
}

impl VideoQuery {
    pub fn matches(&self, video: &Video) -> bool {
        let tag_ok = match self.tag.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => video
                .tags
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(tag)),
            _ => true,
        };
        let search_ok = match self.q.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                video.title.to_lowercase().contains(&needle)
                    || video.description.to_lowercase().contains(&needle)
                    || video
                        .tags
                        .iter()
                        .any(|tag| tag.to_lowercase().contains(&needle))
            }
            _ => true,
        };
        tag_ok && search_ok
    }
}

/// Gallery row: the stored video plus the URL the page should load the cover
/// from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub video: Video,
    pub cover_proxy_url: String,
}

impl From<Video> for CatalogEntry {
    fn from(video: Video) -> Self {
        let cover_proxy_url = proxied_cover_url(&video.cover_image);
        Self {
            video,
            cover_proxy_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: usize,
}

/// Filters and orders videos newest first (ties broken by id, descending).
pub fn search(mut videos: Vec<Video>, query: &VideoQuery) -> Vec<Video> {
    videos.retain(|video| query.matches(video));
    sort_newest_first(&mut videos);
    videos
}

pub fn sort_newest_first(videos: &mut [Video]) {
    videos.sort_by(|a, b| {
        b.publish_date
            .cmp(&a.publish_date)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub fn tag_counts(videos: &[Video]) -> Vec<TagCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for video in videos {
        for tag in &video.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut tags: Vec<TagCount> = counts
        .into_iter()
        .map(|(name, count)| TagCount {
            name: name.to_string(),
            count,
        })
        .collect();
    tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    tags
}

/// Rewrites a stored cover URL for the browser: hotlink-protected hosts go
/// through the proxy, unusable values become an inline placeholder image.
pub fn proxied_cover_url(cover: &str) -> String {
    let cover = cover.trim();
    if cover.is_empty() {
        return missing_cover();
    }
    if cover.starts_with('/') && !cover.starts_with("//") {
        return cover.to_string();
    }
    let Ok(url) = Url::parse(cover) else {
        return missing_cover();
    };
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if PROXIED_COVER_DOMAINS
        .iter()
        .any(|domain| host_matches(&host, domain))
    {
        let encoded: String = form_urlencoded::byte_serialize(cover.as_bytes()).collect();
        format!("{PROXY_ENDPOINT}?url={encoded}")
    } else {
        cover.to_string()
    }
}

fn missing_cover() -> String {
    placeholder::data_url(
        placeholder::DEFAULT_WIDTH,
        placeholder::DEFAULT_HEIGHT,
        MISSING_COVER_MESSAGE,
    )
}

/// `video-<unix millis>`, suffixed until `taken` no longer claims it.
pub fn new_video_id(now: DateTime<Utc>, taken: impl Fn(&str) -> bool) -> String {
    let base = format!("video-{}", now.timestamp_millis());
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|suffix| format!("{base}-{suffix}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Short label reported by the health endpoint.
    fn backend_name(&self) -> &'static str;

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError>;

    async fn get_video(&self, id: &str) -> Result<Option<Video>, StoreError>;

    async fn create_video(&self, draft: VideoDraft) -> Result<Video, StoreError>;

    /// Fails with [`StoreError::NotFound`] when `id` is unknown.
    async fn update_video(&self, id: &str, patch: VideoPatch) -> Result<Video, StoreError>;

    /// Returns whether a video was removed.
    async fn delete_video(&self, id: &str) -> Result<bool, StoreError>;
}

fn validate_resources(resources: &[Resource]) -> Result<(), StoreError> {
    for resource in resources {
        if resource.name.trim().is_empty() || resource.url.trim().is_empty() {
            return Err(StoreError::Invalid(
                "every resource needs a name and a url".into(),
            ));
        }
    }
    Ok(())
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|existing| existing == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn draft(title: &str, tags: &[&str]) -> VideoDraft {
        VideoDraft {
            title: title.into(),
            description: format!("about {title}"),
            cover_image: "https://i0.hdslb.com/bfs/archive/cover.jpg".into(),
            video_url: Some("https://www.bilibili.com/video/BV1xx411c7mD".into()),
            resources: vec![Resource {
                name: "source".into(),
                kind: ResourceKind::Github,
                url: "https://github.com/example/repo".into(),
                password: None,
                description: None,
            }],
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            duration: Some("25:30".into()),
        }
    }

    pub(crate) fn video(id: &str, date: &str, tags: &[&str]) -> Video {
        draft(&format!("Video {id}"), tags).into_video(
            id.into(),
            NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        )
    }
}
