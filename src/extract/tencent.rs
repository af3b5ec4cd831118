//! Tencent Video has no public metadata endpoint; the cover is derived from
//! the page id, everything else is left empty.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ExtractedMetadata, Platform};
use crate::error::ExtractError;

static PAGE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/([a-zA-Z0-9]+)\.html").expect("tencent id pattern should compile")
});

pub(super) fn extract(video_url: &str) -> Result<ExtractedMetadata, ExtractError> {
    let id = PAGE_ID
        .captures(video_url)
        .map(|caps| caps[1].to_string())
        .ok_or(ExtractError::UnsupportedPlatform)?;

    Ok(ExtractedMetadata {
        cover_url: Some(format!(
            "https://puui.qpic.cn/vcover_hz_pic/0/{id}_496_280.jpg"
        )),
        ..ExtractedMetadata::empty(Platform::Tencent)
    })
}
