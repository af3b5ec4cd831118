use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::{
    catalog::{Video, VideoDraft, VideoPatch, VideoStore, new_video_id},
    error::StoreError,
};

/// Keeps the whole catalog in one `videos.json` array, the same file the
/// static site build reads. Every mutation rewrites the file atomically
/// before the in-memory copy is replaced, so a failed write leaves both
/// untouched.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    videos: Mutex<Vec<Video>>,
}

impl JsonFileStore {
    /// Loads `path`, treating a missing file as an empty catalog.
    pub fn open(path: &Path) -> Result<Self> {
        let videos = if path.exists() {
            let raw =
                fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Parsing catalog {}", path.display()))?
            }
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = videos.len(), "loaded json catalog");
        Ok(Self {
            path: path.to_path_buf(),
            videos: Mutex::new(videos),
        })
    }

    fn persist(&self, videos: &[Video]) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &videos)?;
        Ok(())
    }
}

#[async_trait]
impl VideoStore for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        Ok(self.videos.lock().clone())
    }

    async fn get_video(&self, id: &str) -> Result<Option<Video>, StoreError> {
        Ok(self.videos.lock().iter().find(|video| video.id == id).cloned())
    }

    async fn create_video(&self, draft: VideoDraft) -> Result<Video, StoreError> {
        draft.validate()?;
        let now = Utc::now();
        let mut videos = self.videos.lock();
        let id = new_video_id(now, |candidate| videos.iter().any(|video| video.id == candidate));
        let video = draft.into_video(id, now.date_naive());

        let mut next = Vec::with_capacity(videos.len() + 1);
        next.push(video.clone());
        next.extend(videos.iter().cloned());
        self.persist(&next)?;
        *videos = next;
        Ok(video)
    }

    async fn update_video(&self, id: &str, patch: VideoPatch) -> Result<Video, StoreError> {
        patch.validate()?;
        let mut videos = self.videos.lock();
        let index = videos
            .iter()
            .position(|video| video.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut next = videos.clone();
        next[index].apply(patch);
        let updated = next[index].clone();
        self.persist(&next)?;
        *videos = next;
        Ok(updated)
    }

    async fn delete_video(&self, id: &str) -> Result<bool, StoreError> {
        let mut videos = self.videos.lock();
        if !videos.iter().any(|video| video.id == id) {
            return Ok(false);
        }
        let next: Vec<Video> = videos.iter().filter(|video| video.id != id).cloned().collect();
        self.persist(&next)?;
        *videos = next;
        Ok(true)
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    let payload = serde_json::to_vec_pretty(value).context("Serializing catalog")?;
    fs::write(&tmp_path, payload).with_context(|| format!("Writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("Replacing {}", path.display()))?;
    Ok(())
}
