use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    catalog::{Video, VideoDraft, VideoPatch, VideoStore, new_video_id},
    error::StoreError,
};

/// Transient store: contents vanish with the process. New videos are kept at
/// the front so listing order matches creation order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    videos: RwLock<Vec<Video>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_videos(videos: Vec<Video>) -> Self {
        Self {
            videos: RwLock::new(videos),
        }
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        Ok(self.videos.read().clone())
    }

    async fn get_video(&self, id: &str) -> Result<Option<Video>, StoreError> {
        Ok(self.videos.read().iter().find(|video| video.id == id).cloned())
    }

    async fn create_video(&self, draft: VideoDraft) -> Result<Video, StoreError> {
        draft.validate()?;
        let now = Utc::now();
        let mut videos = self.videos.write();
        let id = new_video_id(now, |candidate| videos.iter().any(|video| video.id == candidate));
        let video = draft.into_video(id, now.date_naive());
        videos.insert(0, video.clone());
        Ok(video)
    }

    async fn update_video(&self, id: &str, patch: VideoPatch) -> Result<Video, StoreError> {
        patch.validate()?;
        let mut videos = self.videos.write();
        let video = videos
            .iter_mut()
            .find(|video| video.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        video.apply(patch);
        Ok(video.clone())
    }

    async fn delete_video(&self, id: &str) -> Result<bool, StoreError> {
        let mut videos = self.videos.write();
        let before = videos.len();
        videos.retain(|video| video.id != id);
        Ok(videos.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{draft, video};

    #[tokio::test]
    async fn crud_round_trip() {
        let store = MemoryStore::new();
        let first = store.create_video(draft("First", &["a"])).await.unwrap();
        let second = store.create_video(draft("Second", &[])).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.publish_date, Utc::now().date_naive());

        let listed = store.list_videos().await.unwrap();
        assert_eq!(listed[0].id, second.id);

        let updated = store
            .update_video(
                &first.id,
                VideoPatch {
                    title: Some("First, edited".into()),
                    ..VideoPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "First, edited");
        assert_eq!(
            store.get_video(&first.id).await.unwrap().unwrap().title,
            "First, edited"
        );

        assert!(store.delete_video(&first.id).await.unwrap());
        assert!(!store.delete_video(&first.id).await.unwrap());
        assert!(store.get_video(&first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_unknown_video_is_not_found() {
        let store = MemoryStore::with_videos(vec![video("video-1", "2024-01-01", &[])]);
        let err = store
            .update_video("video-2", VideoPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "video-2"));
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.create_video(draft("", &[])).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(store.list_videos().await.unwrap().is_empty());
    }
}
