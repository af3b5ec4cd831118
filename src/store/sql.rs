use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use libsql::{Builder, Connection, Row, params};

use crate::{
    catalog::{Resource, Video, VideoDraft, VideoPatch, VideoStore, new_video_id},
    error::StoreError,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            cover_image TEXT NOT NULL DEFAULT '',
            video_url TEXT,
            duration TEXT,
            publish_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resources_json TEXT NOT NULL DEFAULT '[]',
            tags_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_videos_publish_date ON videos(publish_date);
        "#,
    )
    .await?;
    Ok(())
}

/// SQLite-compatible catalog. Resources and tags are stored as JSON columns;
/// the catalog never queries into them.
pub struct SqlStore {
    conn: Connection,
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore").finish_non_exhaustive()
    }
}

impl SqlStore {
    /// Opens (and if necessary creates) the database file and its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    async fn fetch_all(&self) -> Result<Vec<Video>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, title, description, cover_image, video_url, duration,
                       publish_date, resources_json, tags_json
                FROM videos
                ORDER BY publish_date DESC, created_at DESC, rowid DESC
                "#,
                params![],
            )
            .await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    async fn fetch_one(&self, id: &str) -> Result<Option<Video>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, title, description, cover_image, video_url, duration,
                       publish_date, resources_json, tags_json
                FROM videos
                WHERE id = ?1
                "#,
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    /// Inserts `video` unless its id is already taken; reports whether a row
    /// was written.
    async fn insert(&self, video: &Video) -> Result<bool> {
        let resources_json =
            serde_json::to_string(&video.resources).context("serializing resources")?;
        let tags_json = serde_json::to_string(&video.tags).context("serializing tags")?;
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .execute(
                r#"
                INSERT INTO videos (
                    id, title, description, cover_image, video_url, duration,
                    publish_date, created_at, updated_at, resources_json, tags_json
                ) VALUES (
                    :id, :title, :description, :cover_image, :video_url, :duration,
                    :publish_date, :created_at, :updated_at, :resources_json, :tags_json
                )
                ON CONFLICT(id) DO NOTHING
                "#,
                params![
                    video.id.as_str(),
                    video.title.as_str(),
                    video.description.as_str(),
                    video.cover_image.as_str(),
                    video.video_url.as_deref(),
                    video.duration.as_deref(),
                    video.publish_date.format(DATE_FORMAT).to_string(),
                    now.as_str(),
                    now.as_str(),
                    resources_json,
                    tags_json,
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn overwrite(&self, video: &Video) -> Result<()> {
        let resources_json =
            serde_json::to_string(&video.resources).context("serializing resources")?;
        let tags_json = serde_json::to_string(&video.tags).context("serializing tags")?;

        self.conn
            .execute(
                r#"
                UPDATE videos SET
                    title = :title,
                    description = :description,
                    cover_image = :cover_image,
                    video_url = :video_url,
                    duration = :duration,
                    updated_at = :updated_at,
                    resources_json = :resources_json,
                    tags_json = :tags_json
                WHERE id = :id
                "#,
                params![
                    video.title.as_str(),
                    video.description.as_str(),
                    video.cover_image.as_str(),
                    video.video_url.as_deref(),
                    video.duration.as_deref(),
                    Utc::now().to_rfc3339(),
                    resources_json,
                    tags_json,
                    video.id.as_str(),
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VideoStore for SqlStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        Ok(self.fetch_all().await?)
    }

    async fn get_video(&self, id: &str) -> Result<Option<Video>, StoreError> {
        Ok(self.fetch_one(id).await?)
    }

    async fn create_video(&self, draft: VideoDraft) -> Result<Video, StoreError> {
        draft.validate()?;
        let now = Utc::now();
        let base = new_video_id(now, |_| false);
        let mut video = draft.into_video(base.clone(), now.date_naive());
        // The primary key arbitrates concurrent creates in the same millisecond.
        let mut suffix = 2;
        while !self.insert(&video).await? {
            video.id = format!("{base}-{suffix}");
            suffix += 1;
        }
        Ok(video)
    }

    async fn update_video(&self, id: &str, patch: VideoPatch) -> Result<Video, StoreError> {
        patch.validate()?;
        let mut video = self
            .fetch_one(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        video.apply(patch);
        self.overwrite(&video).await?;
        Ok(video)
    }

    async fn delete_video(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM videos WHERE id = ?1", [id])
            .await
            .context("deleting video")?;
        Ok(removed > 0)
    }
}

/// Column order must match the SELECTs in `fetch_all`/`fetch_one`.
fn row_to_video(row: &Row) -> Result<Video> {
    let publish_date: String = row.get(6)?;
    let resources_json: String = row.get(7)?;
    let tags_json: String = row.get(8)?;

    let publish_date = NaiveDate::parse_from_str(&publish_date, DATE_FORMAT)
        .with_context(|| format!("parsing stored publish date {publish_date}"))?;
    let resources: Vec<Resource> =
        serde_json::from_str(&resources_json).context("parsing stored resources JSON")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).context("parsing stored tags JSON")?;

    Ok(Video {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        cover_image: row.get(3)?,
        video_url: row.get(4)?,
        duration: row.get(5)?,
        resources,
        tags,
        publish_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::draft;
    use tempfile::tempdir;

    async fn create_store() -> Result<(tempfile::TempDir, SqlStore)> {
        let dir = tempdir()?;
        let store = SqlStore::open(&dir.path().join("catalog/test.db")).await?;
        Ok((dir, store))
    }

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let mut rows = store.conn.query("PRAGMA journal_mode", params![]).await?;
        let journal: String = rows.next().await?.context("missing journal_mode row")?.get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");

        let mut rows = store
            .conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                ["videos"],
            )
            .await?;
        assert!(rows.next().await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn round_trips_full_records() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let created = store.create_video(draft("Stored", &["rust", "sql"])).await?;
        let loaded = store
            .get_video(&created.id)
            .await?
            .context("created video should load")?;
        assert_eq!(loaded, created);
        Ok(())
    }

    #[tokio::test]
    async fn update_merges_and_persists() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let created = store.create_video(draft("Before", &[])).await?;
        store
            .update_video(
                &created.id,
                VideoPatch {
                    title: Some("After".into()),
                    video_url: Some(String::new()),
                    ..VideoPatch::default()
                },
            )
            .await?;
        let loaded = store.get_video(&created.id).await?.context("video")?;
        assert_eq!(loaded.title, "After");
        assert_eq!(loaded.video_url, None);
        assert_eq!(loaded.description, created.description);

        let err = store
            .update_video("missing", VideoPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn delete_reports_removal_and_ids_stay_unique() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let first = store.create_video(draft("One", &[])).await?;
        let second = store.create_video(draft("Two", &[])).await?;
        assert_ne!(first.id, second.id);
        assert_eq!(store.list_videos().await?.len(), 2);

        assert!(store.delete_video(&first.id).await?);
        assert!(!store.delete_video(&first.id).await?);
        let remaining = store.list_videos().await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn taken_ids_are_never_overwritten() -> Result<()> {
        let (_dir, store) = create_store().await?;
        let first = store.create_video(draft("First", &[])).await?;

        let mut clash = first.clone();
        clash.title = "Clash".into();
        assert!(!store.insert(&clash).await?);
        let loaded = store.get_video(&first.id).await?.context("video")?;
        assert_eq!(loaded.title, "First");

        let mut ids = std::collections::HashSet::new();
        for n in 0..20 {
            let video = store.create_video(draft(&format!("Burst {n}"), &[])).await?;
            assert!(ids.insert(video.id));
        }
        assert_eq!(store.list_videos().await?.len(), 21);
        Ok(())
    }
}
