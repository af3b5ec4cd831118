//! Interchangeable [`VideoStore`] backends.

mod json;
mod memory;
mod sql;

use std::{path::Path, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::catalog::VideoStore;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sql::SqlStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Json,
    Sqlite,
}

impl StoreKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "json" | "file" => Some(Self::Json),
            "sqlite" | "sql" | "db" | "libsql" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn default_data_path(self) -> &'static str {
        match self {
            Self::Memory => "",
            Self::Json => "data/videos.json",
            Self::Sqlite => "data/videos.db",
        }
    }
}

/// Opens the configured backend. `path` is ignored for the memory store.
pub async fn open_store(kind: StoreKind, path: &Path) -> Result<Arc<dyn VideoStore>> {
    let store: Arc<dyn VideoStore> = match kind {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Json => Arc::new(JsonFileStore::open(path)?),
        StoreKind::Sqlite => Arc::new(SqlStore::open(path).await?),
    };
    Ok(store)
}
