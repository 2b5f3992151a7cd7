/// File-backed catalog source
///
/// Reads a saved response body in the same JSON shape the HTTP source consumes.
/// Used for offline reindexing and for seeding test databases.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{parse_page, CatalogSource};
use crate::catalog::CatalogItem;
use crate::errors::AnimatchError;

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileSource {
    async fn fetch_batch(&self) -> Result<Vec<CatalogItem>, AnimatchError> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AnimatchError::SourceUnavailable(format!("Cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(parse_page(&body)?.items)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
