/// Catalog update pipeline.
///
/// Fetching → Merging → Rebuilding → Publishing → Done, with any failure moving
/// to Failed. Nothing is persisted before Publishing, and Publishing is a single
/// all-or-nothing store call, so a failed run always leaves the previous
/// generation live.

use std::fmt;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::catalog::{self, Catalog, CatalogItem};
use crate::config::IndexConfig;
use crate::errors::AnimatchError;
use crate::features::TfidfVectorizer;
use crate::similarity::{self, NeighborTable};
use crate::source::CatalogSource;
use crate::store::{ArtifactStore, Generation};

/// Update run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Fetching,
    Merging,
    Rebuilding,
    Publishing,
    Failed,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Fetching => write!(f, "fetching"),
            PipelineState::Merging => write!(f, "merging"),
            PipelineState::Rebuilding => write!(f, "rebuilding"),
            PipelineState::Publishing => write!(f, "publishing"),
            PipelineState::Failed => write!(f, "failed"),
            PipelineState::Done => write!(f, "done"),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub generation_id: String,
    /// False for dry runs
    pub published: bool,
    /// Items in the fetched batch
    pub fetched: usize,
    /// Batch items new to the catalog
    pub added: usize,
    /// Batch items whose id was already present
    pub rejected: usize,
    pub total_items: usize,
    /// Titles of the trending snapshot, best first
    pub trending: Vec<String>,
    pub duration_ms: u128,
}

/// Recompute feature documents, vectors, and the neighbor table for `catalog`.
///
/// Row order of the returned catalog is unchanged and is the join key of the
/// returned table.
pub fn rebuild(catalog: Catalog, neighbors_k: usize) -> Result<(Catalog, NeighborTable), AnimatchError> {
    rebuild_with_progress(catalog, neighbors_k, &ProgressBar::hidden())
}

fn rebuild_with_progress(
    mut catalog: Catalog,
    neighbors_k: usize,
    progress: &ProgressBar,
) -> Result<(Catalog, NeighborTable), AnimatchError> {
    if catalog.is_empty() {
        return Err(AnimatchError::EmptyCatalog);
    }

    catalog.refresh_features();
    let documents: Vec<&str> = catalog
        .items()
        .iter()
        .map(|item| item.combined_features.as_str())
        .collect();

    let mut vectorizer = TfidfVectorizer::english();
    let vectors = vectorizer.fit_transform(&documents);
    tracing::debug!(
        documents = documents.len(),
        vocabulary = vectorizer.vocabulary_size(),
        "Feature vectors fitted"
    );

    let table = similarity::build_with_progress(&vectors, neighbors_k, progress);
    Ok((catalog, table))
}

fn similarity_progress(rows: usize) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(rows as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("similarity [{pos}/{len}] {bar:40} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// Orchestrates one catalog update run against a source and a store.
pub struct UpdatePipeline {
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn ArtifactStore>,
    config: IndexConfig,
    dry_run: bool,
    state: PipelineState,
}

impl UpdatePipeline {
    pub fn new(source: Arc<dyn CatalogSource>, store: Arc<dyn ArtifactStore>, config: IndexConfig) -> Self {
        UpdatePipeline {
            source,
            store,
            config,
            dry_run: false,
            state: PipelineState::Idle,
        }
    }

    /// Stop after Rebuilding and report without publishing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::info!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    /// Run the full update. On error the pipeline ends in `Failed` and nothing was published.
    pub async fn run(&mut self) -> Result<UpdateReport, AnimatchError> {
        let start = Instant::now();
        match self.run_stages(start).await {
            Ok(report) => {
                self.transition(PipelineState::Done);
                tracing::info!(
                    generation_id = %report.generation_id,
                    fetched = report.fetched,
                    added = report.added,
                    total_items = report.total_items,
                    published = report.published,
                    duration_ms = report.duration_ms as u64,
                    "Catalog update complete"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = self.state;
                self.transition(PipelineState::Failed);
                tracing::error!(
                    state = %failed_in,
                    error = %e,
                    "Catalog update aborted, previous generation stays live"
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self, start: Instant) -> Result<UpdateReport, AnimatchError> {
        self.transition(PipelineState::Fetching);
        let batch = self.source.fetch_batch().await?;
        tracing::info!(source = %self.source.describe(), items = batch.len(), "Fetched ingestion batch");

        self.transition(PipelineState::Merging);
        let existing = match self.store.load_current().await? {
            Some(generation) => {
                if !generation.is_current_feature_version() {
                    tracing::warn!(
                        generation_id = %generation.id,
                        stored = %generation.feature_version,
                        "Live generation was built with another feature version, rebuilding all vectors"
                    );
                }
                generation.catalog
            }
            None => Catalog::new(),
        };
        let merged = catalog::merge(&existing, &batch);
        let trending = catalog::select_trending(&batch, self.config.trending_n);
        tracing::info!(
            existing = existing.len(),
            added = merged.added,
            rejected = merged.rejected,
            "Batch merged"
        );
        for title in merged.catalog.duplicate_titles() {
            tracing::warn!(title = %title, "Duplicate title, recommendations resolve to its first row");
        }

        self.transition(PipelineState::Rebuilding);
        let generation = self
            .build_generation(merged.catalog, trending)
            .await?;

        let published = if self.dry_run {
            tracing::info!(generation_id = %generation.id, "Dry run, skipping publish");
            false
        } else {
            self.transition(PipelineState::Publishing);
            self.store.publish(&generation).await?;
            true
        };

        Ok(UpdateReport {
            generation_id: generation.id.clone(),
            published,
            fetched: batch.len(),
            added: merged.added,
            rejected: merged.rejected,
            total_items: generation.catalog.len(),
            trending: generation.trending.iter().map(|i| i.title.clone()).collect(),
            duration_ms: start.elapsed().as_millis(),
        })
    }

    async fn build_generation(&self, catalog: Catalog, trending: Vec<CatalogItem>) -> Result<Generation, AnimatchError> {
        let neighbors_k = self.config.neighbors_k;
        // O(n²) similarity build stays off the async runtime threads
        let (catalog, neighbors) = tokio::task::spawn_blocking(move || {
            let progress = similarity_progress(catalog.len());
            rebuild_with_progress(catalog, neighbors_k, &progress)
        })
        .await
        .map_err(|e| AnimatchError::Internal(format!("Rebuild task failed: {}", e)))??;

        Generation::new(catalog, trending, neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::catalog::tests::item;
    use crate::store::sqlite::SqliteArtifactStore;

    struct StaticSource {
        batch: Result<Vec<CatalogItem>, fn() -> AnimatchError>,
    }

    #[async_trait]
    impl CatalogSource for StaticSource {
        async fn fetch_batch(&self) -> Result<Vec<CatalogItem>, AnimatchError> {
            match &self.batch {
                Ok(items) => Ok(items.clone()),
                Err(make_err) => Err(make_err()),
            }
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    fn anime(item_id: i64, title: &str, synopsis: &str, score: Option<f64>) -> CatalogItem {
        CatalogItem {
            synopsis: synopsis.to_string(),
            score,
            ..item(item_id, title)
        }
    }

    fn source(items: Vec<CatalogItem>) -> Arc<dyn CatalogSource> {
        Arc::new(StaticSource { batch: Ok(items) })
    }

    fn failing(make_err: fn() -> AnimatchError) -> Arc<dyn CatalogSource> {
        Arc::new(StaticSource { batch: Err(make_err) })
    }

    fn first_batch() -> Vec<CatalogItem> {
        vec![
            anime(1, "Mecha Pilots", "giant robot pilots defend the colony", Some(8.1)),
            anime(2, "Kitchen Tales", "a cook opens a tiny restaurant", Some(7.2)),
            anime(3, "Robot Academy", "students pilot giant robot suits", None),
        ]
    }

    #[test]
    fn test_rebuild_identical_items() {
        let items = (1..=3)
            .map(|id| anime(id, &format!("Same {}", id), "haunted lighthouse keeper", None))
            .collect();
        let (catalog, table) = rebuild(Catalog::from_items(items).unwrap(), 10).unwrap();
        assert_eq!(table.row(0).unwrap(), &[1, 2]);
        assert_eq!(table.row(1).unwrap(), &[0, 2]);
        assert_eq!(table.row(2).unwrap(), &[0, 1]);
        assert!(catalog.items().iter().all(|i| !i.combined_features.is_empty()));
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let catalog = Catalog::from_items(first_batch()).unwrap();
        let (_, a) = rebuild(catalog.clone(), 10).unwrap();
        let (_, b) = rebuild(catalog, 10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rebuild_empty_catalog_fails() {
        assert!(matches!(rebuild(Catalog::new(), 10), Err(AnimatchError::EmptyCatalog)));
    }

    #[tokio::test]
    async fn test_run_publishes_generation() {
        let store = Arc::new(SqliteArtifactStore::in_memory().await.unwrap());
        let mut pipeline = UpdatePipeline::new(source(first_batch()), store.clone(), IndexConfig::default());

        let report = pipeline.run().await.expect("run should succeed");

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(report.published);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.added, 3);
        assert_eq!(report.total_items, 3);
        assert_eq!(report.trending, vec!["Mecha Pilots", "Kitchen Tales", "Robot Academy"]);

        let live = store.load_current().await.unwrap().unwrap();
        assert_eq!(live.id, report.generation_id);
        assert_eq!(live.index().query(1, 1).unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_second_run_keeps_existing_rows() {
        let store = Arc::new(SqliteArtifactStore::in_memory().await.unwrap());
        UpdatePipeline::new(source(first_batch()), store.clone(), IndexConfig::default())
            .run()
            .await
            .unwrap();

        let second = vec![
            anime(2, "Kitchen Tales (renamed)", "changed", Some(9.9)),
            anime(4, "Lighthouse", "haunted lighthouse keeper", Some(6.0)),
        ];
        let report = UpdatePipeline::new(source(second), store.clone(), IndexConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.rejected, 1);

        let live = store.load_current().await.unwrap().unwrap();
        let ids: Vec<i64> = live.catalog.items().iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(live.catalog.get(1).unwrap().title, "Kitchen Tales");
        // Trending reflects the latest batch as fetched
        assert_eq!(live.trending[0].title, "Kitchen Tales (renamed)");
    }

    #[tokio::test]
    async fn test_rerunning_same_batch_is_idempotent() {
        let store = Arc::new(SqliteArtifactStore::in_memory().await.unwrap());
        for _ in 0..2 {
            UpdatePipeline::new(source(first_batch()), store.clone(), IndexConfig::default())
                .run()
                .await
                .unwrap();
        }
        let live = store.load_current().await.unwrap().unwrap();
        assert_eq!(live.catalog.len(), 3);
    }

    #[tokio::test]
    async fn test_source_failure_leaves_previous_generation_live() {
        let store = Arc::new(SqliteArtifactStore::in_memory().await.unwrap());
        let first = UpdatePipeline::new(source(first_batch()), store.clone(), IndexConfig::default())
            .run()
            .await
            .unwrap();

        for make_err in [
            (|| AnimatchError::SourceUnavailable("timeout".to_string())) as fn() -> AnimatchError,
            || AnimatchError::MalformedSource("missing data".to_string()),
        ] {
            let mut pipeline = UpdatePipeline::new(failing(make_err), store.clone(), IndexConfig::default());
            let err = pipeline.run().await.unwrap_err();
            assert!(err.is_ingestion_failure());
            assert_eq!(pipeline.state(), PipelineState::Failed);
        }

        let live = store.load_current().await.unwrap().unwrap();
        assert_eq!(live.id, first.generation_id);
    }

    #[tokio::test]
    async fn test_empty_first_batch_is_not_published() {
        let store = Arc::new(SqliteArtifactStore::in_memory().await.unwrap());
        let mut pipeline = UpdatePipeline::new(source(Vec::new()), store.clone(), IndexConfig::default());
        assert!(matches!(pipeline.run().await, Err(AnimatchError::EmptyCatalog)));
        assert!(store.load_current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_publish() {
        let store = Arc::new(SqliteArtifactStore::in_memory().await.unwrap());
        let report = UpdatePipeline::new(source(first_batch()), store.clone(), IndexConfig::default())
            .with_dry_run(true)
            .run()
            .await
            .unwrap();
        assert!(!report.published);
        assert!(store.load_current().await.unwrap().is_none());
    }
}
