/// SQLite-backed implementation of ArtifactStore
///
/// Uses sqlx with WAL mode for cross-restart persistence.
/// Runs migrations automatically on initialization.
/// A publish writes the whole generation and moves the current-generation
/// pointer inside one transaction; loads read inside one transaction too, so a
/// reader never pairs a catalog with another generation's neighbor table.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    query::Query,
    sqlite::{
        SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
        SqliteRow, SqliteSynchronous,
    },
    Row, Sqlite,
};

use crate::catalog::{Catalog, CatalogItem};
use crate::errors::AnimatchError;
use crate::similarity::NeighborTable;
use crate::store::{ArtifactStore, Generation, StoreStats};

/// Columns shared by catalog_items and trending_items, in bind order.
const ITEM_COLUMNS: &str = "item_id, title, detail_url, image_url, score, themes, demographics, \
     producers, genres, synopsis, kind, episode_count, source_material, combined_features";

const DEFAULT_KEEP_GENERATIONS: u32 = 3;

/// SQLite-backed artifact store using sqlx connection pool.
pub struct SqliteArtifactStore {
    pool: SqlitePool,
    keep_generations: u32,
}

impl SqliteArtifactStore {
    /// Create a new SqliteArtifactStore, opening (or creating) the database at db_path.
    ///
    /// Creates the parent directory if needed, enables WAL mode, and runs
    /// pending migrations.
    pub async fn new(db_path: &str) -> Result<Self, AnimatchError> {
        // Strip "sqlite://" prefix if present for SqliteConnectOptions
        let path = db_path.strip_prefix("sqlite://").unwrap_or(db_path);

        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AnimatchError::Storage(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let opts = path
            .parse::<SqliteConnectOptions>()
            .map_err(|e| AnimatchError::Storage(format!("Invalid db_path '{}': {}", db_path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| AnimatchError::Storage(format!("Failed to connect to database: {}", e)))?;

        Self::migrate(pool).await
    }

    /// Private in-memory store (single connection) for tests.
    pub async fn in_memory() -> Result<Self, AnimatchError> {
        // One connection that never recycles: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AnimatchError::Storage(format!("Failed to open in-memory database: {}", e)))?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, AnimatchError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AnimatchError::Storage(format!("Migration failed: {}", e)))?;

        Ok(SqliteArtifactStore {
            pool,
            keep_generations: DEFAULT_KEEP_GENERATIONS,
        })
    }

    /// Number of generations retained after each publish (at least 1).
    pub fn with_retention(mut self, keep_generations: u32) -> Self {
        self.keep_generations = keep_generations.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_item<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    item: &'q CatalogItem,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(item.item_id)
        .bind(item.title.as_str())
        .bind(item.detail_url.as_str())
        .bind(item.image_url.as_str())
        .bind(item.score)
        .bind(item.themes.as_str())
        .bind(item.demographics.as_str())
        .bind(item.producers.as_str())
        .bind(item.genres.as_str())
        .bind(item.synopsis.as_str())
        .bind(item.kind.as_str())
        .bind(item.episode_count)
        .bind(item.source_material.as_str())
        .bind(item.combined_features.as_str())
}

/// Map a sqlx row to a CatalogItem manually.
fn row_to_item(row: &SqliteRow) -> Result<CatalogItem, AnimatchError> {
    Ok(CatalogItem {
        item_id: row.try_get("item_id")?,
        title: row.try_get("title")?,
        detail_url: row.try_get("detail_url")?,
        image_url: row.try_get("image_url")?,
        score: row.try_get("score")?,
        themes: row.try_get("themes")?,
        demographics: row.try_get("demographics")?,
        producers: row.try_get("producers")?,
        genres: row.try_get("genres")?,
        synopsis: row.try_get("synopsis")?,
        kind: row.try_get("kind")?,
        episode_count: row.try_get("episode_count")?,
        source_material: row.try_get("source_material")?,
        combined_features: row.try_get("combined_features")?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AnimatchError> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| AnimatchError::Storage(format!("Parse created_at '{}': {}", raw, e)))
}

#[async_trait]
impl ArtifactStore for SqliteArtifactStore {
    async fn publish(&self, generation: &Generation) -> Result<(), AnimatchError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO generations (id, created_at, feature_version, neighbors_k, item_count) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&generation.id)
        .bind(generation.created_at.to_rfc3339())
        .bind(&generation.feature_version)
        .bind(generation.neighbors.k() as i64)
        .bind(generation.catalog.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| AnimatchError::Storage(format!("Failed to insert generation: {}", e)))?;

        let catalog_sql = format!(
            "INSERT INTO catalog_items (generation_id, row_index, {}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ITEM_COLUMNS
        );
        for (row, item) in generation.catalog.items().iter().enumerate() {
            let query = sqlx::query(&catalog_sql)
                .bind(&generation.id)
                .bind(row as i64);
            bind_item(query, item)
                .execute(&mut *tx)
                .await
                .map_err(|e| AnimatchError::Storage(format!("Failed to insert catalog row {}: {}", row, e)))?;
        }

        let trending_sql = format!(
            "INSERT INTO trending_items (generation_id, rank, {}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ITEM_COLUMNS
        );
        for (rank, item) in generation.trending.iter().enumerate() {
            let query = sqlx::query(&trending_sql)
                .bind(&generation.id)
                .bind(rank as i64);
            bind_item(query, item).execute(&mut *tx).await?;
        }

        for (row, neighbors) in generation.neighbors.rows().iter().enumerate() {
            for (rank, neighbor) in neighbors.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO neighbors (generation_id, row_index, rank, neighbor_row) VALUES (?, ?, ?, ?)",
                )
                .bind(&generation.id)
                .bind(row as i64)
                .bind(rank as i64)
                .bind(*neighbor as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO current_generation (singleton, generation_id) VALUES (1, ?) \
             ON CONFLICT(singleton) DO UPDATE SET generation_id = excluded.generation_id",
        )
        .bind(&generation.id)
        .execute(&mut *tx)
        .await?;

        let stale: Vec<String> = sqlx::query("SELECT id FROM generations ORDER BY seq DESC LIMIT -1 OFFSET ?")
            .bind(self.keep_generations as i64)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<Result<_, _>>()?;

        for id in &stale {
            for table in ["neighbors", "trending_items", "catalog_items"] {
                sqlx::query(&format!("DELETE FROM {} WHERE generation_id = ?", table))
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("DELETE FROM generations WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| AnimatchError::Storage(format!("Failed to commit generation: {}", e)))?;

        tracing::info!(
            generation_id = %generation.id,
            items = generation.catalog.len(),
            pruned = stale.len(),
            "Generation published"
        );
        Ok(())
    }

    async fn load_current(&self) -> Result<Option<Generation>, AnimatchError> {
        let mut tx = self.pool.begin().await?;

        let header = sqlx::query(
            "SELECT g.id, g.created_at, g.feature_version, g.neighbors_k, g.item_count \
             FROM current_generation c JOIN generations g ON g.id = c.generation_id \
             WHERE c.singleton = 1",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let id: String = header.try_get("id")?;
        let created_at_str: String = header.try_get("created_at")?;
        let feature_version: String = header.try_get("feature_version")?;
        let neighbors_k: i64 = header.try_get("neighbors_k")?;
        let item_count: i64 = header.try_get("item_count")?;

        let items = sqlx::query(&format!(
            "SELECT {} FROM catalog_items WHERE generation_id = ? ORDER BY row_index",
            ITEM_COLUMNS
        ))
        .bind(&id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>, _>>()?;

        if items.len() as i64 != item_count {
            return Err(AnimatchError::Storage(format!(
                "generation {} has {} catalog rows, expected {}",
                id,
                items.len(),
                item_count
            )));
        }

        let trending = sqlx::query(&format!(
            "SELECT {} FROM trending_items WHERE generation_id = ? ORDER BY rank",
            ITEM_COLUMNS
        ))
        .bind(&id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>, _>>()?;

        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
        let neighbor_rows = sqlx::query(
            "SELECT row_index, neighbor_row FROM neighbors WHERE generation_id = ? ORDER BY row_index, rank",
        )
        .bind(&id)
        .fetch_all(&mut *tx)
        .await?;
        for row in &neighbor_rows {
            let row_index: i64 = row.try_get("row_index")?;
            let neighbor_row: i64 = row.try_get("neighbor_row")?;
            let slot = rows.get_mut(row_index as usize).ok_or_else(|| {
                AnimatchError::Storage(format!("neighbor entry for missing row {}", row_index))
            })?;
            slot.push(neighbor_row as usize);
        }

        tx.commit().await?;

        Ok(Some(Generation {
            id,
            created_at: parse_timestamp(&created_at_str)?,
            feature_version,
            catalog: Catalog::from_items(items)?,
            trending,
            neighbors: NeighborTable::from_rows(neighbors_k as usize, rows)?,
        }))
    }

    async fn stats(&self) -> Result<StoreStats, AnimatchError> {
        let generations: i64 = sqlx::query("SELECT COUNT(*) AS n FROM generations")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        let current = sqlx::query(
            "SELECT g.id, g.created_at, g.feature_version, g.item_count \
             FROM current_generation c JOIN generations g ON g.id = c.generation_id \
             WHERE c.singleton = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match current {
            Some(row) => {
                let created_at: String = row.try_get("created_at")?;
                Ok(StoreStats {
                    generations,
                    current_generation: Some(row.try_get("id")?),
                    published_at: Some(parse_timestamp(&created_at)?),
                    feature_version: Some(row.try_get("feature_version")?),
                    items: row.try_get("item_count")?,
                })
            }
            None => Ok(StoreStats {
                generations,
                current_generation: None,
                published_at: None,
                feature_version: None,
                items: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::item;

    fn sample_generation(ids: &[i64]) -> Generation {
        let items: Vec<CatalogItem> = ids
            .iter()
            .map(|&id| CatalogItem {
                score: if id % 2 == 0 { Some(7.5) } else { None },
                synopsis: format!("synopsis {}", id),
                combined_features: format!("synopsi {}", id),
                ..item(id, &format!("Title {}", id))
            })
            .collect();
        let n = items.len();
        let rows: Vec<Vec<usize>> = (0..n)
            .map(|i| (0..n).filter(|&j| j != i).rev().collect())
            .collect();
        let trending = items.iter().take(2).cloned().collect();
        Generation::new(
            Catalog::from_items(items).unwrap(),
            trending,
            NeighborTable::from_rows(10, rows).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_store_has_no_generation() {
        let store = SqliteArtifactStore::in_memory().await.unwrap();
        assert!(store.load_current().await.unwrap().is_none());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.generations, 0);
        assert!(stats.current_generation.is_none());
    }

    #[tokio::test]
    async fn test_publish_and_load_round_trip() {
        let store = SqliteArtifactStore::in_memory().await.unwrap();
        let generation = sample_generation(&[30, 10, 20, 40]);

        store.publish(&generation).await.expect("publish should succeed");
        let loaded = store.load_current().await.unwrap().expect("generation should exist");

        assert_eq!(loaded, generation);
        assert_eq!(loaded.catalog.get(0).unwrap().item_id, 30);
        assert_eq!(loaded.neighbors.row(0).unwrap(), &[3, 2, 1]);
        assert_eq!(loaded.catalog.get(0).unwrap().score, Some(7.5));
        assert_eq!(loaded.catalog.get(1).unwrap().score, None);
    }

    #[tokio::test]
    async fn test_publish_switches_current_generation() {
        let store = SqliteArtifactStore::in_memory().await.unwrap();
        let first = sample_generation(&[1, 2]);
        let second = sample_generation(&[1, 2, 3]);

        store.publish(&first).await.unwrap();
        store.publish(&second).await.unwrap();

        let loaded = store.load_current().await.unwrap().unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(loaded.catalog.len(), 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.generations, 2);
        assert_eq!(stats.current_generation.as_deref(), Some(second.id.as_str()));
        assert_eq!(stats.items, 3);
    }

    #[tokio::test]
    async fn test_old_generations_are_pruned() {
        let store = SqliteArtifactStore::in_memory().await.unwrap().with_retention(2);
        for n in 1..=4 {
            let ids: Vec<i64> = (1..=n).collect();
            store.publish(&sample_generation(&ids)).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.generations, 2);
        assert_eq!(stats.items, 4);

        let orphans: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM catalog_items WHERE generation_id NOT IN (SELECT id FROM generations)",
        )
        .fetch_one(store.pool())
        .await
        .unwrap()
        .try_get("n")
        .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_single_item_generation_has_empty_neighbor_row() {
        let store = SqliteArtifactStore::in_memory().await.unwrap();
        store.publish(&sample_generation(&[99])).await.unwrap();
        let loaded = store.load_current().await.unwrap().unwrap();
        assert_eq!(loaded.neighbors.row(0).unwrap().len(), 0);
    }
}
