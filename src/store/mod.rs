/// Artifact store abstraction layer
///
/// Provides the ArtifactStore trait and the Generation snapshot it persists.
/// A generation is the unit of publication: catalog, trending snapshot, and
/// neighbor table are written together and become visible together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogItem};
use crate::errors::AnimatchError;
use crate::features::FEATURE_VERSION;
use crate::similarity::{NeighborTable, SimilarityIndex};

pub mod sqlite;

/// One complete, internally consistent snapshot produced by one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// When the generation was built
    pub created_at: DateTime<Utc>,
    /// Feature field-list version the neighbor table was computed with
    pub feature_version: String,
    /// Merged catalog; row order is the neighbor table's join key
    pub catalog: Catalog,
    /// Top items of the batch ingested by the run that built this generation
    pub trending: Vec<CatalogItem>,
    pub neighbors: NeighborTable,
}

impl Generation {
    /// Assemble a new generation with a fresh id and the current feature version.
    pub fn new(catalog: Catalog, trending: Vec<CatalogItem>, neighbors: NeighborTable) -> Result<Self, AnimatchError> {
        if neighbors.len() != catalog.len() {
            return Err(AnimatchError::Internal(format!(
                "neighbor table has {} rows for a catalog of {}",
                neighbors.len(),
                catalog.len()
            )));
        }
        Ok(Generation {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            feature_version: FEATURE_VERSION.to_string(),
            catalog,
            trending,
            neighbors,
        })
    }

    pub fn index(&self) -> SimilarityIndex<'_> {
        SimilarityIndex::new(&self.catalog, &self.neighbors)
    }

    /// Whether the neighbor table was built with the field list this binary composes.
    pub fn is_current_feature_version(&self) -> bool {
        self.feature_version == FEATURE_VERSION
    }
}

/// Summary of what the store holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Generations retained in the store
    pub generations: i64,
    /// Live generation id (None before the first publish)
    pub current_generation: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feature_version: Option<String>,
    /// Catalog rows in the live generation
    pub items: i64,
}

/// Core abstraction for generation persistence.
///
/// Implementations must make `publish` all-or-nothing: a reader either sees the
/// previous generation or the complete new one, never a mix.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist a complete generation and make it the live one.
    async fn publish(&self, generation: &Generation) -> Result<(), AnimatchError>;

    /// Load the live generation, or None if nothing was published yet.
    async fn load_current(&self) -> Result<Option<Generation>, AnimatchError>;

    /// Counts and identity of the live generation.
    async fn stats(&self) -> Result<StoreStats, AnimatchError>;
}
