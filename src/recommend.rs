/// Query path: title in, display-ready recommendations out.
///
/// Reads one immutable generation. Swapping generations means building a new
/// service from the new handle; nothing here is cached globally.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{by_score_desc, CatalogItem};
use crate::errors::AnimatchError;
use crate::similarity::MAX_NEIGHBORS;
use crate::store::Generation;

/// Characters of synopsis shown under each trending title.
pub const SYNOPSIS_EXCERPT_CHARS: usize = 100;

/// Display metadata for one recommended item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: i64,
    pub title: String,
    pub image_url: String,
    pub detail_url: String,
    pub score: Option<f64>,
    /// Short synopsis excerpt, only set on trending entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
}

impl From<&CatalogItem> for Recommendation {
    fn from(item: &CatalogItem) -> Self {
        Recommendation {
            item_id: item.item_id,
            title: item.title.clone(),
            image_url: item.image_url.clone(),
            detail_url: item.detail_url.clone(),
            score: item.score,
            synopsis: None,
        }
    }
}

/// First `max_chars` characters of a synopsis, with "..." when cut.
/// Blank synopses yield `None`.
pub fn synopsis_excerpt(text: &str, max_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut excerpt: String = text.chars().take(max_chars).collect();
    if excerpt.len() < text.len() {
        excerpt = format!("{}...", excerpt.trim_end());
    }
    Some(excerpt)
}

pub struct RecommendationService {
    generation: Arc<Generation>,
    default_k: usize,
}

impl RecommendationService {
    pub fn new(generation: Arc<Generation>, default_k: usize) -> Self {
        RecommendationService {
            generation,
            default_k: default_k.clamp(1, MAX_NEIGHBORS),
        }
    }

    /// Items most similar to `title`, ordered by score descending (missing scores last).
    ///
    /// The neighbor set is chosen by similarity; only its presentation order is
    /// by score. `k` defaults to the configured value and is capped at
    /// `MAX_NEIGHBORS`. An unknown title is `NotFound`, never an empty list.
    pub fn recommend(&self, title: &str, k: Option<usize>) -> Result<Vec<Recommendation>, AnimatchError> {
        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Err(AnimatchError::validation("k", "k must be at least 1"));
        }

        let catalog = &self.generation.catalog;
        let row = catalog
            .resolve_title(title)
            .ok_or_else(|| AnimatchError::title_not_found(title))?;
        let item_id = catalog
            .get(row)
            .map(|item| item.item_id)
            .ok_or_else(|| AnimatchError::Internal(format!("title resolved to missing row {}", row)))?;

        let neighbor_ids = self.generation.index().query(item_id, k.min(MAX_NEIGHBORS))?;

        let mut recommendations = neighbor_ids
            .into_iter()
            .map(|id| {
                catalog
                    .row_of(id)
                    .and_then(|r| catalog.get(r))
                    .map(Recommendation::from)
                    .ok_or_else(|| AnimatchError::item_not_found(id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        recommendations.sort_by(|a, b| by_score_desc(a.score, b.score));

        tracing::debug!(
            title = %title,
            item_id,
            k,
            returned = recommendations.len(),
            generation_id = %self.generation.id,
            "Recommendations served"
        );
        Ok(recommendations)
    }

    /// Trending snapshot of the live generation, best first, each with a
    /// synopsis excerpt when the item has one.
    pub fn trending(&self) -> Vec<Recommendation> {
        self.generation
            .trending
            .iter()
            .map(|item| Recommendation {
                synopsis: synopsis_excerpt(&item.synopsis, SYNOPSIS_EXCERPT_CHARS),
                ..Recommendation::from(item)
            })
            .collect()
    }

    /// Catalog titles matching `query` (case-insensitive substring), in catalog order.
    pub fn titles(&self, query: Option<&str>, limit: usize) -> Vec<String> {
        self.generation
            .catalog
            .search_titles(query, limit)
            .into_iter()
            .map(|item| item.title.clone())
            .collect()
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn generation_id(&self) -> &str {
        &self.generation.id
    }
}
