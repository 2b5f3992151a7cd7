/// Catalog model and merge semantics
///
/// A catalog is an ordered list of items, unique by `item_id`. Row order is part
/// of the contract: row indices are the join key between the catalog and the
/// neighbor table of the same generation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::AnimatchError;

/// One catalog entry, keyed by the external source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// External id, stable across ingestions (dedup key)
    pub item_id: i64,
    pub title: String,
    pub detail_url: String,
    pub image_url: String,
    /// External rating, absent for unaired titles
    pub score: Option<f64>,
    /// Space-joined tag names
    #[serde(default)]
    pub themes: String,
    #[serde(default)]
    pub demographics: String,
    #[serde(default)]
    pub producers: String,
    #[serde(default)]
    pub genres: String,
    #[serde(default)]
    pub synopsis: String,
    /// Categorical format: "TV", "Movie", "OVA", ...
    #[serde(rename = "type", default)]
    pub kind: String,
    pub episode_count: Option<i64>,
    #[serde(default)]
    pub source_material: String,
    /// Normalized feature document, recomputed on every rebuild
    #[serde(default)]
    pub combined_features: String,
}

/// Ordered, id-unique collection of catalog items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    items: Vec<CatalogItem>,
    rows_by_id: HashMap<i64, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from rows that are already id-unique (e.g., a loaded generation).
    ///
    /// Returns a validation error on the first repeated `item_id`.
    pub fn from_items(items: Vec<CatalogItem>) -> Result<Self, AnimatchError> {
        let mut rows_by_id = HashMap::with_capacity(items.len());
        for (row, item) in items.iter().enumerate() {
            if rows_by_id.insert(item.item_id, row).is_some() {
                return Err(AnimatchError::validation(
                    "item_id",
                    &format!("duplicate item_id {} in catalog", item.item_id),
                ));
            }
        }
        Ok(Catalog { items, rows_by_id })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn get(&self, row: usize) -> Option<&CatalogItem> {
        self.items.get(row)
    }

    /// Row index of an item id.
    pub fn row_of(&self, item_id: i64) -> Option<usize> {
        self.rows_by_id.get(&item_id).copied()
    }

    /// Resolve a title to its row. Titles are not unique; the first row wins.
    pub fn resolve_title(&self, title: &str) -> Option<usize> {
        self.items.iter().position(|item| item.title == title)
    }

    /// Titles shared by more than one row, in order of first appearance.
    ///
    /// Only the first of each is reachable through `resolve_title`.
    pub fn duplicate_titles(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();
        for item in &self.items {
            let title = item.title.as_str();
            if !seen.insert(title) && reported.insert(title) {
                duplicates.push(title);
            }
        }
        duplicates
    }

    /// Titles containing `query` (case-insensitive), in row order.
    pub fn search_titles(&self, query: Option<&str>, limit: usize) -> Vec<&CatalogItem> {
        let needle = query.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());
        self.items
            .iter()
            .filter(|item| match &needle {
                Some(n) => item.title.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .take(limit)
            .collect()
    }

    /// Recompute every row's feature document in place.
    pub fn refresh_features(&mut self) {
        for item in &mut self.items {
            item.combined_features = crate::features::compose(item);
        }
    }
}

/// Result of merging an ingested batch into an existing catalog.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub catalog: Catalog,
    /// Incoming rows accepted as new items
    pub added: usize,
    /// Incoming rows dropped because their id was already present
    pub rejected: usize,
}

/// Append the incoming batch to the existing catalog, keeping the first
/// occurrence of every `item_id`.
///
/// Existing rows always win over incoming rows with the same id, so metadata
/// drift from the source (e.g., a refreshed score) is not applied to known
/// items. Within the batch, the first duplicate wins. Existing row order is
/// preserved and accepted items follow in batch order.
pub fn merge(existing: &Catalog, incoming: &[CatalogItem]) -> MergeOutcome {
    let mut items = existing.items.clone();
    let mut rows_by_id = existing.rows_by_id.clone();
    let mut added = 0;
    let mut rejected = 0;

    for item in incoming {
        if rows_by_id.contains_key(&item.item_id) {
            rejected += 1;
            continue;
        }
        rows_by_id.insert(item.item_id, items.len());
        items.push(CatalogItem {
            // Derived field; never trusted from input
            combined_features: String::new(),
            ..item.clone()
        });
        added += 1;
    }

    MergeOutcome {
        catalog: Catalog { items, rows_by_id },
        added,
        rejected,
    }
}

/// Order two optional scores descending, with missing scores last.
pub fn by_score_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Top `n` items of the ingested batch by score, nulls last.
///
/// Considers the incoming batch only, never the merged catalog. Equal scores
/// keep their batch order.
pub fn select_trending(incoming: &[CatalogItem], n: usize) -> Vec<CatalogItem> {
    let mut ranked: Vec<&CatalogItem> = incoming.iter().collect();
    ranked.sort_by(|a, b| by_score_desc(a.score, b.score));
    ranked.into_iter().take(n).cloned().collect()
}
