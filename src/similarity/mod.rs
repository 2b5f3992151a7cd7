/// Pairwise cosine similarity and top-K neighbor tables.
///
/// `build` is the expensive batch step: O(n²·d) over the whole catalog, run once
/// per update. `SimilarityIndex::query` only reads the precomputed table.
///
/// Scaling ceiling: the table is recomputed from scratch on every update, which
/// stays acceptable only while the catalog keeps the quadratic build inside the
/// batch job's time budget.

use std::cmp::Ordering;

use indicatif::ProgressBar;

use crate::catalog::Catalog;
use crate::errors::AnimatchError;
use crate::features::FeatureVector;

/// Maximum neighbors stored per row and served per query.
pub const MAX_NEIGHBORS: usize = 10;

/// Row-indexed neighbor lists of one generation.
///
/// `rows[i]` holds up to `k` row indices ordered by descending similarity to
/// row `i`, ties by ascending row index, never containing `i` itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborTable {
    k: usize,
    rows: Vec<Vec<usize>>,
}

impl NeighborTable {
    /// Rebuild a table from persisted rows, checking the row invariants.
    pub fn from_rows(k: usize, rows: Vec<Vec<usize>>) -> Result<Self, AnimatchError> {
        let n = rows.len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() > k || row.len() > n.saturating_sub(1) {
                return Err(AnimatchError::Storage(format!(
                    "neighbor row {} has {} entries (k = {}, rows = {})",
                    i,
                    row.len(),
                    k,
                    n
                )));
            }
            if let Some(&bad) = row.iter().find(|&&j| j == i || j >= n) {
                return Err(AnimatchError::Storage(format!(
                    "neighbor row {} references invalid row {}",
                    i, bad
                )));
            }
        }
        Ok(NeighborTable { k, rows })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> Option<&[usize]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.rows
    }
}

/// Cosine similarity of rows `i` and `j`. Vectors are L2-normalized, so this is the dot product.
pub fn similarity(vectors: &[FeatureVector], i: usize, j: usize) -> f64 {
    vectors[i].dot(&vectors[j])
}

/// Build the neighbor table without progress reporting.
pub fn build(vectors: &[FeatureVector], k: usize) -> NeighborTable {
    build_with_progress(vectors, k, &ProgressBar::hidden())
}

/// Build the top-`k` neighbor table for every row.
///
/// Scores are accumulated through an inverted term index, so each row only
/// touches rows sharing at least one term; all other rows score 0.0 and still
/// compete for remaining slots by row index. Per-pair sums run in ascending
/// term order, making `sim(i, j)` and `sim(j, i)` bit-identical.
pub fn build_with_progress(vectors: &[FeatureVector], k: usize, progress: &ProgressBar) -> NeighborTable {
    let n = vectors.len();
    let k = k.min(MAX_NEIGHBORS);

    let mut postings: Vec<Vec<(usize, f64)>> = Vec::new();
    for (row, vector) in vectors.iter().enumerate() {
        for &(term, weight) in &vector.terms {
            if term >= postings.len() {
                postings.resize_with(term + 1, Vec::new);
            }
            postings[term].push((row, weight));
        }
    }

    let mut scores = vec![0.0f64; n];
    let mut rows = Vec::with_capacity(n);
    for (i, vector) in vectors.iter().enumerate() {
        scores.iter_mut().for_each(|s| *s = 0.0);
        for &(term, weight) in &vector.terms {
            for &(j, other) in &postings[term] {
                scores[j] += weight * other;
            }
        }
        rows.push(top_k(&scores, i, k));
        progress.inc(1);
    }
    progress.finish_and_clear();

    NeighborTable { k, rows }
}

/// Best `k` rows other than `exclude`, by score descending then row index ascending.
fn top_k(scores: &[f64], exclude: usize, k: usize) -> Vec<usize> {
    let mut candidates: Vec<(usize, f64)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|&(j, _)| j != exclude)
        .collect();
    let order = |a: &(usize, f64), b: &(usize, f64)| -> Ordering {
        b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
    };
    if candidates.len() > k && k > 0 {
        candidates.select_nth_unstable_by(k - 1, order);
    }
    candidates.truncate(k);
    candidates.sort_unstable_by(order);
    candidates.into_iter().map(|(j, _)| j).collect()
}

/// Read-only view joining a catalog with its neighbor table.
///
/// Both must come from the same generation: rows are the join key.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityIndex<'a> {
    catalog: &'a Catalog,
    neighbors: &'a NeighborTable,
}

impl<'a> SimilarityIndex<'a> {
    pub fn new(catalog: &'a Catalog, neighbors: &'a NeighborTable) -> Self {
        SimilarityIndex { catalog, neighbors }
    }

    /// Up to `k` most similar item ids for `item_id`, most similar first.
    ///
    /// `k` is capped at `MAX_NEIGHBORS`. Unknown ids fail with `NotFound`.
    pub fn query(&self, item_id: i64, k: usize) -> Result<Vec<i64>, AnimatchError> {
        let row = self
            .catalog
            .row_of(item_id)
            .ok_or_else(|| AnimatchError::item_not_found(item_id))?;
        let neighbors = self.neighbors.row(row).ok_or_else(|| {
            AnimatchError::Internal(format!("no neighbor row {} for item {}", row, item_id))
        })?;
        neighbors
            .iter()
            .take(k.min(MAX_NEIGHBORS))
            .map(|&j| {
                self.catalog
                    .get(j)
                    .map(|item| item.item_id)
                    .ok_or_else(|| AnimatchError::Internal(format!("neighbor row {} outside catalog", j)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::item;
    use crate::features::TfidfVectorizer;

    fn vectorize(docs: &[&str]) -> Vec<FeatureVector> {
        TfidfVectorizer::english().fit_transform(docs)
    }

    #[test]
    fn test_identical_items_are_mutual_neighbors() {
        let vectors = vectorize(&["mecha pilot war", "mecha pilot war", "mecha pilot war"]);
        let table = build(&vectors, MAX_NEIGHBORS);
        assert_eq!(table.row(0).unwrap(), &[1, 2]);
        assert_eq!(table.row(1).unwrap(), &[0, 2]);
        assert_eq!(table.row(2).unwrap(), &[0, 1]);
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            assert!((similarity(&vectors, i, j) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_orders_by_similarity() {
        let vectors = vectorize(&[
            "mecha pilot war",
            "cook food slice",
            "mecha pilot school",
            "mecha idol music",
        ]);
        let table = build(&vectors, 2);
        assert_eq!(table.row(0).unwrap(), &[2, 3]);
    }

    #[test]
    fn test_ties_break_by_row_index() {
        // Row 0 shares nothing with anyone: every candidate scores 0.0
        let vectors = vectorize(&["alpha", "beta", "gamma", "delta", "epsilon"]);
        let table = build(&vectors, 3);
        assert_eq!(table.row(0).unwrap(), &[1, 2, 3]);
        assert_eq!(table.row(4).unwrap(), &[0, 1, 2]);
    }

    #[test]
    fn test_self_exclusion_and_bounds() {
        let docs: Vec<String> = (0..15).map(|i| format!("shared term{} extra{}", i, i % 3)).collect();
        let vectors = TfidfVectorizer::english().fit_transform(&docs);
        let table = build(&vectors, MAX_NEIGHBORS);
        for (i, row) in table.rows().iter().enumerate() {
            assert!(!row.contains(&i));
            assert_eq!(row.len(), MAX_NEIGHBORS);
        }

        let small = build(&vectorize(&["one thing", "another thing", "third thing"]), MAX_NEIGHBORS);
        assert!(small.rows().iter().all(|r| r.len() == 2));

        let single = build(&vectorize(&["lonely"]), MAX_NEIGHBORS);
        assert_eq!(single.row(0).unwrap().len(), 0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let vectors = vectorize(&[
            "space pirat crew ship",
            "pirat ship treasur",
            "space station crew",
        ]);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(similarity(&vectors, i, j), similarity(&vectors, j, i));
            }
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let docs = ["vampir hunter night", "hunter guild", "night school vampir", "guild quest"];
        let first = build(&vectorize(&docs), MAX_NEIGHBORS);
        let second = build(&vectorize(&docs), MAX_NEIGHBORS);
        assert_eq!(first, second);
    }

    #[test]
    fn test_query_maps_rows_to_ids() {
        let catalog = Catalog::from_items(vec![item(10, "A"), item(20, "B"), item(30, "C")]).unwrap();
        let table = NeighborTable::from_rows(2, vec![vec![2, 1], vec![0, 2], vec![0, 1]]).unwrap();
        let index = SimilarityIndex::new(&catalog, &table);
        assert_eq!(index.query(10, 10).unwrap(), vec![30, 20]);
        assert_eq!(index.query(10, 1).unwrap(), vec![30]);
        assert!(matches!(index.query(99, 5), Err(AnimatchError::NotFound { .. })));
    }

    #[test]
    fn test_from_rows_rejects_self_reference() {
        let result = NeighborTable::from_rows(2, vec![vec![0], vec![0]]);
        assert!(matches!(result, Err(AnimatchError::Storage(_))));
    }
}
