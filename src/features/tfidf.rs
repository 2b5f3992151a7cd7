/// TF-IDF vectorizer over the full catalog corpus.
///
/// Not incremental: adding documents changes the vocabulary and the idf of
/// every term, so every vector is refitted on each rebuild.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::stopwords;

/// Runs of two or more word characters.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("token pattern is valid"));

/// Sparse, L2-normalized document vector: `(term_index, weight)` sorted by term index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    pub terms: Vec<(usize, f64)>,
}

impl FeatureVector {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Dot product of two sorted sparse vectors.
    pub fn dot(&self, other: &FeatureVector) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.terms.len() && j < other.terms.len() {
            let (ti, wi) = self.terms[i];
            let (tj, wj) = other.terms[j];
            if ti == tj {
                sum += wi * wj;
                i += 1;
                j += 1;
            } else if ti < tj {
                i += 1;
            } else {
                j += 1;
            }
        }
        sum
    }
}

/// TF-IDF model: raw term counts, smoothed idf, per-document L2 norm.
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    stop_words: HashSet<&'static str>,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Vectorizer excluding the English stop-word list.
    pub fn english() -> Self {
        TfidfVectorizer {
            stop_words: stopwords::ENGLISH.iter().copied().collect(),
            vocabulary: BTreeMap::new(),
            idf: Vec::new(),
        }
    }

    fn tokenize<'a>(&self, document: &'a str) -> Vec<&'a str> {
        TOKEN
            .find_iter(document)
            .map(|m| m.as_str())
            .filter(|token| !self.stop_words.contains(token))
            .collect()
    }

    /// Fit vocabulary and idf on `documents`, then return one vector per document.
    ///
    /// Term indices follow sorted term order, so the same corpus always yields
    /// the same vocabulary layout. idf = ln((1 + n) / (1 + df)) + 1.
    pub fn fit_transform<S: AsRef<str>>(&mut self, documents: &[S]) -> Vec<FeatureVector> {
        let tokenized: Vec<Vec<&str>> = documents
            .iter()
            .map(|doc| self.tokenize(doc.as_ref()))
            .collect();

        let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &tokenized {
            let unique: HashSet<&str> = tokens.iter().copied().collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let n_docs = documents.len() as f64;
        self.vocabulary = doc_freq
            .keys()
            .enumerate()
            .map(|(idx, term)| (term.to_string(), idx))
            .collect();
        self.idf = doc_freq
            .values()
            .map(|&df| ((1.0 + n_docs) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        tokenized
            .iter()
            .map(|tokens| self.weigh(tokens))
            .collect()
    }

    fn weigh(&self, tokens: &[&str]) -> FeatureVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for token in tokens {
            if let Some(&idx) = self.vocabulary.get(*token) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut terms: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();
        terms.sort_unstable_by_key(|(idx, _)| *idx);

        let norm = terms.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut terms {
                *w /= norm;
            }
        }
        FeatureVector { terms }
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn term_index(&self, term: &str) -> Option<usize> {
        self.vocabulary.get(term).copied()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.term_index(term).map(|idx| self.idf[idx])
    }
}
