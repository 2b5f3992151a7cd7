/// Feature extraction: text normalization, per-item documents, TF-IDF vectors.
///
/// The whole chain is deterministic so that re-fitting the same catalog
/// reproduces the same document-term structure.

pub mod compose;
pub mod normalize;
pub mod stopwords;
pub mod tfidf;

pub use compose::{compose, FEATURE_FIELDS, FEATURE_VERSION};
pub use normalize::normalize;
pub use tfidf::{FeatureVector, TfidfVectorizer};
