/// Per-item feature document.
///
/// The field list and its order define every feature vector. Changing either
/// invalidates published neighbor tables, so it is versioned by
/// `FEATURE_VERSION`, which is stored with each generation.

use crate::catalog::CatalogItem;

use super::normalize;

/// Bump whenever `FEATURE_FIELDS`, `compose` or `normalize` changes.
pub const FEATURE_VERSION: &str = "v2:themes,demographics,genres,synopsis,type,producers,source";

/// Fields concatenated into the feature document, in order.
pub const FEATURE_FIELDS: [&str; 7] = [
    "themes",
    "demographics",
    "genres",
    "synopsis",
    "type",
    "producers",
    "source_material",
];

fn field<'a>(item: &'a CatalogItem, name: &str) -> &'a str {
    match name {
        "themes" => &item.themes,
        "demographics" => &item.demographics,
        "genres" => &item.genres,
        "synopsis" => &item.synopsis,
        "type" => &item.kind,
        "producers" => &item.producers,
        "source_material" => &item.source_material,
        _ => "",
    }
}

/// Concatenate the feature fields with single spaces and normalize the result.
pub fn compose(item: &CatalogItem) -> String {
    let raw = FEATURE_FIELDS
        .iter()
        .map(|name| field(item, name))
        .collect::<Vec<_>>()
        .join(" ");
    normalize(&raw)
}
