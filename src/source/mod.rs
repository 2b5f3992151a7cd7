/// External catalog source abstraction
///
/// Provides the CatalogSource trait and the decoder for the Jikan-style JSON
/// response shared by the HTTP source and the file source.

pub mod file;
pub mod jikan;

use async_trait::async_trait;
use serde::Deserialize;

use crate::catalog::CatalogItem;
use crate::errors::AnimatchError;

/// Core trait for fetching one ingestion batch.
///
/// Transport failures map to `SourceUnavailable`; unexpected response shapes
/// map to `MalformedSource`. Either way the caller must not persist anything.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the current batch of candidate items.
    async fn fetch_batch(&self) -> Result<Vec<CatalogItem>, AnimatchError>;

    /// Short identifier for logs (e.g., the URL or file path).
    fn describe(&self) -> String;
}

/// One decoded response page.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub items: Vec<CatalogItem>,
    pub has_next_page: bool,
}

#[derive(Deserialize)]
struct NamedTag {
    name: String,
}

#[derive(Deserialize)]
struct ImageSet {
    image_url: Option<String>,
}

#[derive(Deserialize)]
struct Images {
    jpg: ImageSet,
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    has_next_page: bool,
}

/// One element of the response's `data` array.
#[derive(Deserialize)]
struct SourceAnime {
    mal_id: i64,
    url: String,
    images: Images,
    title: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    themes: Option<Vec<NamedTag>>,
    #[serde(default)]
    demographics: Option<Vec<NamedTag>>,
    #[serde(default)]
    producers: Option<Vec<NamedTag>>,
    #[serde(default)]
    genres: Option<Vec<NamedTag>>,
    #[serde(default)]
    synopsis: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    episodes: Option<i64>,
    #[serde(default)]
    source: Option<String>,
}

fn join_names(tags: Option<Vec<NamedTag>>) -> String {
    tags.unwrap_or_default()
        .into_iter()
        .map(|t| t.name)
        .collect::<Vec<_>>()
        .join(" ")
}

impl From<SourceAnime> for CatalogItem {
    fn from(anime: SourceAnime) -> Self {
        CatalogItem {
            item_id: anime.mal_id,
            title: anime.title,
            detail_url: anime.url,
            image_url: anime.images.jpg.image_url.unwrap_or_default(),
            score: anime.score,
            themes: join_names(anime.themes),
            demographics: join_names(anime.demographics),
            producers: join_names(anime.producers),
            genres: join_names(anime.genres),
            synopsis: anime.synopsis.unwrap_or_default(),
            kind: anime.kind.unwrap_or_default(),
            episode_count: anime.episodes,
            source_material: anime.source.unwrap_or_default(),
            combined_features: String::new(),
        }
    }
}

/// Decode a response body into catalog items.
///
/// The body must be a JSON object with a `data` array; every element must carry
/// an id, url, image set, and title.
pub fn parse_page(body: &str) -> Result<SourcePage, AnimatchError> {
    let mut value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AnimatchError::MalformedSource(format!("response is not JSON: {}", e)))?;

    let data = match value.get_mut("data").map(serde_json::Value::take) {
        Some(data @ serde_json::Value::Array(_)) => data,
        Some(_) => {
            return Err(AnimatchError::MalformedSource(
                "top-level 'data' field is not an array".to_string(),
            ))
        }
        None => {
            return Err(AnimatchError::MalformedSource(
                "missing top-level 'data' field".to_string(),
            ))
        }
    };

    let anime: Vec<SourceAnime> = serde_json::from_value(data)
        .map_err(|e| AnimatchError::MalformedSource(format!("invalid catalog entry: {}", e)))?;

    let has_next_page = value
        .get("pagination")
        .cloned()
        .and_then(|p| serde_json::from_value::<Pagination>(p).ok())
        .map(|p| p.has_next_page)
        .unwrap_or(false);

    Ok(SourcePage {
        items: anime.into_iter().map(CatalogItem::from).collect(),
        has_next_page,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_PAGE: &str = r#"{
        "pagination": {"last_visible_page": 2, "has_next_page": true},
        "data": [
            {
                "mal_id": 52991,
                "url": "https://myanimelist.net/anime/52991/Sousou_no_Frieren",
                "images": {"jpg": {"image_url": "https://cdn.myanimelist.net/images/anime/1015/138006.jpg"}},
                "title": "Sousou no Frieren",
                "score": 9.3,
                "themes": [],
                "demographics": [{"mal_id": 27, "name": "Shounen"}],
                "producers": [{"mal_id": 17, "name": "Aniplex"}, {"mal_id": 53, "name": "Dentsu"}],
                "genres": [{"mal_id": 2, "name": "Adventure"}, {"mal_id": 10, "name": "Fantasy"}],
                "synopsis": "The adventure is over but life goes on for an elf mage.",
                "type": "TV",
                "episodes": 28,
                "source": "Manga"
            },
            {
                "mal_id": 60000,
                "url": "https://myanimelist.net/anime/60000/Unaired",
                "images": {"jpg": {"image_url": null}},
                "title": "Unaired Show",
                "score": null,
                "themes": null,
                "synopsis": null,
                "type": null,
                "episodes": null,
                "source": null
            }
        ]
    }"#;

    #[test]
    fn test_parse_page_maps_fields() {
        let page = parse_page(SAMPLE_PAGE).expect("sample should parse");
        assert!(page.has_next_page);
        assert_eq!(page.items.len(), 2);

        let frieren = &page.items[0];
        assert_eq!(frieren.item_id, 52991);
        assert_eq!(frieren.title, "Sousou no Frieren");
        assert_eq!(frieren.score, Some(9.3));
        assert_eq!(frieren.demographics, "Shounen");
        assert_eq!(frieren.producers, "Aniplex Dentsu");
        assert_eq!(frieren.genres, "Adventure Fantasy");
        assert_eq!(frieren.themes, "");
        assert_eq!(frieren.kind, "TV");
        assert_eq!(frieren.episode_count, Some(28));
        assert_eq!(frieren.source_material, "Manga");
    }

    #[test]
    fn test_parse_page_tolerates_nulls() {
        let page = parse_page(SAMPLE_PAGE).unwrap();
        let unaired = &page.items[1];
        assert_eq!(unaired.score, None);
        assert_eq!(unaired.image_url, "");
        assert_eq!(unaired.synopsis, "");
        assert_eq!(unaired.producers, "");
        assert_eq!(unaired.episode_count, None);
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let err = parse_page(r#"{"status": 429, "message": "rate limited"}"#).unwrap_err();
        assert!(matches!(err, AnimatchError::MalformedSource(_)));
    }

    #[test]
    fn test_bad_entry_is_malformed() {
        let err = parse_page(r#"{"data": [{"title": "no id"}]}"#).unwrap_err();
        assert!(matches!(err, AnimatchError::MalformedSource(_)));
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(parse_page("<html>"), Err(AnimatchError::MalformedSource(_))));
    }

    #[test]
    fn test_missing_pagination_means_last_page() {
        let page = parse_page(r#"{"data": []}"#).unwrap();
        assert!(!page.has_next_page);
        assert!(page.items.is_empty());
    }
}
