/// Jikan HTTP catalog source
///
/// Fetches the current season listing (`/seasons/now`) using reqwest and follows
/// `pagination.has_next_page` up to `max_pages`. No API key required.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use super::{parse_page, CatalogSource, SourcePage};
use crate::catalog::CatalogItem;
use crate::config::SourceConfig;
use crate::errors::AnimatchError;

/// Jikan-backed catalog source.
pub struct JikanSource {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    max_pages: u32,
}

impl JikanSource {
    /// Create a new JikanSource from the `[source]` configuration section.
    ///
    /// # Errors
    /// Returns `AnimatchError::Config` if the HTTP client cannot be built.
    pub fn new(config: &SourceConfig) -> Result<Self, AnimatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("animatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnimatchError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(JikanSource {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages.max(1),
        })
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/seasons/now?limit={}&page={}",
            self.base_url, self.page_size, page
        )
    }

    async fn fetch_page(&self, page: u32) -> Result<SourcePage, AnimatchError> {
        let url = self.page_url(page);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AnimatchError::SourceUnavailable(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AnimatchError::SourceUnavailable(format!(
                "GET {} returned status {}: {}",
                url, status, body
            )));
        }

        let body = response.text().await?;
        parse_page(&body)
    }
}

#[async_trait]
impl CatalogSource for JikanSource {
    async fn fetch_batch(&self) -> Result<Vec<CatalogItem>, AnimatchError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();

        for page in 1..=self.max_pages {
            let fetched = self.fetch_page(page).await?;
            let count = fetched.items.len();
            // Listings can shift between page requests; keep the first copy of an id
            items.extend(fetched.items.into_iter().filter(|item| seen.insert(item.item_id)));
            tracing::debug!(page, count, has_next_page = fetched.has_next_page, "Fetched source page");
            if !fetched.has_next_page {
                break;
            }
        }

        Ok(items)
    }

    fn describe(&self) -> String {
        format!("{}/seasons/now", self.base_url)
    }
}
