use rmcp::{
    ServerHandler,
    tool,
    model::{
        ServerCapabilities, Implementation, ProtocolVersion, CallToolResult,
        RawResource, ListResourcesResult, ReadResourceResult, ResourceContents,
        ReadResourceRequestParams, AnnotateAble,
    },
    handler::server::wrapper::Parameters,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::AnimatchError;
use crate::recommend::{Recommendation, RecommendationService};
use crate::similarity::MAX_NEIGHBORS;

const TRENDING_URI: &str = "anime://trending";

pub struct RecommenderService {
    recommender: Arc<RecommendationService>,
    start_time: Instant,
}

impl RecommenderService {
    pub fn new(recommender: Arc<RecommendationService>) -> Self {
        Self {
            recommender,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RecommendParams {
    /// Exact catalog title to find similar anime for (required)
    pub title: String,
    /// Number of recommendations (1-10, default from config)
    pub k: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ListTitlesParams {
    /// Case-insensitive substring to filter titles by (optional)
    pub query: Option<String>,
    /// Maximum titles to return (1-200, default: 50)
    pub limit: Option<u32>,
}

// Helper: convert AnimatchError to CallToolResult with isError: true
fn error_to_result(err: AnimatchError) -> CallToolResult {
    match err {
        AnimatchError::NotFound { what, key } => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("{} not found: {}", what, key),
                "hint": "Titles must match the catalog exactly. Use list_titles to find available titles"
            }))
        }
        AnimatchError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string()
            }))
        }
    }
}

fn recommendation_json(r: &Recommendation) -> serde_json::Value {
    let mut obj = json!({
        "item_id": r.item_id,
        "title": r.title,
        "image_url": r.image_url,
        "detail_url": r.detail_url,
        "score": r.score,
    });
    if let Some(synopsis) = &r.synopsis {
        obj["synopsis"] = json!(synopsis);
    }
    obj
}

// Tool implementations
#[rmcp::tool_router]
impl RecommenderService {
    #[tool(description = "Recommend anime similar to a catalog title by themes, genres, synopsis, and other content features. Results are ordered by score. Returns an error (not an empty list) when the title is unknown.")]
    async fn recommend(
        &self,
        Parameters(params): Parameters<RecommendParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "recommend",
            title = %params.title,
            k = ?params.k,
            "Tool called"
        );

        if params.title.trim().is_empty() {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'title' is required and cannot be empty",
                "field": "title"
            })));
        }
        if let Some(k) = params.k {
            if k == 0 || k as usize > MAX_NEIGHBORS {
                return Ok(CallToolResult::structured_error(json!({
                    "isError": true,
                    "error": format!("Field 'k' must be between 1 and {}", MAX_NEIGHBORS),
                    "field": "k"
                })));
            }
        }

        match self
            .recommender
            .recommend(&params.title, params.k.map(|k| k as usize))
        {
            Ok(recs) => Ok(CallToolResult::structured(json!({
                "title": params.title,
                "recommendations": recs.iter().map(recommendation_json).collect::<Vec<_>>(),
                "count": recs.len(),
                "generation_id": self.recommender.generation_id(),
            }))),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "List the trending anime captured by the most recent catalog update, best score first, each with a short synopsis excerpt when available.")]
    async fn trending(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "trending", "Tool called");

        let items = self.recommender.trending();
        Ok(CallToolResult::structured(json!({
            "trending": items.iter().map(recommendation_json).collect::<Vec<_>>(),
            "count": items.len(),
            "generation_id": self.recommender.generation_id(),
        })))
    }

    #[tool(description = "List catalog titles, optionally filtered by a case-insensitive substring. Use this to find exact titles for recommend.")]
    async fn list_titles(
        &self,
        Parameters(params): Parameters<ListTitlesParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "list_titles",
            query = ?params.query,
            limit = ?params.limit,
            "Tool called"
        );

        let limit = params.limit.unwrap_or(50);
        if limit == 0 || limit > 200 {
            return Ok(CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'limit' must be between 1 and 200",
                "field": "limit"
            })));
        }

        let titles = self
            .recommender
            .titles(params.query.as_deref(), limit as usize);
        let hint = if titles.is_empty() {
            "No titles matched. Try a shorter query"
        } else {
            "Pass one of these titles to recommend"
        };
        Ok(CallToolResult::structured(json!({
            "titles": titles,
            "count": titles.len(),
            "hint": hint,
        })))
    }

    #[tool(description = "Check server health and the live catalog generation")]
    async fn health_check(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let generation = self.recommender.generation();
        let response = json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "generation_id": generation.id,
            "published_at": generation.created_at.to_rfc3339(),
            "feature_version": generation.feature_version,
            "items": generation.catalog.len(),
        });

        Ok(CallToolResult::structured(response))
    }
}

// Helper: format trending items into human-readable text for resource consumption
fn format_trending_text(items: &[Recommendation]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(rank, r)| {
            let score = r
                .score
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "unscored".to_string());
            let mut entry = format!("{}. {} ({})\n   {}", rank + 1, r.title, score, r.detail_url);
            if let Some(synopsis) = &r.synopsis {
                entry.push_str("\n   ");
                entry.push_str(synopsis);
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for RecommenderService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "animatch".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Content-similarity anime recommender over a persisted catalog snapshot".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Anime recommender. Tools: recommend, trending, list_titles, health_check. Resources: anime://trending (latest trending snapshot). Use list_titles to find an exact title before calling recommend.".to_string()
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![
                RawResource {
                    uri: TRENDING_URI.to_string(),
                    name: "trending".to_string(),
                    title: Some("Trending Anime".to_string()),
                    description: Some("Top-scored items of the most recent catalog update".to_string()),
                    mime_type: Some("text/plain".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                }
                .no_annotation(),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match request.uri.as_str() {
            TRENDING_URI => {
                let items = self.recommender.trending();
                let text = if items.is_empty() {
                    "No trending items in the current catalog generation.".to_string()
                } else {
                    format_trending_text(&items)
                };

                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(text, request.uri)],
                })
            }
            uri => Err(McpError::resource_not_found(
                format!("Resource not found: {}", uri),
                None,
            )),
        }
    }
}
