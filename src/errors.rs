/// Domain-specific error types for animatch
///
/// Ingestion-time failures (source, empty catalog, storage) are contained by the
/// update pipeline; query-time failures are returned to the caller as typed
/// values so an unknown selection is distinguishable from an empty result.

#[derive(Debug, thiserror::Error)]
pub enum AnimatchError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed source response: {0}")]
    MalformedSource(String),

    #[error("{what} not found: {key}")]
    NotFound {
        what: &'static str,
        key: String,
    },

    #[error("Refusing to publish an empty catalog generation")]
    EmptyCatalog,

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AnimatchError {
    fn from(e: sqlx::Error) -> Self {
        AnimatchError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for AnimatchError {
    fn from(e: reqwest::Error) -> Self {
        AnimatchError::SourceUnavailable(e.to_string())
    }
}

impl AnimatchError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use animatch::errors::AnimatchError;
    /// let err = AnimatchError::validation("title", "Title cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        AnimatchError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    pub fn title_not_found(title: &str) -> Self {
        AnimatchError::NotFound {
            what: "Title",
            key: title.to_string(),
        }
    }

    pub fn item_not_found(item_id: i64) -> Self {
        AnimatchError::NotFound {
            what: "Item",
            key: item_id.to_string(),
        }
    }

    /// True for failures that abort an update run but leave the live generation intact.
    pub fn is_ingestion_failure(&self) -> bool {
        matches!(
            self,
            AnimatchError::SourceUnavailable(_)
                | AnimatchError::MalformedSource(_)
                | AnimatchError::EmptyCatalog
        )
    }
}
