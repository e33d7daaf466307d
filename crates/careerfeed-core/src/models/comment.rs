use serde::{Deserialize, Serialize};

use crate::api::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Comment {
    pub id: i64,
    pub username: String,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Comment {
    pub fn is_edited(&self) -> bool {
        self.updated_at
            .as_deref()
            .map(|u| u != self.created_at)
            .unwrap_or(false)
    }
}

/// A user mentioned with `@username` in a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Mention {
    pub id: i64,
    pub mentioned_username: String,
    pub created_at: String,
}

/// Trimmed comment text, or a validation error when nothing is left.
pub fn comment_text(content: &str) -> Result<&str, ApiError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation("Comment cannot be empty".to_string()));
    }
    Ok(trimmed)
}
