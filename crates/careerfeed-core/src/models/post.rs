use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::transport::{FormField, FormValue, RequestBody};
use crate::api::ApiError;

/// Largest image accepted for upload (5 MiB).
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Post {
    pub id: i64,
    pub username: String,
    pub created_datetime: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub user_liked: bool,
}

/// Result of toggling a like on a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LikeToggle {
    /// "liked" or "unliked", as reported by the server
    pub action: String,
    pub likes_count: i64,
    pub user_liked: bool,
}

/// An image to attach to a post.
#[derive(Clone)]
pub struct ImageAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageAttachment {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read an image from disk, guessing its content type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let content_type = Self::guess_content_type(path).to_string();
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    fn guess_content_type(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            "svg" => "image/svg+xml",
            _ => "application/octet-stream",
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if !self.content_type.starts_with("image/") {
            return Err(ApiError::Validation(
                "Please select a valid image file".to_string(),
            ));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(ApiError::Validation(
                "Image size must be less than 5MB".to_string(),
            ));
        }
        Ok(())
    }
}

/// Title and content for a new post or an edit, with an optional image.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub image: Option<ImageAttachment>,
}

impl PostDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Required-field checks run before any request is sent.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::Validation("Title is required".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(ApiError::Validation("Content is required".to_string()));
        }
        if let Some(ref image) = self.image {
            image.validate()?;
        }
        Ok(())
    }

    /// JSON without an image, multipart with one.
    pub fn to_body(&self) -> RequestBody {
        let title = self.title.trim();
        let content = self.content.trim();
        match self.image {
            None => RequestBody::Json(json!({ "title": title, "content": content })),
            Some(ref image) => RequestBody::Multipart(vec![
                FormField::text("title", title),
                FormField::text("content", content),
                FormField {
                    name: "image".to_string(),
                    value: FormValue::File {
                        file_name: image.file_name.clone(),
                        content_type: image.content_type.clone(),
                        bytes: image.bytes.clone(),
                    },
                },
            ]),
        }
    }
}
