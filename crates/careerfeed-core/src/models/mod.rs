//! Data models for the careers feed.
//!
//! - `Post`, `PostDraft`, `ImageAttachment`, `LikeToggle`: posts and their edits
//! - `Comment`, `Mention`: discussion on a post
//! - `User`: account info from the auth endpoints

pub mod comment;
pub mod post;
pub mod user;

pub use comment::{comment_text, Comment, Mention};
pub use post::{ImageAttachment, LikeToggle, Post, PostDraft, MAX_IMAGE_BYTES};
pub use user::User;
