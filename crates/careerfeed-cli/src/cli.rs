//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// careerfeed - post, like and comment on the careers feed from the terminal.
#[derive(Debug, Parser)]
#[command(name = "careerfeed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// API base URL (overrides config).
    #[arg(long, env = "CAREERFEED_API_URL")]
    pub api_url: Option<String>,

    /// Environment: development or production (overrides config).
    #[arg(long, env = "CAREERFEED_ENV")]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an account and sign in.
    Register {
        username: String,
    },

    /// Sign in. Defaults to the last username used.
    Login {
        username: Option<String>,
    },

    /// Sign out and forget stored credentials.
    Logout,

    /// Show who is signed in.
    Whoami,

    /// Ask the server whether the session is still valid.
    Check,

    /// Show where a surface would send the current session.
    Guard(GuardArgs),

    /// Post commands.
    #[command(subcommand)]
    Posts(PostCommand),

    /// Comment commands.
    #[command(subcommand)]
    Comments(CommentCommand),

    /// List users mentioned in a post.
    Mentions {
        post_id: i64,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct GuardArgs {
    /// Surface that requires a session (the dashboard).
    #[arg(long)]
    pub protected: bool,

    /// Surface only for signed-out users (welcome).
    #[arg(long)]
    pub public: bool,
}

#[derive(Debug, Subcommand)]
pub enum PostCommand {
    /// List the feed.
    List,

    /// Show one post with its comments.
    Show {
        id: i64,
    },

    /// Create a post.
    Create(PostArgs),

    /// Edit a post.
    Edit {
        id: i64,

        #[command(flatten)]
        post: PostArgs,
    },

    /// Delete a post.
    Delete {
        id: i64,
    },

    /// Like or unlike a post.
    Like {
        id: i64,
    },
}

#[derive(Debug, Args)]
pub struct PostArgs {
    #[arg(short, long)]
    pub title: String,

    #[arg(short, long)]
    pub content: String,

    /// Image to attach (sent as multipart).
    #[arg(short, long)]
    pub image: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CommentCommand {
    /// List comments on a post.
    List {
        post_id: i64,
    },

    /// Comment on a post.
    Add {
        post_id: i64,
        content: String,
    },

    /// Edit a comment.
    Edit {
        post_id: i64,
        comment_id: i64,
        content: String,
    },

    /// Delete a comment.
    Delete {
        post_id: i64,
        comment_id: i64,
    },
}
