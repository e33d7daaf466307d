//! careerfeed - a terminal client for the careers feed.
//!
//! Every command hydrates the persisted session first, then goes through
//! the authenticated API client, so an expired access token is refreshed
//! transparently and an expired session signs the user out.

mod cli;

use std::io;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use careerfeed_core::auth::{GuardDecision, RouteGuard, SignOutReason};
use careerfeed_core::models::{Comment, ImageAttachment, Post, PostDraft};
use careerfeed_core::utils::{format_datetime, format_time_ago, truncate_string};
use careerfeed_core::{ApiClient, ApiError, Config};

use cli::{Cli, Command, CommentCommand, PostArgs, PostCommand};

/// Directory for daily rolling log files, if set
const LOG_DIR_ENV: &str = "CAREERFEED_LOG_DIR";

/// Width of post content previews in the feed listing
const PREVIEW_WIDTH: usize = 60;

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "careerfeed.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    config.apply_overrides(cli.api_url.as_deref(), cli.env.as_deref());

    let client = ApiClient::from_config(&config)?;
    let state = client.session().hydrate().await;
    info!(
        base_url = config.base_url(),
        authenticated = state.is_authenticated(),
        "careerfeed starting"
    );

    match cli.command {
        Command::Register { username } => {
            let session = client.session().register(&username).await?;
            remember_username(&mut config, &session.username)?;
            println!("Welcome, {}! Your account is ready.", session.username);
        }
        Command::Login { username } => {
            let username = username
                .or_else(|| config.last_username.clone())
                .context("No username given and none remembered; run `careerfeed login <username>`")?;
            let session = client.session().login(&username).await?;
            remember_username(&mut config, &session.username)?;
            println!("Signed in as {}", session.username);
        }
        Command::Logout => {
            client.session().logout();
            println!("Signed out");
        }
        Command::Whoami => whoami(&client),
        Command::Check => {
            if client.session().check_auth().await {
                println!("Session is valid");
            } else {
                println!("Not signed in");
                report_sign_out(&client);
            }
        }
        Command::Guard(args) => {
            let mut guard = if args.protected {
                RouteGuard::protected()
            } else {
                RouteGuard::public()
            };
            match guard.evaluate(&client.session().state()) {
                GuardDecision::Loading | GuardDecision::Redirecting => println!("loading"),
                GuardDecision::Render => println!("render"),
                GuardDecision::Redirect(surface) => println!("redirect {}", surface.path()),
            }
        }
        Command::Posts(command) => run_posts(&client, command).await?,
        Command::Comments(command) => run_comments(&client, command).await?,
        Command::Mentions { post_id } => {
            let mentions = client.list_mentions(post_id).await.map_err(|e| explain(&client, e))?;
            if mentions.is_empty() {
                println!("No mentions");
            }
            for mention in mentions {
                println!("@{}", mention.mentioned_username);
            }
        }
    }

    Ok(())
}

fn remember_username(config: &mut Config, username: &str) -> Result<()> {
    if config.last_username.as_deref() != Some(username) {
        config.last_username = Some(username.to_string());
        config.save().context("Failed to save configuration")?;
    }
    Ok(())
}

fn whoami(client: &ApiClient) {
    let state = client.session().state();
    match state.session {
        Some(session) if state.is_authenticated() => {
            println!(
                "{} (signed in {})",
                session.username,
                format_datetime(&session.last_login_at)
            );
        }
        _ => {
            println!("Not signed in");
            report_sign_out(client);
        }
    }
}

fn report_sign_out(client: &ApiClient) {
    if client.session().state().signed_out == Some(SignOutReason::Expired) {
        println!("Your session expired. Please log in again.");
    }
}

/// Turn an API error into a CLI error, pointing at `login` when that is the fix.
fn explain(client: &ApiClient, err: ApiError) -> anyhow::Error {
    if err.requires_login() {
        report_sign_out(client);
        anyhow::Error::new(err).context("Run `careerfeed login` to sign in")
    } else {
        err.into()
    }
}

fn build_draft(args: PostArgs) -> Result<PostDraft> {
    let mut draft = PostDraft::new(args.title, args.content);
    if let Some(path) = args.image {
        let image = ImageAttachment::from_path(&path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        draft = draft.with_image(image);
    }
    Ok(draft)
}

async fn run_posts(client: &ApiClient, command: PostCommand) -> Result<()> {
    let now = Utc::now();
    match command {
        PostCommand::List => {
            let posts = client.list_posts().await.map_err(|e| explain(client, e))?;
            if posts.is_empty() {
                println!("No posts yet");
            }
            for post in &posts {
                print_post_line(post, now);
            }
        }
        PostCommand::Show { id } => {
            let Some(post) = client.get_post(id).await.map_err(|e| explain(client, e))? else {
                println!("Post {} not found", id);
                return Ok(());
            };
            println!("{}", post.title);
            println!(
                "by @{} - {} - {} likes{}",
                post.username,
                format_time_ago(&post.created_datetime, now),
                post.likes_count,
                if post.user_liked { " (you liked this)" } else { "" }
            );
            if let Some(ref image) = post.image {
                println!("[image] {}", image);
            }
            println!();
            println!("{}", post.content);

            let comments = client.list_comments(id).await.map_err(|e| explain(client, e))?;
            if !comments.is_empty() {
                println!();
            }
            for comment in &comments {
                print_comment(comment, now);
            }
        }
        PostCommand::Create(args) => {
            let draft = build_draft(args)?;
            let post = client.create_post(&draft).await.map_err(|e| explain(client, e))?;
            println!("Created post {}", post.id);
        }
        PostCommand::Edit { id, post } => {
            let draft = build_draft(post)?;
            let post = client.update_post(id, &draft).await.map_err(|e| explain(client, e))?;
            println!("Updated post {}", post.id);
        }
        PostCommand::Delete { id } => {
            client.delete_post(id).await.map_err(|e| explain(client, e))?;
            println!("Deleted post {}", id);
        }
        PostCommand::Like { id } => {
            let like = client.toggle_like(id).await.map_err(|e| explain(client, e))?;
            println!("{} ({} likes)", like.action, like.likes_count);
        }
    }
    Ok(())
}

async fn run_comments(client: &ApiClient, command: CommentCommand) -> Result<()> {
    match command {
        CommentCommand::List { post_id } => {
            let comments = client.list_comments(post_id).await.map_err(|e| explain(client, e))?;
            if comments.is_empty() {
                println!("No comments yet");
            }
            let now = Utc::now();
            for comment in &comments {
                print_comment(comment, now);
            }
        }
        CommentCommand::Add { post_id, content } => {
            let comment = client
                .create_comment(post_id, &content)
                .await
                .map_err(|e| explain(client, e))?;
            println!("Added comment {}", comment.id);
        }
        CommentCommand::Edit {
            post_id,
            comment_id,
            content,
        } => {
            client
                .update_comment(post_id, comment_id, &content)
                .await
                .map_err(|e| explain(client, e))?;
            println!("Updated comment {}", comment_id);
        }
        CommentCommand::Delete {
            post_id,
            comment_id,
        } => {
            client
                .delete_comment(post_id, comment_id)
                .await
                .map_err(|e| explain(client, e))?;
            println!("Deleted comment {}", comment_id);
        }
    }
    Ok(())
}

fn print_post_line(post: &Post, now: chrono::DateTime<Utc>) {
    println!(
        "#{:<5} {:<24} @{:<16} {:>4} likes {:>4} comments  {}",
        post.id,
        truncate_string(&post.title, 24),
        post.username,
        post.likes_count,
        post.comments_count,
        format_time_ago(&post.created_datetime, now)
    );
    println!("       {}", truncate_string(&post.content, PREVIEW_WIDTH));
}

fn print_comment(comment: &Comment, now: chrono::DateTime<Utc>) {
    let edited = if comment.is_edited() { " (edited)" } else { "" };
    println!(
        "  [{}] @{} {}{}: {}",
        comment.id,
        comment.username,
        format_time_ago(&comment.created_at, now),
        edited,
        comment.content
    );
}
