//! Utility functions for string formatting and manipulation.

pub mod format;

pub use format::{format_datetime, format_time_ago, truncate_bytes, truncate_string};
