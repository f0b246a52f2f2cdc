//! Shared types, error definitions, and utilities used across all parley crates.

pub mod error;
pub mod retry;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    retry::{RetryPolicy, cancellable},
    types::{ChannelType, MessageKind, now_ms},
};
