use std::error::Error as StdError;

use thiserror::Error;

/// Errors shared by every parley crate.
///
/// Variants carry an HTTP-equivalent status (see [`Error::status_code`]) so
/// the gateway can surface them without re-classifying.
#[derive(Error, Debug)]
pub enum Error {
    /// A required field is missing or has the wrong shape. Raised before any write.
    #[error("invalid input: {message}")]
    Validation { message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// The entity exists but belongs to another organization.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    /// An external API answered with a non-success status.
    #[error("{service} responded with HTTP {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Transport, storage or io failure, wrapped with the failing hop.
    #[error("{context}: {source}")]
    External {
        context: String,
        transient: bool,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("completion backend returned no choices")]
    EmptyCompletion,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wrap a permanent failure from an external dependency.
    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            transient: false,
            source: Box::new(source),
        }
    }

    /// Wrap a failure that may succeed when retried (timeouts, dropped connections).
    #[must_use]
    pub fn transient(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            transient: true,
            source: Box::new(source),
        }
    }

    /// Classify a `reqwest` transport error.
    #[must_use]
    pub fn http(context: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() || source.is_connect() || source.is_request() {
            Self::transient(context, source)
        } else {
            Self::external(context, source)
        }
    }

    /// Whether a bounded retry may recover from this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::External { transient, .. } => *transient,
            _ => false,
        }
    }

    /// HTTP-equivalent status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Cancelled => 499,
            Self::Upstream { .. } | Self::External { .. } | Self::EmptyCompletion => 502,
            Self::Message(_) => 500,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// parley_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
