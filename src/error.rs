//! # Error Handling
//!
//! Unified error type for the authorization-provider client. Remote failures,
//! missing wizard context and user cancellation are kept distinct so callers
//! can surface the first two and stay quiet on the last.

use thiserror::Error;

use crate::config::ConfigError;

/// Maximum number of characters kept from a raw error body.
const BODY_SNIPPET_LIMIT: usize = 200;

/// Errors produced by the service client, the resource tree and the wizards.
#[derive(Debug, Error)]
pub enum ApimError {
    /// The control plane answered with HTTP status >= 400.
    #[error("{}", remote_message(*status, message.as_deref(), body.as_deref()))]
    Remote {
        status: u16,
        /// `error.message` from the ARM error body, when present
        message: Option<String>,
        /// Raw body snippet, kept for diagnostics when no message was supplied
        body: Option<String>,
    },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to acquire credentials: {0}")]
    Credential(String),

    /// A wizard reached a create call without the fields it requires.
    #[error("{0}")]
    MissingContext(&'static str),

    /// The requested action does not apply to the target node.
    #[error("{0}")]
    Unsupported(String),

    /// The user declined a confirmation or abandoned a prompt.
    #[error("operation cancelled by user")]
    Cancelled,

    /// The host could not service a prompt, clipboard or browser request.
    #[error("host interaction failed: {0}")]
    Host(String),

    /// A failed operation wrapped with a human-readable description.
    #[error("{context} {source}")]
    Operation {
        context: String,
        #[source]
        source: Box<ApimError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApimError {
    /// Build a remote error from a status code and the raw response body.
    pub fn remote(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(|message| message.as_str())
                    .map(str::to_string)
            });

        let body = if body.trim().is_empty() {
            None
        } else {
            Some(truncate(body, BODY_SNIPPET_LIMIT))
        };

        ApimError::Remote {
            status,
            message,
            body,
        }
    }

    /// Prefix this error with a description of the attempted operation.
    ///
    /// Cancellation passes through untouched so it is never reported as a failure.
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        if self.is_cancellation() {
            return self;
        }
        ApimError::Operation {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when the error represents the user backing out rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        match self {
            ApimError::Cancelled => true,
            ApimError::Operation { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// HTTP status of the underlying remote failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApimError::Remote { status, .. } => Some(*status),
            ApimError::Operation { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Extension for attaching operation context to fallible results.
pub trait ResultExt<T> {
    fn with_operation<F, S>(self, context: F) -> Result<T, ApimError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T, ApimError> {
    fn with_operation<F, S>(self, context: F) -> Result<T, ApimError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| err.context(context()))
    }
}

fn remote_message(status: u16, message: Option<&str>, body: Option<&str>) -> String {
    match (message, body) {
        (Some(message), _) => message.to_string(),
        (None, Some(body)) => format!("request failed with status {}: {}", status, body),
        (None, None) => format!("request failed with status {}", status),
    }
}

fn truncate(body: &str, limit: usize) -> String {
    if body.chars().count() > limit {
        let truncated: String = body.chars().take(limit).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}
