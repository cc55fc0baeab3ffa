//! Error types for the provider adapters and the poll loop.

use crate::Provider;
use thiserror::Error;

/// Errors that can occur while watching a temporary inbox.
///
/// The first four variants are the provider taxonomy the poll loop acts on; adapters map
/// every transport or upstream failure onto one of them before it reaches the loop.
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP-layer failure (timeout, connect error, 5xx, rate limit).
    #[error("{provider} is unavailable: {reason}")]
    ProviderUnavailable {
        /// Provider that failed.
        provider: Provider,
        /// Human-readable cause.
        reason: String,
    },

    /// The provider refused the request (quota exhausted, invalid options).
    #[error("{provider} rejected the request: {reason}")]
    ProviderRejected {
        /// Provider that refused.
        provider: Provider,
        /// Human-readable cause.
        reason: String,
    },

    /// The provider invalidated the address or its session token.
    #[error("{provider} session expired")]
    SessionExpired {
        /// Provider whose session ended.
        provider: Provider,
    },

    /// The provider returned data that cannot be mapped.
    #[error("malformed response from {provider}: {reason}")]
    MalformedResponse {
        /// Provider that sent the data.
        provider: Provider,
        /// What was missing or wrong.
        reason: String,
    },

    /// Invalid settings or arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error while reading or writing settings/history.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error for settings/history files.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by the poll loop's failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry at the next interval.
    Unavailable,
    /// Permanent request-layer refusal.
    Rejected,
    /// Address must be recreated.
    SessionExpired,
    /// Skip the offending message.
    Malformed,
    /// Local failure unrelated to a provider.
    Local,
}

impl Error {
    /// Classify this error for the poll loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ProviderUnavailable { .. } => ErrorKind::Unavailable,
            Error::ProviderRejected { .. } => ErrorKind::Rejected,
            Error::SessionExpired { .. } => ErrorKind::SessionExpired,
            Error::MalformedResponse { .. } => ErrorKind::Malformed,
            Error::Config(_) | Error::Io(_) | Error::Json(_) => ErrorKind::Local,
        }
    }

    pub(crate) fn unavailable(provider: Provider, reason: impl Into<String>) -> Self {
        Error::ProviderUnavailable {
            provider,
            reason: reason.into(),
        }
    }

    pub(crate) fn rejected(provider: Provider, reason: impl Into<String>) -> Self {
        Error::ProviderRejected {
            provider,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(provider: Provider, reason: impl Into<String>) -> Self {
        Error::MalformedResponse {
            provider,
            reason: reason.into(),
        }
    }
}
