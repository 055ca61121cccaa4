//! Quote Source Port (Driven Port)
//!
//! Interface for fetching a single symbol's latest quote from an upstream
//! request/response API.

use async_trait::async_trait;

use crate::domain::market_data::RawQuote;

/// Quote fetch error.
///
/// All variants are transient from the publisher's point of view: the cycle
/// is skipped and the next tick tries again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteFetchError {
    /// Network-level failure.
    #[error("quote request failed: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Request exceeded its timeout.
    #[error("quote request timed out")]
    Timeout,

    /// Upstream rate limit hit.
    #[error("quote API rate limit exceeded")]
    RateLimited,

    /// Upstream returned a non-success status.
    #[error("quote API returned status {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Upstream returned no content.
    #[error("quote API returned an empty body")]
    EmptyBody,
}

impl QuoteFetchError {
    /// Label used in metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Api { .. } => "api",
            Self::EmptyBody => "empty_body",
        }
    }
}

/// Port for fetching quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the latest quote for `symbol`, body passed through unmodified.
    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, QuoteFetchError>;
}
