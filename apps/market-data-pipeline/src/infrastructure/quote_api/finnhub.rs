//! Finnhub quote endpoint adapter.
//!
//! Issues `GET {url}?symbol=<ticker>&token=<key>` and returns the response
//! body untouched. Nothing is retried here; the next poll is the retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::application::ports::{QuoteFetchError, QuoteSource};
use crate::domain::market_data::RawQuote;
use crate::infrastructure::config::{ApiCredentials, DEFAULT_QUOTE_API_URL, PipelineConfig};

/// Finnhub adapter settings.
#[derive(Debug, Clone)]
pub struct FinnhubConfig {
    /// Quote endpoint.
    pub url: String,
    /// API credential sent as the `token` query parameter.
    pub credentials: ApiCredentials,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl FinnhubConfig {
    /// Settings with the public endpoint and a 5 second timeout.
    #[must_use]
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            url: DEFAULT_QUOTE_API_URL.to_string(),
            credentials,
            timeout: Duration::from_secs(5),
        }
    }
}

impl From<&PipelineConfig> for FinnhubConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            url: config.publisher.quote_api_url.clone(),
            credentials: config.credentials.clone(),
            timeout: config.publisher.request_timeout,
        }
    }
}

/// Quote source backed by the Finnhub REST API.
#[derive(Debug, Clone)]
pub struct FinnhubQuoteSource {
    client: Client,
    config: FinnhubConfig,
}

impl FinnhubQuoteSource {
    /// Create a new adapter.
    ///
    /// # Errors
    ///
    /// Returns `QuoteFetchError::Network` if the HTTP client cannot be built.
    pub fn new(config: FinnhubConfig) -> Result<Self, QuoteFetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QuoteFetchError::Network {
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl QuoteSource for FinnhubQuoteSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, QuoteFetchError> {
        let response = self
            .client
            .get(&self.config.url)
            .query(&[
                ("symbol", symbol),
                ("token", self.config.credentials.api_key()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteFetchError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteFetchError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(map_transport_error)?;

        if body.trim_ascii().is_empty() {
            return Err(QuoteFetchError::EmptyBody);
        }

        tracing::debug!(symbol, bytes = body.len(), "Quote fetched");
        Ok(RawQuote::new(symbol, body.to_vec()))
    }
}

fn map_transport_error(error: reqwest::Error) -> QuoteFetchError {
    if error.is_timeout() {
        QuoteFetchError::Timeout
    } else {
        // Strip the URL so the token never reaches logs.
        QuoteFetchError::Network {
            message: error.without_url().to_string(),
        }
    }
}
