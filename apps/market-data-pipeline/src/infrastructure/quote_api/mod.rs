//! Upstream Quote API Adapters
//!
//! `QuoteSource` implementations over request/response quote APIs.

mod finnhub;

pub use finnhub::{FinnhubConfig, FinnhubQuoteSource};
