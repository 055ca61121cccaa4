//! Market Data Message Types
//!
//! The pipeline treats a quote as opaque bytes from fetch to publish. It is
//! only interpreted at the reader, where it is decoded into a JSON value for
//! downstream consumers.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

// =============================================================================
// Raw Quote
// =============================================================================

/// Quote body exactly as returned by the upstream quote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQuote {
    /// Ticker the quote was fetched for.
    pub symbol: String,
    /// Response body bytes, unmodified.
    pub body: Vec<u8>,
}

impl RawQuote {
    /// Create a raw quote.
    #[must_use]
    pub fn new(symbol: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            symbol: symbol.into(),
            body: body.into(),
        }
    }

    /// Turn the quote into an unkeyed outbound record.
    #[must_use]
    pub fn into_record(self) -> OutboundRecord {
        OutboundRecord::unkeyed(self.body)
    }
}

// =============================================================================
// Broker Records
// =============================================================================

/// A message about to be published.
///
/// Records without a key are placed by the broker's default partitioner, so
/// consecutive quotes may land on different partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Optional partitioning key.
    pub key: Option<Vec<u8>>,
    /// Message value.
    pub payload: Vec<u8>,
}

impl OutboundRecord {
    /// Create a record with no partitioning key.
    #[must_use]
    pub const fn unkeyed(payload: Vec<u8>) -> Self {
        Self { key: None, payload }
    }
}

/// Broker acknowledgement for a published record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Partition the record was appended to.
    pub partition: i32,
    /// Offset of the record within the partition.
    pub offset: i64,
}

/// A message delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message value, if any.
    pub payload: Option<Vec<u8>>,
}

// =============================================================================
// Decoding
// =============================================================================

/// A decoded market data message handed to downstream sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketDataEvent {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Decoded JSON payload.
    pub payload: Value,
}

impl MarketDataEvent {
    /// Decode a consumed record into an event.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the payload is present but not valid JSON.
    pub fn decode(record: &ConsumedRecord) -> Result<Self, DecodeError> {
        let payload = decode_payload(record.payload.as_deref())?;
        Ok(Self {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            payload,
        })
    }

    /// Typed view over common quote fields, if present.
    #[must_use]
    pub fn quote_view(&self) -> QuoteView {
        QuoteView::from_value(&self.payload)
    }
}

/// Decode a message value as JSON.
///
/// An absent value decodes to an empty object.
///
/// # Errors
///
/// Returns `DecodeError` if the bytes are not UTF-8 or not valid JSON.
pub fn decode_payload(payload: Option<&[u8]>) -> Result<Value, DecodeError> {
    let Some(bytes) = payload else {
        return Ok(Value::Object(serde_json::Map::new()));
    };

    let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Payload decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    /// Payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Quote View
// =============================================================================

/// Best-effort typed view over a quote payload.
///
/// Understands both the Finnhub short field names (`c`, `d`, `dp`, `h`, `l`,
/// `o`, `pc`, `t`) and plain `symbol`/`price` objects. Missing or non-numeric
/// fields are `None`; the view never rejects a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuoteView {
    /// Ticker, when the payload carries one.
    pub symbol: Option<String>,
    /// Current price.
    pub price: Option<Decimal>,
    /// Absolute change since previous close.
    pub change: Option<Decimal>,
    /// Percent change since previous close.
    pub change_percent: Option<Decimal>,
    /// Session high.
    pub high: Option<Decimal>,
    /// Session low.
    pub low: Option<Decimal>,
    /// Session open.
    pub open: Option<Decimal>,
    /// Previous close.
    pub previous_close: Option<Decimal>,
    /// Quote timestamp (unix seconds).
    pub timestamp: Option<i64>,
}

impl QuoteView {
    /// Extract known quote fields from a JSON value.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            symbol: value
                .get("symbol")
                .and_then(Value::as_str)
                .map(str::to_string),
            price: decimal_field(value, &["c", "price"]),
            change: decimal_field(value, &["d", "change"]),
            change_percent: decimal_field(value, &["dp"]),
            high: decimal_field(value, &["h", "high"]),
            low: decimal_field(value, &["l", "low"]),
            open: decimal_field(value, &["o", "open"]),
            previous_close: decimal_field(value, &["pc"]),
            timestamp: value.get("t").and_then(Value::as_i64),
        }
    }

    /// Whether any price field was recognised.
    #[must_use]
    pub const fn has_price(&self) -> bool {
        self.price.is_some()
    }
}

fn decimal_field(value: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .and_then(|field| match field {
            Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
            Value::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn record(payload: Option<&str>) -> ConsumedRecord {
        ConsumedRecord {
            topic: "market-data".to_string(),
            partition: 1,
            offset: 7,
            payload: payload.map(|p| p.as_bytes().to_vec()),
        }
    }

    #[test]
    fn absent_payload_decodes_to_empty_object() {
        let value = decode_payload(None).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn empty_payload_decodes_to_empty_object() {
        let value = decode_payload(Some(b"  ")).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = decode_payload(Some(b"{not json")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn non_utf8_payload_is_an_error() {
        let err = decode_payload(Some(&[0xff, 0xfe, 0xfd])).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn event_keeps_record_position() {
        let event =
            MarketDataEvent::decode(&record(Some(r#"{"symbol":"AAPL","price":150.2}"#))).unwrap();
        assert_eq!(event.topic, "market-data");
        assert_eq!(event.partition, 1);
        assert_eq!(event.offset, 7);
        assert_eq!(event.payload["symbol"], "AAPL");
        assert_eq!(event.payload["price"], 150.2);
    }

    #[test]
    fn raw_quote_body_is_published_verbatim() {
        let body = r#"{"c":261.74,"d":-1.5,"dp":-0.57,"t":1700000000}"#;
        let record = RawQuote::new("AAPL", body).into_record();
        assert!(record.key.is_none());
        assert_eq!(record.payload, body.as_bytes());
    }

    #[test]
    fn quote_view_reads_finnhub_fields() {
        let view = QuoteView::from_value(&json!({
            "c": 261.74, "d": -1.5, "dp": -0.57, "h": 263.3, "l": 260.68,
            "o": 261.07, "pc": 263.24, "t": 1_700_000_000
        }));
        assert_eq!(view.price, Some(Decimal::from_str("261.74").unwrap()));
        assert_eq!(view.change, Some(Decimal::from_str("-1.5").unwrap()));
        assert_eq!(view.previous_close, Some(Decimal::from_str("263.24").unwrap()));
        assert_eq!(view.timestamp, Some(1_700_000_000));
        assert!(view.symbol.is_none());
    }

    #[test]
    fn quote_view_reads_plain_fields() {
        let view = QuoteView::from_value(&json!({"symbol": "AAPL", "price": "150.20"}));
        assert_eq!(view.symbol.as_deref(), Some("AAPL"));
        assert_eq!(view.price, Some(Decimal::from_str("150.20").unwrap()));
        assert!(view.has_price());
    }

    #[test]
    fn quote_view_tolerates_unrelated_payloads() {
        let view = QuoteView::from_value(&json!([1, 2, 3]));
        assert_eq!(view, QuoteView::default());
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_payload(Some(&bytes));
        }
    }
}
