//! Stream Events
//!
//! Events arrive from the push source as JSON text. A frame holds either a
//! single event object or an array of them; frames are decoded in order and
//! the pipeline preserves that order end to end.
//!
//! ```json
//! {"symbol":"BTC-USD","timestamp":1718000000000,"price":67012.5,"volume":0.25}
//! [{"timestamp":1718000000001,"price":10.0,"volume":3}]
//! ```

use serde::{Deserialize, Serialize};

/// One tick from the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Series key (instrument symbol) when the source is multiplexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Source timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Observed price.
    pub price: f64,
    /// Traded volume.
    pub volume: f64,
}

impl StreamEvent {
    /// Create an event without a series key.
    #[must_use]
    pub const fn new(timestamp: i64, price: f64, volume: f64) -> Self {
        Self {
            symbol: None,
            timestamp,
            price,
            volume,
        }
    }

    /// Attach a series key.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Errors decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum EventCodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is neither a JSON object nor an array.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for inbound event frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventCodec;

impl EventCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into zero or more events, in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or an element does
    /// not have the event shape.
    pub fn decode(&self, text: &str) -> Result<Vec<StreamEvent>, EventCodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            Ok(serde_json::from_str(trimmed)?)
        } else if trimmed.starts_with('{') {
            Ok(vec![serde_json::from_str(trimmed)?])
        } else {
            let preview: String = trimmed.chars().take(50).collect();
            Err(EventCodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_object() {
        let events = EventCodec::new()
            .decode(r#"{"symbol":"ETH","timestamp":5,"price":1.5,"volume":2}"#)
            .unwrap();
        assert_eq!(events, vec![StreamEvent::new(5, 1.5, 2.0).with_symbol("ETH")]);
    }

    #[test]
    fn decodes_array_in_order() {
        let events = EventCodec::new()
            .decode(r#"[{"timestamp":1,"price":1,"volume":1},{"timestamp":2,"price":2,"volume":2}]"#)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 1);
        assert_eq!(events[1].timestamp, 2);
        assert!(events[0].symbol.is_none());
    }

    #[test]
    fn ignores_unknown_fields() {
        let events = EventCodec::new()
            .decode(r#"{"timestamp":1,"price":1,"volume":1,"exchange":"X"}"#)
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn rejects_plain_text() {
        let err = EventCodec::new().decode("pong").unwrap_err();
        assert!(matches!(err, EventCodecError::InvalidFormat(_)));
    }

    #[test]
    fn rejects_missing_price() {
        let err = EventCodec::new()
            .decode(r#"{"timestamp":1,"volume":1}"#)
            .unwrap_err();
        assert!(matches!(err, EventCodecError::Json(_)));
    }
}
