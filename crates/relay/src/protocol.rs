//! Wire formats.
//!
//! Subscribers send one JSON object per message:
//!
//! ```text
//! { "track": "<keyword>" }
//! { "untrack": "<keyword>" }
//! { "trending": { "lat": <num>, "long": <num> } }
//! ```
//!
//! Delivered items are the upstream item object with an added `keywords`
//! array listing the matched keywords.

use crate::error::Result;
use crate::keyword::Keyword;
use serde_json::{Map, Value};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// A parsed subscriber request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Track(Keyword),
    Untrack(Keyword),
    /// Trends lookup, near a location if one was given.
    Trending(Option<GeoPoint>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
}

impl ClientMessage {
    /// Parse a raw subscriber message.
    ///
    /// Returns None for anything that is not a usable request: malformed
    /// JSON, non-object messages, or no field carrying a usable value.
    /// `track` wins over `untrack`, which wins over `trending`. Each field is
    /// read on its own, so a mistyped field never hides a valid one.
    pub fn parse(text: &str) -> Option<Self> {
        let Value::Object(fields) = serde_json::from_str::<Value>(text).ok()? else {
            return None;
        };

        if let Some(keyword) = keyword_field(&fields, "track") {
            return Some(Self::Track(keyword));
        }
        if let Some(keyword) = keyword_field(&fields, "untrack") {
            return Some(Self::Untrack(keyword));
        }

        match fields.get("trending") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(flag)) if flag.is_empty() => None,
            Some(Value::Number(flag)) if flag.as_f64() == Some(0.0) => None,
            Some(Value::Object(location)) => {
                let lat = location.get("lat").and_then(Value::as_f64);
                let long = location.get("long").and_then(Value::as_f64);
                let point = lat.zip(long).map(|(lat, long)| GeoPoint { lat, long });
                Some(Self::Trending(point))
            }
            Some(_) => Some(Self::Trending(None)),
        }
    }
}

/// A string field holding a non-blank keyword.
fn keyword_field(fields: &Map<String, Value>, name: &str) -> Option<Keyword> {
    fields.get(name).and_then(Value::as_str).and_then(Keyword::parse)
}

// ============================================================================
// Upstream items
// ============================================================================

/// One item from the upstream stream: a JSON object with a string `text`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    fields: Map<String, Value>,
}

impl Tweet {
    /// Accept a JSON value as an item if it is an object with a string `text`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) if fields.get("text").is_some_and(Value::is_string) => {
                Some(Self { fields })
            }
            _ => None,
        }
    }

    pub fn text(&self) -> &str {
        self.fields
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Serialize the item with a `keywords` field set to the matched keywords.
    /// Upstream fields keep their order; `keywords` is appended, or replaced
    /// in place if the upstream item already has one.
    pub fn to_delivery_json(&self, keywords: &[Keyword]) -> Result<String> {
        let mut fields = self.fields.clone();
        fields.insert("keywords".to_string(), serde_json::to_value(keywords)?);
        Ok(serde_json::to_string(&fields)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kw(raw: &str) -> Keyword {
        Keyword::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_track_canonicalizes() {
        assert_eq!(
            ClientMessage::parse(r#"{"track":"  RUST "}"#),
            Some(ClientMessage::Track(kw("rust")))
        );
    }

    #[test]
    fn test_parse_untrack() {
        assert_eq!(
            ClientMessage::parse(r#"{"untrack":"Golang"}"#),
            Some(ClientMessage::Untrack(kw("golang")))
        );
    }

    #[test]
    fn test_track_takes_precedence() {
        assert_eq!(
            ClientMessage::parse(r#"{"track":"a","untrack":"b"}"#),
            Some(ClientMessage::Track(kw("a")))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"track":"rust","untrack":5}"#),
            Some(ClientMessage::Track(kw("rust")))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"track":"rust","trending":"yes"}"#),
            Some(ClientMessage::Track(kw("rust")))
        );
    }

    #[test]
    fn test_mistyped_track_falls_through() {
        assert_eq!(
            ClientMessage::parse(r#"{"track":["rust"],"untrack":"rust"}"#),
            Some(ClientMessage::Untrack(kw("rust")))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"track":42,"untrack":null,"trending":{}}"#),
            Some(ClientMessage::Trending(None))
        );
    }

    #[test]
    fn test_blank_track_falls_through_to_untrack() {
        assert_eq!(
            ClientMessage::parse(r#"{"track":"  ","untrack":"b"}"#),
            Some(ClientMessage::Untrack(kw("b")))
        );
    }

    #[test]
    fn test_parse_trending() {
        assert_eq!(
            ClientMessage::parse(r#"{"trending":{"lat":52.5,"long":13.4}}"#),
            Some(ClientMessage::Trending(Some(GeoPoint { lat: 52.5, long: 13.4 })))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"trending":{}}"#),
            Some(ClientMessage::Trending(None))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"trending":true}"#),
            Some(ClientMessage::Trending(None))
        );
    }

    #[test]
    fn test_unusable_messages_are_dropped() {
        assert_eq!(ClientMessage::parse("not json"), None);
        assert_eq!(ClientMessage::parse(""), None);
        assert_eq!(ClientMessage::parse("{}"), None);
        assert_eq!(ClientMessage::parse(r#"{"track":""}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"track":42}"#), None);
        assert_eq!(ClientMessage::parse(r#"["track","rust"]"#), None);
        assert_eq!(ClientMessage::parse(r#"{"trending":false}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"trending":null}"#), None);
        assert_eq!(ClientMessage::parse(r#"{"trending":0}"#), None);
    }

    #[test]
    fn test_tweet_requires_text() {
        assert!(Tweet::from_value(json!({"text": "hi", "id": 1})).is_some());
        assert!(Tweet::from_value(json!({"id": 1})).is_none());
        assert!(Tweet::from_value(json!({"text": 5})).is_none());
        assert!(Tweet::from_value(json!("text")).is_none());
    }

    #[test]
    fn test_delivery_json_keeps_fields_and_adds_keywords() {
        let tweet = Tweet::from_value(json!({"id": 7, "text": "Rust and Golang"})).unwrap();
        let json = tweet.to_delivery_json(&[kw("golang"), kw("rust")]).unwrap();

        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["text"], "Rust and Golang");
        assert_eq!(parsed["keywords"], json!(["golang", "rust"]));
    }

    #[test]
    fn test_delivery_json_preserves_field_order() {
        let tweet = Tweet::from_value(json!({"text": "rust", "id": 7, "user": "a"})).unwrap();
        let json = tweet.to_delivery_json(&[kw("rust")]).unwrap();
        assert_eq!(
            json,
            r#"{"text":"rust","id":7,"user":"a","keywords":["rust"]}"#
        );

        let tweet = Tweet::from_value(json!({"keywords": "x", "text": "rust"})).unwrap();
        let json = tweet.to_delivery_json(&[kw("rust")]).unwrap();
        assert_eq!(json, r#"{"keywords":["rust"],"text":"rust"}"#);
    }
}
