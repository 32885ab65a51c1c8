//! Display rendering interface

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MIME bundle plus per-type metadata, as carried by `execute_result` and `display_data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayPayload {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DisplayPayload {
    /// Payload with a single `text/plain` entry
    pub fn plain(text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), Value::String(text.into()));
        Self {
            data,
            metadata: Map::new(),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>, value: Value) -> Self {
        self.data.insert(mime.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Converts execution results into display payloads
pub trait Renderer: Send + Sync {
    /// `None` means the value has no visible representation
    fn render(&self, value: &Value) -> Option<DisplayPayload>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_payload() {
        let payload =
            DisplayPayload::plain("42").with_mime("application/json", json!({"answer": 42}));
        assert_eq!(payload.data["text/plain"], json!("42"));
        assert_eq!(payload.data["application/json"]["answer"], json!(42));
        assert!(payload.metadata.is_empty());
        assert!(!payload.is_empty());
        assert!(DisplayPayload::default().is_empty());
    }
}
