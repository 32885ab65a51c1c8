//! Plain-text renderer

use kernel_interfaces::{DisplayPayload, Renderer};
use serde_json::Value;

/// Renders strings verbatim and other values as JSON text; `null` renders nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl Renderer for PlainTextRenderer {
    fn render(&self, value: &Value) -> Option<DisplayPayload> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(DisplayPayload::plain(text.clone())),
            Value::Object(_) | Value::Array(_) => {
                let pretty = serde_json::to_string_pretty(value)
                    .unwrap_or_else(|_| value.to_string());
                Some(DisplayPayload::plain(pretty).with_mime("application/json", value.clone()))
            }
            other => Some(DisplayPayload::plain(other.to_string())),
        }
    }
}
