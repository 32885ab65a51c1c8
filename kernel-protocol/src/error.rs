//! Protocol error types

use thiserror::Error;

/// Protocol result type
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing, signing or interpreting messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No `<IDS|MSG>` frame in the multipart message
    #[error("Missing <IDS|MSG> delimiter frame")]
    MissingDelimiter,

    /// Fewer frames than the envelope requires after the delimiter
    #[error(
        "Truncated envelope: expected at least {expected} frames after delimiter, got {actual}"
    )]
    Truncated { expected: usize, actual: usize },

    /// Signature frame does not match the payload
    #[error("Signature verification failed")]
    InvalidSignature,

    /// A payload frame is not valid JSON
    #[error("Invalid JSON in {part} frame: {source}")]
    Json {
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A payload frame that must be an object is something else
    #[error("{part} frame is not a JSON object")]
    NotAnObject { part: &'static str },

    /// Header object is missing required fields
    #[error("Invalid message header: {0}")]
    Header(#[source] serde_json::Error),

    /// Content does not match the declared message type
    #[error("Invalid content for {msg_type}: {source}")]
    Content {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// Signature scheme not supported
    #[error("Unsupported signature scheme: {0}")]
    UnsupportedScheme(String),

    /// Key rejected by the MAC implementation
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

impl ProtocolError {
    /// True for failures scoped to one message; the channel stays usable.
    pub fn is_per_message(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnsupportedScheme(_) | ProtocolError::InvalidKey(_)
        )
    }

    /// True when the message was rejected by signature verification
    pub fn is_signature_error(&self) -> bool {
        matches!(self, ProtocolError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ProtocolError::InvalidSignature.is_per_message());
        assert!(ProtocolError::InvalidSignature.is_signature_error());
        assert!(ProtocolError::MissingDelimiter.is_per_message());
        assert!(!ProtocolError::MissingDelimiter.is_signature_error());
        assert!(!ProtocolError::UnsupportedScheme("md5".to_string()).is_per_message());
        assert!(!ProtocolError::InvalidKey("empty".to_string()).is_per_message());
    }
}
