//! Multipart envelope framing
//!
//! ```text
//! identity* | <IDS|MSG> | signature | header | parent_header | metadata | content | buffer*
//! ```

use crate::error::{ProtocolError, ProtocolResult};
use crate::signing::Signer;
use bytes::Bytes;
use serde_json::Value;

/// Routing delimiter between identity frames and the signed payload
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

const EMPTY_OBJECT: &[u8] = b"{}";
const PAYLOAD_FRAMES: usize = 5;

pub type JsonObject = serde_json::Map<String, Value>;

/// Wire-level message. Parent header and metadata keep the distinction
/// between "absent" and "present"; both are sent as `{}` when absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMessage {
    pub identities: Vec<Bytes>,
    pub header: JsonObject,
    pub parent_header: Option<JsonObject>,
    pub metadata: Option<JsonObject>,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl RawMessage {
    pub fn msg_type(&self) -> Option<&str> {
        self.header.get("msg_type").and_then(Value::as_str)
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.header.get("msg_id").and_then(Value::as_str)
    }
}

/// Encodes and decodes envelopes, signing with the configured [`Signer`]
#[derive(Debug, Clone)]
pub struct WireCodec {
    signer: Signer,
}

impl WireCodec {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Serialize and sign `message` into its multipart frames
    pub fn encode(&self, message: &RawMessage) -> ProtocolResult<Vec<Bytes>> {
        let header = to_json("header", &message.header)?;
        let parent_header = optional_to_json("parent_header", message.parent_header.as_ref())?;
        let metadata = optional_to_json("metadata", message.metadata.as_ref())?;
        let content = to_json("content", &message.content)?;

        let signature = self
            .signer
            .sign([&header, &parent_header, &metadata, &content]);

        let capacity = message.identities.len() + PAYLOAD_FRAMES + 1 + message.buffers.len();
        let mut frames = Vec::with_capacity(capacity);
        frames.extend(message.identities.iter().cloned());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(Bytes::from(header));
        frames.push(Bytes::from(parent_header));
        frames.push(Bytes::from(metadata));
        frames.push(Bytes::from(content));
        frames.extend(message.buffers.iter().cloned());
        Ok(frames)
    }

    /// Split, verify and parse multipart frames. The signature is checked
    /// against the payload bytes exactly as received.
    pub fn decode(&self, mut frames: Vec<Bytes>) -> ProtocolResult<RawMessage> {
        let delimiter = frames
            .iter()
            .position(|frame| frame.as_ref() == DELIMITER)
            .ok_or(ProtocolError::MissingDelimiter)?;

        let payload = frames.split_off(delimiter + 1);
        frames.truncate(delimiter);
        let identities = frames;

        if payload.len() < PAYLOAD_FRAMES {
            return Err(ProtocolError::Truncated {
                expected: PAYLOAD_FRAMES,
                actual: payload.len(),
            });
        }

        let mut payload = payload.into_iter();
        let mut next = || payload.next().unwrap_or_default();
        let signature = next();
        let header = next();
        let parent_header = next();
        let metadata = next();
        let content = next();
        let buffers: Vec<Bytes> = payload.collect();

        if !self
            .signer
            .verify(&signature, [&header, &parent_header, &metadata, &content])
        {
            return Err(ProtocolError::InvalidSignature);
        }

        let header = parse_object("header", &header)?;
        let parent_header = parse_optional_object("parent_header", &parent_header)?;
        let metadata = parse_optional_object("metadata", &metadata)?;
        let content: Value = serde_json::from_slice(&content).map_err(|source| ProtocolError::Json {
            part: "content",
            source,
        })?;

        Ok(RawMessage {
            identities,
            header,
            parent_header,
            metadata,
            content,
            buffers,
        })
    }
}

fn to_json<T: serde::Serialize>(part: &'static str, value: &T) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| ProtocolError::Json { part, source })
}

fn optional_to_json(part: &'static str, value: Option<&JsonObject>) -> ProtocolResult<Vec<u8>> {
    match value {
        Some(object) => to_json(part, object),
        None => Ok(EMPTY_OBJECT.to_vec()),
    }
}

fn parse_object(part: &'static str, bytes: &[u8]) -> ProtocolResult<JsonObject> {
    match serde_json::from_slice(bytes).map_err(|source| ProtocolError::Json { part, source })? {
        Value::Object(object) => Ok(object),
        _ => Err(ProtocolError::NotAnObject { part }),
    }
}

fn parse_optional_object(part: &'static str, bytes: &[u8]) -> ProtocolResult<Option<JsonObject>> {
    let object = parse_object(part, bytes)?;
    Ok(if object.is_empty() { None } else { Some(object) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn sample() -> RawMessage {
        RawMessage {
            identities: vec![Bytes::from_static(b"client-1")],
            header: object(json!({
                "msg_id": "a1",
                "msg_type": "execute_request",
                "session": "s",
                "username": "u",
                "version": "5.3",
                "date": "2024-01-01T00:00:00Z"
            })),
            parent_header: None,
            metadata: None,
            content: json!({"code": "1 + 1", "silent": false}),
            buffers: vec![],
        }
    }

    #[test]
    fn test_encode_layout() {
        let codec = WireCodec::new(Signer::new("hmac-sha256", "key").unwrap());
        let frames = codec.encode(&sample()).unwrap();

        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0].as_ref(), b"client-1");
        assert_eq!(frames[1].as_ref(), DELIMITER);
        assert_eq!(frames[2].len(), 64);
        assert_eq!(frames[4].as_ref(), b"{}");
        assert_eq!(frames[5].as_ref(), b"{}");
    }

    #[test]
    fn test_round_trip_preserves_absent_and_buffers() {
        let codec = WireCodec::new(Signer::new("hmac-sha256", "key").unwrap());

        let plain = sample();
        assert_eq!(codec.decode(codec.encode(&plain).unwrap()).unwrap(), plain);

        let mut rich = sample();
        rich.identities.clear();
        rich.parent_header = Some(object(json!({"msg_id": "p", "msg_type": "x"})));
        rich.metadata = Some(object(json!({"deletedCells": []})));
        rich.content = json!({});
        rich.buffers = vec![Bytes::from_static(b"\x00\x01"), Bytes::from_static(b"")];
        assert_eq!(codec.decode(codec.encode(&rich).unwrap()).unwrap(), rich);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = WireCodec::new(Signer::new("hmac-sha256", "key").unwrap());
        let mut frames = codec.encode(&sample()).unwrap();
        frames[6] = Bytes::from_static(br#"{"code":"rm -rf /"}"#);

        let err = codec.decode(frames).unwrap_err();
        assert!(err.is_signature_error());
    }

    #[test]
    fn test_unsigned_peer_rejected_when_key_configured() {
        let unsigned = WireCodec::new(Signer::unsigned());
        let signed = WireCodec::new(Signer::new("hmac-sha256", "key").unwrap());

        let frames = unsigned.encode(&sample()).unwrap();
        assert!(signed.decode(frames.clone()).unwrap_err().is_signature_error());
        assert!(unsigned.decode(frames).is_ok());
    }

    #[test]
    fn test_framing_errors() {
        let codec = WireCodec::new(Signer::unsigned());

        let err = codec
            .decode(vec![Bytes::from_static(b"id"), Bytes::from_static(b"{}")])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingDelimiter));

        let err = codec
            .decode(vec![Bytes::from_static(DELIMITER), Bytes::new(), Bytes::from_static(b"{}")])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { expected: 5, actual: 2 }));

        let mut frames = codec.encode(&sample()).unwrap();
        frames[3] = Bytes::from_static(b"[1,2]");
        assert!(matches!(
            codec.decode(frames).unwrap_err(),
            ProtocolError::NotAnObject { part: "header" }
        ));
    }

    #[test]
    fn test_accessors() {
        let message = sample();
        assert_eq!(message.msg_type(), Some("execute_request"));
        assert_eq!(message.msg_id(), Some("a1"));
        assert_eq!(RawMessage::default().msg_type(), None);
    }
}
