//! Typed message envelopes and their encoded, on-the-wire form.
//!
//! `Message<T>` is what application code builds and reads. `EncodedMessage`
//! is what actually crosses a channel: a format tag, the serialized bytes,
//! and the same metadata duplicated alongside so a receiver can inspect
//! `content_type` / `correlation_id` without first decoding the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::CodecError;

/// Wire-level content type tag, carried in `Metadata` and mirrored by
/// `EncodedFormat`. JSON is mandatory; Binary is optional and only used
/// when both peers have advertised support for it (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodedFormat {
    Json,
    Binary,
}

/// Metadata attached to every envelope, inline in both `Message<T>` and
/// `EncodedMessage` so the receiver can correlate and dispatch without
/// deserializing the payload first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub content_type: EncodedFormat,
}

impl Metadata {
    /// A fresh, uncorrelated metadata block with a new random `id`.
    pub fn new(content_type: EncodedFormat) -> Self {
        Metadata {
            id: Uuid::new_v4(),
            correlation_id: None,
            created_at: Utc::now(),
            content_type,
        }
    }

    /// A metadata block correlated to a prior request's id.
    pub fn correlated(content_type: EncodedFormat, correlation_id: Uuid) -> Self {
        Metadata {
            id: Uuid::new_v4(),
            correlation_id: Some(correlation_id),
            created_at: Utc::now(),
            content_type,
        }
    }
}

/// A typed application-level message: metadata plus a strongly-typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<T> {
    pub metadata: Metadata,
    pub payload: T,
}

impl<T> Message<T> {
    /// Wrap a payload with fresh, uncorrelated metadata.
    pub fn new(payload: T, content_type: EncodedFormat) -> Self {
        Message {
            metadata: Metadata::new(content_type),
            payload,
        }
    }

    /// Wrap a payload with metadata correlated to a prior request id.
    pub fn reply_to(payload: T, content_type: EncodedFormat, correlation_id: Uuid) -> Self {
        Message {
            metadata: Metadata::correlated(content_type, correlation_id),
            payload,
        }
    }
}

impl<T: Serialize> Message<T> {
    /// Encode this message into its wire form.
    pub fn encode(&self) -> Result<EncodedMessage, CodecError> {
        encode_payload(&self.payload, self.metadata.clone())
    }
}

/// The on-the-wire form of a `Message<T>`: a format tag, the serialized
/// bytes of the payload, and metadata duplicated inline (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedMessage {
    pub format: EncodedFormat,
    #[serde(with = "bytes_as_base64_or_vec")]
    pub bytes: Vec<u8>,
    pub metadata: Metadata,
}

/// Serialize a typed payload into an `EncodedMessage` using `format`,
/// attaching fresh metadata (component C1 `encode`).
pub fn encode<T: Serialize>(payload: &T, format: EncodedFormat) -> Result<EncodedMessage, CodecError> {
    encode_payload(payload, Metadata::new(format))
}

/// Serialize a typed payload into an `EncodedMessage`, reusing the given
/// metadata (used when replying with a correlated message).
pub fn encode_payload<T: Serialize>(
    payload: &T,
    mut metadata: Metadata,
) -> Result<EncodedMessage, CodecError> {
    let format = metadata.content_type;
    let bytes = match format {
        EncodedFormat::Json => serde_json::to_vec(payload).map_err(|e| CodecError::Serialize {
            format: "json",
            source: Box::new(e),
        })?,
        EncodedFormat::Binary => {
            bincode::serialize(payload).map_err(|e| CodecError::Serialize {
                format: "binary",
                source: e,
            })?
        }
    };
    metadata.content_type = format;
    Ok(EncodedMessage {
        format,
        bytes,
        metadata,
    })
}

/// Decode an `EncodedMessage` into a typed `Message<T>` (component C1 `decode`).
///
/// Fails with `CodecError::FormatMismatch` if `encoded.format` disagrees
/// with `encoded.metadata.content_type` — the two must always agree,
/// since both are set together by `encode`. A receiver that locally
/// prefers one format must still be able to decode the other: JSON
/// decoding is mandatory regardless of local preference (spec.md §4.1).
pub fn decode<T: DeserializeOwned>(encoded: &EncodedMessage) -> Result<Message<T>, CodecError> {
    if encoded.format != encoded.metadata.content_type {
        return Err(CodecError::FormatMismatch {
            expected: encoded.metadata.content_type,
            found: encoded.format,
        });
    }
    let payload = match encoded.format {
        EncodedFormat::Json => {
            serde_json::from_slice(&encoded.bytes).map_err(|e| CodecError::Deserialize {
                format: "json",
                source: Box::new(e),
            })?
        }
        EncodedFormat::Binary => {
            bincode::deserialize(&encoded.bytes).map_err(|e| CodecError::Deserialize {
                format: "binary",
                source: e,
            })?
        }
    };
    Ok(Message {
        metadata: encoded.metadata.clone(),
        payload,
    })
}

/// `EncodedMessage::bytes` serializes as a JSON array of numbers by default
/// under serde_json, which is correct but wasteful; when the outer format
/// is JSON we still want `bytes` itself to be plain array-of-u8 (matches
/// what `serde_json::Value` produces for `Vec<u8>`, keeping the wire shape
/// a reader would expect from `{"bytes": [1,2,3]}`). No base64 needed since
/// `EncodedMessage` itself is only ever carried inside a binary-prefixed
/// frame (see `frame.rs`), never hand-typed by an operator.
mod bytes_as_base64_or_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(bytes.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn json_round_trip() {
        let encoded = encode(&Ping { n: 7 }, EncodedFormat::Json).unwrap();
        let decoded: Message<Ping> = decode(&encoded).unwrap();
        assert_eq!(decoded.payload, Ping { n: 7 });
        assert_eq!(decoded.metadata.content_type, EncodedFormat::Json);
    }

    #[test]
    fn binary_round_trip() {
        let encoded = encode(&Ping { n: 9 }, EncodedFormat::Binary).unwrap();
        let decoded: Message<Ping> = decode(&encoded).unwrap();
        assert_eq!(decoded.payload, Ping { n: 9 });
    }

    #[test]
    fn format_metadata_mismatch_is_rejected() {
        let mut encoded = encode(&Ping { n: 1 }, EncodedFormat::Json).unwrap();
        encoded.metadata.content_type = EncodedFormat::Binary;
        let result: Result<Message<Ping>, _> = decode(&encoded);
        assert!(matches!(result, Err(CodecError::FormatMismatch { .. })));
    }

    #[test]
    fn malformed_json_bytes_fail_with_codec_error() {
        let mut encoded = encode(&Ping { n: 1 }, EncodedFormat::Json).unwrap();
        encoded.bytes = b"not json".to_vec();
        let result: Result<Message<Ping>, _> = decode(&encoded);
        assert!(matches!(result, Err(CodecError::Deserialize { .. })));
    }

    #[test]
    fn correlated_message_carries_correlation_id() {
        let req_id = Uuid::new_v4();
        let msg = Message::reply_to(Ping { n: 1 }, EncodedFormat::Json, req_id);
        assert_eq!(msg.metadata.correlation_id, Some(req_id));
    }
}
