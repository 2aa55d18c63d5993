//! Payload encodings for hub messages

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// An error encoding or decoding a payload
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be encoded
    #[error("unable to encode payload")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// The payload could not be decoded
    #[error("unable to decode payload")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Converts values to and from the binary payloads carried by the transport
pub trait HubCodec: Send + Sync {
    /// Encodes a value
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes a value
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// MessagePack encoding, with struct fields written as maps
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackCodec;

impl HubCodec for MessagePackCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(payload).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

/// JSON encoding
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl HubCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
