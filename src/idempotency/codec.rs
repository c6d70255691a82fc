//! Text encoding of response bodies stored alongside idempotency records.

use serde::{de::DeserializeOwned, Serialize};

use super::error::CodecError;

pub fn encode_body<T: Serialize>(body: &T) -> Result<String, CodecError> {
    serde_json::to_string(body).map_err(CodecError::Encode)
}

pub fn decode_body<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Decode)
}
