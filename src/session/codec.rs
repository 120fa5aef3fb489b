//! Compact string form of game state: JSON text squeezed with LZ-string's UTF-16 variant.
//!
//! The output only uses code points in `0x20..0x8020`, so it can be stored verbatim in a
//! Redis hash field or shipped inside a JSON string.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("state blob is empty")]
    Empty,

    #[error("state blob could not be decompressed")]
    Decompress,

    #[error("state blob is not valid UTF-16 text")]
    Utf16(#[from] std::string::FromUtf16Error),

    #[error("state blob does not hold valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode(state: &Value) -> Result<String, CodecError> {
    let text = serde_json::to_string(state)?;
    Ok(lz_str::compress_to_utf16(text.as_str()))
}

pub fn decode(blob: &str) -> Result<Value, CodecError> {
    if blob.is_empty() {
        return Err(CodecError::Empty);
    }
    let wide = lz_str::decompress_from_utf16(blob).ok_or(CodecError::Decompress)?;
    let text = String::from_utf16(&wide)?;
    Ok(serde_json::from_str(&text)?)
}
