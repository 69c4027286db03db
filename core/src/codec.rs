//! Codec registry keyed by content type.
//!
//! # Design
//! The wire formats themselves belong to their crates (`serde_json`,
//! `quick-xml`, `serde_urlencoded`, `bson`, `rmp-serde`). This module only
//! picks the right one for a `ContentType` and folds every crate's error
//! into `CodecError`. The set of content types is closed, so dispatch is a
//! `match` rather than a lookup table.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{Charset, ContentType};

/// Failure while turning a value into bytes or back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {content_type} body: {message}")]
    Encode {
        content_type: ContentType,
        message: String,
    },

    #[error("failed to decode {content_type} body: {message}")]
    Decode {
        content_type: ContentType,
        message: String,
    },

    #[error("body is not valid {charset} text: {message}")]
    Charset { charset: Charset, message: String },
}

/// Stateless encoder/decoder for every supported content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecRegistry;

impl CodecRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn encode<T: Serialize>(
        &self,
        content_type: ContentType,
        value: &T,
    ) -> Result<Vec<u8>, CodecError> {
        let encoded = match content_type {
            ContentType::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            ContentType::Xml => quick_xml::se::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
            ContentType::Form => serde_urlencoded::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
            ContentType::Bson => bson::to_vec(value).map_err(|e| e.to_string()),
            ContentType::MsgPack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
        };
        encoded.map_err(|message| CodecError::Encode {
            content_type,
            message,
        })
    }

    pub fn decode<T: DeserializeOwned>(
        &self,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<T, CodecError> {
        let decoded = match content_type {
            ContentType::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            ContentType::Xml => std::str::from_utf8(bytes)
                .map_err(|e| e.to_string())
                .and_then(|text| quick_xml::de::from_str(text).map_err(|e| e.to_string())),
            ContentType::Form => serde_urlencoded::from_bytes(bytes).map_err(|e| e.to_string()),
            ContentType::Bson => bson::from_slice(bytes).map_err(|e| e.to_string()),
            ContentType::MsgPack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        };
        decoded.map_err(|message| CodecError::Decode {
            content_type,
            message,
        })
    }

    /// Decode using the codec named by a response's `Content-Type`, falling
    /// back to `fallback` when the header is missing or unrecognised.
    pub fn decode_negotiated<T: DeserializeOwned>(
        &self,
        header: Option<&str>,
        fallback: ContentType,
        bytes: &[u8],
    ) -> Result<T, CodecError> {
        let content_type = header
            .and_then(ContentType::from_media_type)
            .unwrap_or(fallback);
        self.decode(content_type, bytes)
    }
}
