//! Client configuration.
//!
//! # Design
//! `ClientConfig` is plain data with `Default` and `Deserialize`, so a host
//! can either build it in code or load it from a JSON document. Once a
//! client is built the configuration is frozen; nothing in the pipeline
//! mutates it per call.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout used when none (or a non-positive one) is configured.
pub const DEFAULT_TIMEOUT_MS: i64 = 10_000;

/// Content-type identifiers understood by the codec registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Json,
    Xml,
    Form,
    Bson,
    #[serde(alias = "messagepack")]
    MsgPack,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Json,
        ContentType::Xml,
        ContentType::Form,
        ContentType::Bson,
        ContentType::MsgPack,
    ];

    /// The media type sent in `Content-Type` and `Accept`.
    pub fn media_type(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            ContentType::Form => "application/x-www-form-urlencoded",
            ContentType::Bson => "application/bson",
            ContentType::MsgPack => "application/x-msgpack",
        }
    }

    /// Map a `Content-Type` header value back to a codec.
    ///
    /// Parameters such as `charset` are ignored. Returns `None` for media
    /// types no codec handles.
    pub fn from_media_type(value: &str) -> Option<ContentType> {
        let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/json" | "text/json" => Some(ContentType::Json),
            "application/xml" | "text/xml" => Some(ContentType::Xml),
            "application/x-www-form-urlencoded" => Some(ContentType::Form),
            "application/bson" => Some(ContentType::Bson),
            "application/x-msgpack" | "application/msgpack" => Some(ContentType::MsgPack),
            other if other.ends_with("+json") => Some(ContentType::Json),
            other if other.ends_with("+xml") => Some(ContentType::Xml),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

impl FromStr for ContentType {
    type Err = String;

    /// Accepts either the short name (`json`, `msgpack`, ...) or a media type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ContentType::Json),
            "xml" => Ok(ContentType::Xml),
            "form" => Ok(ContentType::Form),
            "bson" => Ok(ContentType::Bson),
            "msgpack" | "messagepack" => Ok(ContentType::MsgPack),
            other => ContentType::from_media_type(other)
                .ok_or_else(|| format!("unknown content type: {s}")),
        }
    }
}

/// Compression algorithms a client may advertise in `Accept-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Deflate,
    Brotli,
}

impl Compression {
    pub fn token(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Deflate => "deflate",
            Compression::Brotli => "br",
        }
    }
}

/// Character encoding for text payloads and text results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    #[serde(alias = "iso-8859-1")]
    Latin1,
}

impl Charset {
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            // Code points above U+00FF have no Latin-1 byte.
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }

    pub fn decode(self, bytes: Vec<u8>) -> Result<String, String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes).map_err(|e| e.to_string()),
            Charset::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Charset::Utf8 => f.write_str("utf-8"),
            Charset::Latin1 => f.write_str("iso-8859-1"),
        }
    }
}

/// Settings fixed for the lifetime of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for every request path. When absent, paths must be absolute URLs.
    pub base_url: Option<String>,
    pub content_type: ContentType,
    /// Default per-call timeout in milliseconds. Non-positive means default.
    pub timeout_ms: i64,
    /// Empty means no decompression is advertised.
    pub decompression: Vec<Compression>,
    pub charset: Charset,
    /// Headers attached to every request.
    pub default_headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            content_type: ContentType::Json,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            decompression: Vec::new(),
            charset: Charset::Utf8,
            default_headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: Some(base_url.to_string()),
            ..Self::default()
        }
    }

    /// Replace a non-positive timeout with the default.
    pub fn normalized(mut self) -> Self {
        if self.timeout_ms <= 0 {
            self.timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        self
    }

    /// The configured timeout, always positive.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(positive_or_default(self.timeout_ms))
    }

    /// Pick the per-call override when it is positive, else the default.
    pub fn resolve_timeout(&self, timeout_override: Option<i64>) -> Duration {
        match timeout_override {
            Some(ms) if ms > 0 => Duration::from_millis(ms.unsigned_abs()),
            _ => self.default_timeout(),
        }
    }

    /// The `Accept-Encoding` value, or `None` when decompression is off.
    pub fn accept_encoding(&self) -> Option<String> {
        if self.decompression.is_empty() {
            return None;
        }
        let tokens: Vec<&str> = self.decompression.iter().map(|c| c.token()).collect();
        Some(tokens.join(", "))
    }
}

fn positive_or_default(ms: i64) -> u64 {
    if ms > 0 {
        ms.unsigned_abs()
    } else {
        DEFAULT_TIMEOUT_MS.unsigned_abs()
    }
}
