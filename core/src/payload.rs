//! Payload and result shapes.
//!
//! # Design
//! How a body is produced or consumed depends on the declared shape of the
//! value, not on the configured content type:
//!
//! | Shape | Outgoing (`Payload`) | Incoming (`FromResponse`) |
//! |-------|----------------------|---------------------------|
//! | Text | encoded with the configured charset | `String`, decoded with the charset |
//! | Raw | bytes sent untouched | `Vec<u8>`, body untouched |
//! | Structured | codec registry | `Structured<T>`, codec registry |
//!
//! Structured payloads are type-erased behind `StructuredPayload` so hooks
//! can inspect or replace them without knowing `T`.

use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{CodecError, CodecRegistry};
use crate::config::{Charset, ContentType};

/// Which of the three body shapes a value has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Text,
    Raw,
    Structured,
}

/// A serializable value whose concrete type has been erased.
pub trait StructuredPayload: fmt::Debug + Send + Sync {
    fn encode(&self, codecs: &CodecRegistry, content_type: ContentType) -> Result<Vec<u8>, CodecError>;

    fn as_any(&self) -> &dyn Any;
}

impl<T> StructuredPayload for T
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn encode(&self, codecs: &CodecRegistry, content_type: ContentType) -> Result<Vec<u8>, CodecError> {
        codecs.encode(content_type, self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An outgoing request payload.
#[derive(Debug)]
pub enum Payload {
    Text(String),
    Raw(Vec<u8>),
    Structured(Box<dyn StructuredPayload>),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(text.into())
    }

    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Payload::Raw(bytes.into())
    }

    pub fn structured<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Payload::Structured(Box::new(value))
    }

    pub fn shape(&self) -> Shape {
        match self {
            Payload::Text(_) => Shape::Text,
            Payload::Raw(_) => Shape::Raw,
            Payload::Structured(_) => Shape::Structured,
        }
    }

    /// Borrow a structured payload as its concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Payload::Structured(value) => (**value).as_any().downcast_ref(),
            _ => None,
        }
    }

    pub(crate) fn encode(
        &self,
        codecs: &CodecRegistry,
        content_type: ContentType,
        charset: Charset,
    ) -> Result<Vec<u8>, CodecError> {
        match self {
            Payload::Text(text) => Ok(charset.encode(text)),
            Payload::Raw(bytes) => Ok(bytes.clone()),
            Payload::Structured(value) => (**value).encode(codecs, content_type),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Raw(bytes.to_vec())
    }
}

impl<T> From<Structured<T>> for Payload
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn from(value: Structured<T>) -> Self {
        Payload::structured(value.0)
    }
}

/// Marks a value as going through the codec registry.
///
/// Used both for payloads (`T: Serialize`) and for expected results
/// (`T: DeserializeOwned`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Structured<T>(pub T);

impl<T> Structured<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Structured<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Structured<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Everything a result type needs to decode a successful response body.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder<'a> {
    pub codecs: &'a CodecRegistry,
    pub content_type: ContentType,
    pub charset: Charset,
    /// The response's own `Content-Type`, if any.
    pub response_content_type: Option<&'a str>,
}

/// A type that can be produced from a successful response body.
pub trait FromResponse: Sized + Send + 'static {
    const SHAPE: Shape;

    fn from_response(body: &[u8], decoder: &ResponseDecoder<'_>) -> Result<Self, CodecError>;
}

impl FromResponse for String {
    const SHAPE: Shape = Shape::Text;

    fn from_response(body: &[u8], decoder: &ResponseDecoder<'_>) -> Result<Self, CodecError> {
        decoder
            .charset
            .decode(body.to_vec())
            .map_err(|message| CodecError::Charset {
                charset: decoder.charset,
                message,
            })
    }
}

impl FromResponse for Vec<u8> {
    const SHAPE: Shape = Shape::Raw;

    fn from_response(body: &[u8], _decoder: &ResponseDecoder<'_>) -> Result<Self, CodecError> {
        Ok(body.to_vec())
    }
}

impl<T> FromResponse for Structured<T>
where
    T: DeserializeOwned + Send + 'static,
{
    const SHAPE: Shape = Shape::Structured;

    fn from_response(body: &[u8], decoder: &ResponseDecoder<'_>) -> Result<Self, CodecError> {
        decoder
            .codecs
            .decode_negotiated(decoder.response_content_type, decoder.content_type, body)
            .map(Structured)
    }
}
