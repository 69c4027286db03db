//! HTTP RPC client core.
//!
//! # Overview
//! Turns a method call (verb, relative path, optional payload, optional
//! query parameters, optional timeout) into an HTTP exchange against a
//! configured base address and hands back a typed result. Bodies are
//! encoded and decoded through a content-type keyed codec registry; text
//! and raw bytes bypass it.
//!
//! # Design
//! - `Pipeline` owns the whole invocation lifecycle: URL building, payload
//!   hooks, encoding, dispatch through a `Transport`, status handling,
//!   decoding, and the error path with its interceptors and substitutes.
//! - Transports only move bytes. `UreqTransport` backs the blocking surface,
//!   `ReqwestTransport` the async one; tests swap in their own.
//! - A typed absence is `Ok(None)`. It is returned when an error
//!   interceptor swallowed a fault and no substitute of the right type was
//!   produced, and for structured results of an empty success body.
//! - Hooks can be registered and removed while calls are in flight; each
//!   invocation works on a snapshot taken when the stage runs.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod hooks;
pub mod http;
pub mod payload;
pub mod pipeline;
pub mod query;
pub mod transport;

pub use client::{ClientBuilder, RpcHttpClient};
pub use codec::{CodecError, CodecRegistry};
pub use config::{Charset, ClientConfig, Compression, ContentType, DEFAULT_TIMEOUT_MS};
pub use error::{RpcError, TransportError};
pub use hooks::{HookId, Hooks, InvocationContext};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestBody};
pub use payload::{FromResponse, Payload, Shape, Structured};
pub use pipeline::{InvocationRequest, Pipeline};
pub use query::QueryParams;
pub use transport::{AsyncTransport, ReqwestTransport, Transport, UreqTransport};
