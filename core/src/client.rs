//! Client facade: typed verb methods over the invocation pipeline.
//!
//! # Design
//! `RpcHttpClient` owns a `Pipeline` plus one blocking and one async
//! transport handle. Every verb is a fixed projection onto `invoke` or
//! `invoke_async`: GET and DELETE send no body, POST and PUT take a payload.
//! The client is `Send + Sync`; share it behind an `Arc` rather than
//! building one per call, so the transports' connection pools are reused.

use std::sync::Arc;

use tracing::debug;

use crate::config::{Charset, ClientConfig, Compression, ContentType};
use crate::error::RpcError;
use crate::hooks::Hooks;
use crate::http::HttpMethod;
use crate::payload::{FromResponse, Payload};
use crate::pipeline::{InvocationRequest, Pipeline};
use crate::query::QueryParams;
use crate::transport::{AsyncTransport, ReqwestTransport, Transport, UreqTransport};

/// Builds an `RpcHttpClient` from a configuration and optional transports.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    async_transport: Option<Arc<dyn AsyncTransport>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            async_transport: None,
        }
    }

    pub fn base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = Some(base_url.to_string());
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.config.content_type = content_type;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    pub fn decompression(mut self, algorithms: Vec<Compression>) -> Self {
        self.config.decompression = algorithms;
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.config.charset = charset;
        self
    }

    pub fn default_header(mut self, name: &str, value: &str) -> Self {
        self.config
            .default_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Use `transport` for blocking calls instead of the ureq default.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `transport` for async calls instead of the reqwest default.
    pub fn async_transport(mut self, transport: Arc<dyn AsyncTransport>) -> Self {
        self.async_transport = Some(transport);
        self
    }

    pub fn build(self) -> RpcHttpClient {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(UreqTransport::new()));
        let async_transport = self
            .async_transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        RpcHttpClient {
            pipeline: Pipeline::new(self.config),
            transport,
            async_transport,
        }
    }
}

/// HTTP RPC client with pluggable codecs and hooks.
pub struct RpcHttpClient {
    pipeline: Pipeline,
    transport: Arc<dyn Transport>,
    async_transport: Arc<dyn AsyncTransport>,
}

impl RpcHttpClient {
    /// Client with default settings rooted at `base_url`.
    pub fn new(base_url: &str) -> Self {
        ClientBuilder::new(ClientConfig::new(base_url)).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        self.pipeline.config()
    }

    /// Hook registrations. Safe to use while calls are in flight.
    pub fn hooks(&self) -> &Hooks {
        self.pipeline.hooks()
    }

    pub fn invoke<R: FromResponse>(&self, call: InvocationRequest) -> Result<Option<R>, RpcError> {
        self.pipeline.invoke(self.transport.as_ref(), call)
    }

    pub async fn invoke_async<R: FromResponse>(
        &self,
        call: InvocationRequest,
    ) -> Result<Option<R>, RpcError> {
        self.pipeline
            .invoke_async(self.async_transport.as_ref(), call)
            .await
    }

    pub fn get<R: FromResponse>(
        &self,
        path: &str,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke(call(path, HttpMethod::Get, None, query, timeout_ms))
    }

    pub async fn get_async<R: FromResponse>(
        &self,
        path: &str,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke_async(call(path, HttpMethod::Get, None, query, timeout_ms))
            .await
    }

    pub fn post<R: FromResponse>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke(call(path, HttpMethod::Post, Some(payload.into()), query, timeout_ms))
    }

    pub async fn post_async<R: FromResponse>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke_async(call(path, HttpMethod::Post, Some(payload.into()), query, timeout_ms))
            .await
    }

    /// POST a byte buffer.
    ///
    /// `offset` and `count` are accepted for interface symmetry but the whole
    /// buffer is always sent.
    pub fn post_bytes<R: FromResponse>(
        &self,
        path: &str,
        data: &[u8],
        offset: usize,
        count: usize,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        debug!(offset, count, len = data.len(), "post_bytes sends the full buffer");
        self.post(path, data, query, timeout_ms)
    }

    /// Async twin of `post_bytes`, with the same whole-buffer behaviour.
    pub async fn post_bytes_async<R: FromResponse>(
        &self,
        path: &str,
        data: &[u8],
        offset: usize,
        count: usize,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        debug!(offset, count, len = data.len(), "post_bytes sends the full buffer");
        self.post_async(path, data, query, timeout_ms).await
    }

    /// POST an ordered string map through the configured codec.
    pub fn post_form<R: FromResponse>(
        &self,
        path: &str,
        data: QueryParams,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.post(path, Payload::structured(data), query, timeout_ms)
    }

    pub async fn post_form_async<R: FromResponse>(
        &self,
        path: &str,
        data: QueryParams,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.post_async(path, Payload::structured(data), query, timeout_ms)
            .await
    }

    pub fn put<R: FromResponse>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke(call(path, HttpMethod::Put, Some(payload.into()), query, timeout_ms))
    }

    pub async fn put_async<R: FromResponse>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke_async(call(path, HttpMethod::Put, Some(payload.into()), query, timeout_ms))
            .await
    }

    /// PUT a string map through the configured codec.
    pub fn put_form<R: FromResponse>(
        &self,
        path: &str,
        data: QueryParams,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.put(path, Payload::structured(data), query, timeout_ms)
    }

    pub async fn put_form_async<R: FromResponse>(
        &self,
        path: &str,
        data: QueryParams,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.put_async(path, Payload::structured(data), query, timeout_ms)
            .await
    }

    pub fn delete<R: FromResponse>(
        &self,
        path: &str,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke(call(path, HttpMethod::Delete, None, query, timeout_ms))
    }

    pub async fn delete_async<R: FromResponse>(
        &self,
        path: &str,
        query: Option<QueryParams>,
        timeout_ms: Option<i64>,
    ) -> Result<Option<R>, RpcError> {
        self.invoke_async(call(path, HttpMethod::Delete, None, query, timeout_ms))
            .await
    }

    /// Release this client's transport handles.
    ///
    /// Consuming `self` makes a second release impossible; dropping the
    /// client without calling `close` releases them the same way.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for RpcHttpClient {
    fn drop(&mut self) {
        debug!(
            base_url = self.config().base_url.as_deref().unwrap_or(""),
            "releasing transports"
        );
    }
}

fn call(
    path: &str,
    method: HttpMethod,
    payload: Option<Payload>,
    query: Option<QueryParams>,
    timeout_ms: Option<i64>,
) -> InvocationRequest {
    InvocationRequest {
        path: path.to_string(),
        method,
        payload,
        query,
        timeout_ms,
    }
}
