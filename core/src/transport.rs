//! Transports: the only place bytes touch the network.
//!
//! # Design
//! The pipeline never performs I/O itself. It hands an `HttpRequest` and a
//! deadline to a transport and gets back an `HttpResponse` or a raw
//! `TransportError`. A deadline that elapses must surface as
//! `TransportError::Cancelled` so it can be told apart from other faults.
//!
//! Two defaults are provided, each wrapping one long-lived, pooled client
//! that is shared by every invocation and never reconfigured per call:
//! - `UreqTransport` for the blocking surface.
//! - `ReqwestTransport` for the async surface.
//!
//! Non-2xx statuses are returned as data; the pipeline decides what they mean.
//!
//! Both transports hand back decoded bodies. reqwest decodes gzip, deflate
//! and brotli itself; ureq decodes gzip and brotli, and `UreqTransport`
//! inflates `deflate` bodies with flate2.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Blocking request/response exchange bounded by `timeout`.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

/// Async request/response exchange bounded by `timeout`.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport over a shared `ureq::Agent`.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        // Status interpretation belongs to the pipeline.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
        builder = builder.header("content-type", body.content_type.as_str());
    }
    builder
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let deadline = Some(timeout);
        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), request)
                .config()
                .timeout_global(deadline)
                .build()
                .call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url), request)
                .config()
                .timeout_global(deadline)
                .build()
                .call(),
            HttpMethod::Post => {
                let builder = with_headers(self.agent.post(url), request)
                    .config()
                    .timeout_global(deadline)
                    .build();
                match &request.body {
                    Some(body) => builder.send(body.bytes.as_slice()),
                    None => builder.send_empty(),
                }
            }
            HttpMethod::Put => {
                let builder = with_headers(self.agent.put(url), request)
                    .config()
                    .timeout_global(deadline)
                    .build();
                match &request.body {
                    Some(body) => builder.send(body.bytes.as_slice()),
                    None => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(map_ureq_error)?;
        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let mut body = response.body_mut().read_to_vec().map_err(map_ureq_error)?;
        if is_deflated(&headers) {
            body = inflate(&body)?;
        }

        // ureq does not keep the status line's reason phrase.
        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

fn is_deflated(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-encoding") && v.trim().eq_ignore_ascii_case("deflate"))
}

/// HTTP `deflate` is zlib-wrapped; some servers send the raw stream instead.
fn inflate(bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();
    if flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    flate2::read::DeflateDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Cancelled,
        ureq::Error::Io(e) => TransportError::Io(e),
        ureq::Error::HostNotFound => TransportError::Connect("host not found".to_string()),
        ureq::Error::ConnectionFailed => TransportError::Connect("connection failed".to_string()),
        other => TransportError::Other(Box::new(other)),
    }
}

/// Async transport over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl AsyncTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method), request.url.as_str())
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, body.content_type.as_str())
                .body(body.bytes.clone());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        // hyper records the phrase only when it differs from the canonical one.
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|phrase| std::str::from_utf8(phrase.as_bytes()).ok())
            .or_else(|| status.canonical_reason())
            .unwrap_or_default()
            .to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason,
            headers,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Cancelled
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ureq_timeout_maps_to_cancellation() {
        let err = map_ureq_error(ureq::Error::Timeout(ureq::Timeout::Global));
        assert!(err.is_cancellation());
    }

    #[test]
    fn ureq_connection_failure_is_not_cancellation() {
        let err = map_ureq_error(ureq::Error::ConnectionFailed);
        assert!(matches!(err, TransportError::Connect(_)));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn deflate_bodies_are_inflated() {
        use flate2::write::{DeflateEncoder, ZlibEncoder};
        use flate2::Compression;
        use std::io::Write;

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"hello deflate").unwrap();
        assert_eq!(inflate(&zlib.finish().unwrap()).unwrap(), b"hello deflate");

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(b"raw stream").unwrap();
        assert_eq!(inflate(&raw.finish().unwrap()).unwrap(), b"raw stream");
    }

    #[test]
    fn only_deflate_encoding_is_inflated_here() {
        let headers = |v: &str| vec![("Content-Encoding".to_string(), v.to_string())];
        assert!(is_deflated(&headers("deflate")));
        assert!(is_deflated(&headers(" DEFLATE")));
        assert!(!is_deflated(&headers("gzip")));
        assert!(!is_deflated(&[]));
    }

    #[test]
    fn unreachable_host_is_a_connect_fault() {
        // Port 9 on loopback is the discard service; nothing listens there in CI.
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:9/".to_string(),
            headers: Vec::new(),
            body: None,
        };
        let err = UreqTransport::new()
            .send(&request, Duration::from_secs(2))
            .unwrap_err();
        assert!(!err.is_cancellation(), "{err}");
    }
}
