//! The invocation pipeline every verb funnels through.
//!
//! # Design
//! An invocation is split into two halves around the transport call, the
//! same build/parse split the rest of the crate uses:
//!
//! - `prepare` resolves the timeout, assembles the URL, runs the payload
//!   hooks, encodes the body and runs the request hooks.
//! - `complete` takes the transport outcome, decodes a successful response,
//!   or runs the failure path (interceptors, substitute result, translation).
//!
//! The blocking and async entry points differ only in how they wait on the
//! transport; that wait is the single point where an invocation blocks or
//! suspends. Each attempt gets its own deadline and there is no retry.
//!
//! Failures while preparing (bad URL, encoding error) happen before the
//! request exists and are returned directly, without the error hooks.
//!
//! The request and the response are owned by the invocation and dropped
//! when `complete` returns, whichever branch it takes.

use std::any::Any;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, debug_span, warn, Instrument};

use crate::codec::CodecRegistry;
use crate::config::ClientConfig;
use crate::error::{translate, RpcError, TransportError};
use crate::hooks::{Hooks, InvocationContext};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestBody};
use crate::payload::{FromResponse, Payload, ResponseDecoder, Shape};
use crate::query::{self, QueryParams};
use crate::transport::{AsyncTransport, Transport};

/// One call's worth of input.
#[derive(Debug, Default)]
pub struct InvocationRequest {
    pub path: String,
    pub method: HttpMethod,
    pub payload: Option<Payload>,
    pub query: Option<QueryParams>,
    /// Per-call timeout in milliseconds; absent or non-positive uses the default.
    pub timeout_ms: Option<i64>,
}

impl InvocationRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(QueryParams::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn query_params(mut self, params: Option<QueryParams>) -> Self {
        self.query = params;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: Option<i64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A request ready for dispatch plus the state that travels with it.
#[derive(Debug)]
pub struct Prepared {
    pub request: HttpRequest,
    pub ctx: InvocationContext,
    pub timeout: Duration,
}

/// Configuration, codecs and hooks shared by every invocation of a client.
#[derive(Debug)]
pub struct Pipeline {
    config: ClientConfig,
    codecs: CodecRegistry,
    hooks: Hooks,
}

impl Pipeline {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: config.normalized(),
            codecs: CodecRegistry::new(),
            hooks: Hooks::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Blocking invocation.
    pub fn invoke<R: FromResponse>(
        &self,
        transport: &dyn Transport,
        call: InvocationRequest,
    ) -> Result<Option<R>, RpcError> {
        let span = debug_span!("invoke", method = %call.method, path = %call.path);
        let _entered = span.enter();

        let mut prepared = self.prepare(call)?;
        prepared.ctx.send_start = Some(Utc::now());
        debug!(
            url = %prepared.request.url,
            timeout_ms = prepared.timeout.as_millis() as u64,
            "dispatching"
        );
        let outcome = transport.send(&prepared.request, prepared.timeout);
        self.complete(prepared, outcome)
    }

    /// Async invocation. Suspends only while the transport is in flight.
    pub async fn invoke_async<R: FromResponse>(
        &self,
        transport: &dyn AsyncTransport,
        call: InvocationRequest,
    ) -> Result<Option<R>, RpcError> {
        let span = debug_span!("invoke", method = %call.method, path = %call.path);
        async move {
            let mut prepared = self.prepare(call)?;
            prepared.ctx.send_start = Some(Utc::now());
            debug!(
                url = %prepared.request.url,
                timeout_ms = prepared.timeout.as_millis() as u64,
                "dispatching"
            );
            let dispatch = transport.send(&prepared.request, prepared.timeout);
            let outcome = match tokio::time::timeout(prepared.timeout, dispatch).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(TransportError::Cancelled),
            };
            self.complete(prepared, outcome)
        }
        .instrument(span)
        .await
    }

    /// Everything up to, but not including, the transport call.
    pub fn prepare(&self, call: InvocationRequest) -> Result<Prepared, RpcError> {
        let timeout = self.config.resolve_timeout(call.timeout_ms);
        let url = self.build_url(&call.path, call.query)?;

        let mut payload = call.payload;
        self.hooks.apply_payload(&mut payload);

        let content_type = self.config.content_type;
        let body = match &payload {
            Some(p) if call.method.carries_body() => Some(RequestBody {
                content_type: content_type.media_type().to_string(),
                bytes: p.encode(&self.codecs, content_type, self.config.charset)?,
            }),
            _ => None,
        };

        let mut headers = vec![("Accept".to_string(), content_type.media_type().to_string())];
        if let Some(encoding) = self.config.accept_encoding() {
            headers.push(("Accept-Encoding".to_string(), encoding));
        }
        headers.extend(self.config.default_headers.iter().cloned());

        let request = HttpRequest {
            method: call.method,
            url,
            headers,
            body,
        };
        let ctx = InvocationContext::new(payload);
        self.hooks.notify_request(&request, &ctx);

        Ok(Prepared {
            request,
            ctx,
            timeout,
        })
    }

    /// Turn the transport outcome into the caller's result.
    pub fn complete<R: FromResponse>(
        &self,
        prepared: Prepared,
        outcome: Result<HttpResponse, TransportError>,
    ) -> Result<Option<R>, RpcError> {
        let Prepared {
            request,
            mut ctx,
            timeout,
        } = prepared;

        let result = match outcome {
            Ok(response) => {
                ctx.receive_end = Some(Utc::now());
                debug!(status = response.status, bytes = response.body.len(), "response received");
                self.accept(response, &mut ctx)
            }
            Err(fault) => Err(RpcError::Transport(fault)),
        };

        match result {
            Ok(value) => Ok(value),
            Err(err) => self.fail(err, &request, ctx, timeout),
        }
    }

    fn build_url(&self, path: &str, params: Option<QueryParams>) -> Result<String, RpcError> {
        let mut params = params.unwrap_or_default();
        query::merge_missing(&mut params, self.hooks.default_query());
        let joined = query::join_url(self.config.base_url.as_deref(), path);
        let url = query::append_query(&joined, &params);

        // Parsing escapes characters that cannot appear in a URL (spaces,
        // quotes) and leaves existing `%XX` sequences alone.
        match url::Url::parse(&url) {
            Ok(parsed) => Ok(parsed.into()),
            Err(e) => Err(RpcError::InvalidUrl {
                url,
                reason: e.to_string(),
            }),
        }
    }

    fn accept<R: FromResponse>(
        &self,
        response: HttpResponse,
        ctx: &mut InvocationContext,
    ) -> Result<Option<R>, RpcError> {
        if !response.is_success() {
            return Err(RpcError::from_status(&response));
        }

        let decoder = ResponseDecoder {
            codecs: &self.codecs,
            content_type: self.config.content_type,
            charset: self.config.charset,
            response_content_type: response.header("content-type"),
        };
        // An empty success body (204, empty 200) has no structured value.
        let value = if R::SHAPE == Shape::Structured && response.body.is_empty() {
            None
        } else {
            Some(R::from_response(&response.body, &decoder)?)
        };

        ctx.response_size = response.content_length().unwrap_or(0);
        ctx.response_model = value.map(|value| Box::new(value) as Box<dyn Any + Send>);
        self.hooks.notify_response(&response, ctx);

        Ok(ctx
            .response_model
            .take()
            .and_then(|model| model.downcast::<R>().ok())
            .map(|value| *value))
    }

    fn fail<R: FromResponse>(
        &self,
        err: RpcError,
        request: &HttpRequest,
        mut ctx: InvocationContext,
        timeout: Duration,
    ) -> Result<Option<R>, RpcError> {
        ctx.exception_time = Some(Utc::now());
        self.hooks.intercept_error(&err, request, &mut ctx);

        if !ctx.exception_handled {
            let err = translate(err, timeout);
            warn!(url = %request.url, error = %err, "invocation failed");
            return Err(err);
        }

        debug!(url = %request.url, error = %err, "fault handled by hook");
        match self.hooks.substitute(&err, &ctx) {
            Some(Some(value)) => Ok(value.downcast::<R>().ok().map(|value| *value)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentType;
    use crate::payload::Structured;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    /// Records the last request and answers with a canned outcome.
    struct Canned {
        seen: Mutex<Option<HttpRequest>>,
        reply: fn() -> Result<HttpResponse, TransportError>,
    }

    impl Canned {
        fn new(reply: fn() -> Result<HttpResponse, TransportError>) -> Self {
            Self {
                seen: Mutex::new(None),
                reply,
            }
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().clone().expect("no request sent")
        }
    }

    impl Transport for Canned {
        fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<HttpResponse, TransportError> {
            *self.seen.lock() = Some(request.clone());
            (self.reply)()
        }
    }

    fn ok_json() -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            reason: "OK".into(),
            headers: vec![
                ("content-type".into(), "application/json".into()),
                ("content-length".into(), "15".into()),
            ],
            body: br#"{"name":"echo"}"#.to_vec(),
        })
    }

    fn not_found() -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 404,
            reason: "Not Found".into(),
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(ClientConfig::new("http://localhost:9002/"))
    }

    #[test]
    fn prepare_resolves_default_timeout() {
        let p = Pipeline::new(ClientConfig {
            timeout_ms: 1_500,
            ..ClientConfig::new("http://h/")
        });
        for timeout in [None, Some(0), Some(-3)] {
            let prepared = p
                .prepare(InvocationRequest::new("x").timeout_ms(timeout))
                .unwrap();
            assert_eq!(prepared.timeout, Duration::from_millis(1_500));
        }
        let prepared = p.prepare(InvocationRequest::new("x").timeout_ms(Some(20))).unwrap();
        assert_eq!(prepared.timeout, Duration::from_millis(20));
    }

    #[test]
    fn get_never_carries_a_body() {
        let prepared = pipeline()
            .prepare(
                InvocationRequest::new("api/values")
                    .method(HttpMethod::Get)
                    .payload("ignored"),
            )
            .unwrap();
        assert!(prepared.request.body.is_none());
        assert!(prepared.ctx.request_payload.is_some());
    }

    #[test]
    fn text_payload_uses_configured_content_type() {
        let p = Pipeline::new(ClientConfig {
            content_type: ContentType::Xml,
            ..ClientConfig::new("http://h/")
        });
        let prepared = p.prepare(InvocationRequest::new("x").payload("plain words")).unwrap();
        let body = prepared.request.body.unwrap();
        assert_eq!(body.content_type, "application/xml");
        assert_eq!(body.bytes, b"plain words");
    }

    #[test]
    fn structured_payload_uses_codec() {
        let prepared = pipeline()
            .prepare(
                InvocationRequest::new("x")
                    .method(HttpMethod::Put)
                    .payload(Structured(User { name: "n".into() })),
            )
            .unwrap();
        assert_eq!(prepared.request.body.unwrap().bytes, br#"{"name":"n"}"#);
    }

    #[test]
    fn payload_hook_runs_before_encoding() {
        let p = pipeline();
        p.hooks().on_request_payload(|payload| {
            *payload = Some(Payload::structured(User { name: "swapped".into() }));
        });
        let prepared = p.prepare(InvocationRequest::new("x").payload("original")).unwrap();
        assert_eq!(prepared.request.body.unwrap().bytes, br#"{"name":"swapped"}"#);
        let sent = prepared.ctx.request_payload.unwrap();
        assert_eq!(sent.downcast_ref::<User>().map(|u| u.name.as_str()), Some("swapped"));
    }

    #[test]
    fn payload_hook_may_drop_the_body() {
        let p = pipeline();
        p.hooks().on_request_payload(|payload| *payload = None);
        let prepared = p.prepare(InvocationRequest::new("x").payload("gone")).unwrap();
        assert!(prepared.request.body.is_none());
    }

    #[test]
    fn request_hook_sees_assembled_request() {
        let p = pipeline();
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        p.hooks().on_request(move |request, ctx| {
            assert!(ctx.request_payload.is_some());
            *sink.lock() = request.url.clone();
        });
        p.prepare(InvocationRequest::new("api/values").query("a", "1").payload("p"))
            .unwrap();
        assert_eq!(*seen.lock(), "http://localhost:9002/api/values?a=1");
    }

    #[test]
    fn accept_and_encoding_headers_are_attached() {
        let p = Pipeline::new(ClientConfig {
            decompression: vec![crate::config::Compression::Deflate],
            default_headers: vec![("X-Trace".into(), "t-1".into())],
            ..ClientConfig::new("http://h/")
        });
        let request = p.prepare(InvocationRequest::new("x")).unwrap().request;
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("accept-encoding"), Some("deflate"));
        assert_eq!(request.header("x-trace"), Some("t-1"));
    }

    #[test]
    fn invalid_url_fails_before_dispatch() {
        let p = Pipeline::new(ClientConfig::default());
        let err = p.prepare(InvocationRequest::new("relative/path")).unwrap_err();
        assert!(matches!(err, RpcError::InvalidUrl { .. }));
    }

    #[test]
    fn success_records_size_and_decodes() {
        let p = pipeline();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        p.hooks().on_response(move |_, ctx| {
            let name = ctx.response_as::<Structured<User>>().map(|u| u.name.clone());
            *sink.lock() = Some((name, ctx.response_size, ctx.elapsed().is_some()));
        });

        let transport = Canned::new(ok_json);
        let user: Option<Structured<User>> = p
            .invoke(&transport, InvocationRequest::new("api/user").method(HttpMethod::Get))
            .unwrap();
        assert_eq!(user.unwrap().name, "echo");
        assert_eq!(*observed.lock(), Some((Some("echo".to_string()), 15, true)));
        assert_eq!(transport.last().method, HttpMethod::Get);
    }

    fn no_content() -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 204,
            reason: "No Content".into(),
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    #[test]
    fn empty_success_body_is_absent_for_structured_results() {
        let p = pipeline();
        let errors = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&errors);
        p.hooks().on_error(move |_, _, _| *sink.lock() += 1);
        let responses = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&responses);
        p.hooks().on_response(move |response, ctx| {
            assert_eq!(response.status, 204);
            assert!(ctx.response_model.is_none());
            *sink.lock() += 1;
        });

        let transport = Canned::new(no_content);
        let user: Option<Structured<User>> = p
            .invoke(&transport, InvocationRequest::new("api/user").method(HttpMethod::Delete))
            .unwrap();
        assert!(user.is_none());

        let text: Option<String> = p
            .invoke(&transport, InvocationRequest::new("api/user").method(HttpMethod::Delete))
            .unwrap();
        assert_eq!(text.as_deref(), Some(""));
        assert_eq!(*errors.lock(), 0);
        assert_eq!(*responses.lock(), 2);
    }

    #[test]
    fn query_values_are_not_escaped_twice() {
        let prepared = pipeline()
            .prepare(
                InvocationRequest::new("api/values")
                    .method(HttpMethod::Get)
                    .query("path", "a%2Fb")
                    .query("q", "two words"),
            )
            .unwrap();
        assert_eq!(
            prepared.request.url,
            "http://localhost:9002/api/values?path=a%2Fb&q=two%20words"
        );
    }

    #[test]
    fn status_error_without_interceptor_is_raised() {
        let transport = Canned::new(not_found);
        let err = pipeline()
            .invoke::<String>(&transport, InvocationRequest::new("missing"))
            .unwrap_err();
        assert_eq!(err.to_string(), "ReasonPhrase:Not Found,StatusCode:404");
    }

    #[test]
    fn unhandled_interception_still_raises_translated_fault() {
        let p = pipeline();
        let raw = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&raw);
        p.hooks().on_error(move |err, _, ctx| {
            *sink.lock() = matches!(err, RpcError::Transport(TransportError::Cancelled));
            assert!(ctx.exception_time.is_some());
        });
        let transport = Canned::new(|| Err(TransportError::Cancelled));
        let err = p
            .invoke::<String>(&transport, InvocationRequest::new("slow").timeout_ms(Some(50)))
            .unwrap_err();
        assert!(*raw.lock(), "interceptor should see the raw cancellation");
        assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[test]
    fn handled_fault_returns_substitute() {
        let p = pipeline();
        p.hooks().on_error(|_, _, ctx| ctx.exception_handled = true);
        p.hooks().on_error_response(|err, _| {
            Some(Box::new(format!("fallback for {}", err.status().unwrap_or(0))) as Box<dyn std::any::Any + Send>)
        });
        let transport = Canned::new(not_found);
        let value: Option<String> = p.invoke(&transport, InvocationRequest::new("x")).unwrap();
        assert_eq!(value.as_deref(), Some("fallback for 404"));
    }

    #[test]
    fn handled_fault_without_provider_is_absent() {
        let p = pipeline();
        p.hooks().on_error(|_, _, ctx| ctx.exception_handled = true);
        let transport = Canned::new(|| Err(TransportError::Connect("refused".into())));
        let value: Option<Structured<User>> = p.invoke(&transport, InvocationRequest::new("x")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn substitute_of_wrong_type_is_absent() {
        let p = pipeline();
        p.hooks().on_error(|_, _, ctx| ctx.exception_handled = true);
        p.hooks()
            .on_error_response(|_, _| Some(Box::new(42u32) as Box<dyn std::any::Any + Send>));
        let transport = Canned::new(not_found);
        let value: Option<String> = p.invoke(&transport, InvocationRequest::new("x")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn decode_failure_goes_through_error_path() {
        let p = pipeline();
        let hit = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&hit);
        p.hooks().on_error(move |err, _, _| {
            *sink.lock() = matches!(err, RpcError::Codec(_));
        });
        let transport = Canned::new(|| {
            Ok(HttpResponse {
                status: 200,
                reason: "OK".into(),
                headers: Vec::new(),
                body: b"<not json>".to_vec(),
            })
        });
        let err = p
            .invoke::<Structured<User>>(&transport, InvocationRequest::new("x"))
            .unwrap_err();
        assert!(*hit.lock());
        assert!(matches!(err, RpcError::Codec(_)));
    }
}
