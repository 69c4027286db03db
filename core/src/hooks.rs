//! Hook registrations and the per-invocation context.
//!
//! # Design
//! Each hook kind is an ordered list of callbacks invoked in registration
//! order. Lists live behind `parking_lot::RwLock`s; the pipeline clones a
//! snapshot of `Arc`s before calling out, so a hook that registers or
//! removes hooks while running cannot deadlock and in-flight invocations
//! never observe a half-updated list.
//!
//! `InvocationContext` is created once per invocation and handed to hooks
//! by reference. Mutations made by one stage (payload override, handled
//! flag) are seen by every later stage of the same invocation.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::RpcError;
use crate::http::{HttpRequest, HttpResponse};
use crate::payload::Payload;
use crate::query::QueryParams;

/// Rewrites the outgoing payload before it is encoded.
pub type PayloadHook = dyn Fn(&mut Option<Payload>) + Send + Sync;
/// Observes the assembled request.
pub type RequestHook = dyn Fn(&HttpRequest, &InvocationContext) + Send + Sync;
/// Observes a successful response after decoding.
pub type ResponseHook = dyn Fn(&HttpResponse, &InvocationContext) + Send + Sync;
/// Sees every fault; may set `exception_handled`.
pub type ErrorHook = dyn Fn(&RpcError, &HttpRequest, &mut InvocationContext) + Send + Sync;
/// Supplies the value returned for a handled fault.
pub type SubstituteHook = dyn Fn(&RpcError, &InvocationContext) -> Option<Box<dyn Any + Send>> + Send + Sync;
/// Contributes default query parameters.
pub type DefaultQueryHook = dyn Fn(&mut QueryParams) + Send + Sync;

/// Handle returned by every registration, used to remove the hook again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Mutable state for one invocation.
#[derive(Default)]
pub struct InvocationContext {
    /// The payload as sent, after the payload hooks ran.
    pub request_payload: Option<Payload>,
    pub send_start: Option<DateTime<Utc>>,
    pub receive_end: Option<DateTime<Utc>>,
    pub exception_time: Option<DateTime<Utc>>,
    /// The decoded result, present while response hooks run.
    pub response_model: Option<Box<dyn Any + Send>>,
    /// Response `Content-Length`, 0 when absent.
    pub response_size: u64,
    /// Set by an error hook to stop the fault from reaching the caller.
    pub exception_handled: bool,
}

impl InvocationContext {
    pub fn new(request_payload: Option<Payload>) -> Self {
        Self {
            request_payload,
            ..Self::default()
        }
    }

    /// Time between dispatch and the response arriving.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.receive_end? - self.send_start?)
    }

    /// Borrow the decoded result as `T`.
    pub fn response_as<T: 'static>(&self) -> Option<&T> {
        self.response_model.as_ref()?.downcast_ref()
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("request_payload", &self.request_payload)
            .field("send_start", &self.send_start)
            .field("receive_end", &self.receive_end)
            .field("exception_time", &self.exception_time)
            .field("has_response_model", &self.response_model.is_some())
            .field("response_size", &self.response_size)
            .field("exception_handled", &self.exception_handled)
            .finish()
    }
}

struct HookList<H: ?Sized> {
    entries: RwLock<Vec<(HookId, Arc<H>)>>,
}

impl<H: ?Sized> HookList<H> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, id: HookId, hook: Arc<H>) {
        self.entries.write().push((id, hook));
    }

    fn remove(&self, id: HookId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<H>> {
        self.entries.read().iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// All hooks registered on a client.
pub struct Hooks {
    next_id: AtomicU64,
    payload: HookList<PayloadHook>,
    request: HookList<RequestHook>,
    response: HookList<ResponseHook>,
    error: HookList<ErrorHook>,
    substitute: HookList<SubstituteHook>,
    default_query: HookList<DefaultQueryHook>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            payload: HookList::new(),
            request: HookList::new(),
            response: HookList::new(),
            error: HookList::new(),
            substitute: HookList::new(),
            default_query: HookList::new(),
        }
    }

    fn next(&self) -> HookId {
        HookId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a payload mutator. It may replace the payload or clear it.
    pub fn on_request_payload<F>(&self, hook: F) -> HookId
    where
        F: Fn(&mut Option<Payload>) + Send + Sync + 'static,
    {
        let id = self.next();
        self.payload.push(id, Arc::new(hook));
        id
    }

    /// Register an observer of the assembled request.
    pub fn on_request<F>(&self, hook: F) -> HookId
    where
        F: Fn(&HttpRequest, &InvocationContext) + Send + Sync + 'static,
    {
        let id = self.next();
        self.request.push(id, Arc::new(hook));
        id
    }

    /// Register an observer of successful, decoded responses.
    pub fn on_response<F>(&self, hook: F) -> HookId
    where
        F: Fn(&HttpResponse, &InvocationContext) + Send + Sync + 'static,
    {
        let id = self.next();
        self.response.push(id, Arc::new(hook));
        id
    }

    /// Register an error interceptor. It receives the raw, untranslated fault.
    pub fn on_error<F>(&self, hook: F) -> HookId
    where
        F: Fn(&RpcError, &HttpRequest, &mut InvocationContext) + Send + Sync + 'static,
    {
        let id = self.next();
        self.error.push(id, Arc::new(hook));
        id
    }

    /// Register a substitute-result provider for handled faults.
    ///
    /// The returned box must hold the exact result type of the call
    /// (`String`, `Vec<u8>` or `Structured<T>`); anything else yields `None`.
    /// With several providers the last one's output is used.
    pub fn on_error_response<F>(&self, hook: F) -> HookId
    where
        F: Fn(&RpcError, &InvocationContext) -> Option<Box<dyn Any + Send>> + Send + Sync + 'static,
    {
        let id = self.next();
        self.substitute.push(id, Arc::new(hook));
        id
    }

    /// Register a default-query-parameter contributor. Its entries never
    /// replace keys the caller supplied.
    pub fn on_default_query<F>(&self, hook: F) -> HookId
    where
        F: Fn(&mut QueryParams) + Send + Sync + 'static,
    {
        let id = self.next();
        self.default_query.push(id, Arc::new(hook));
        id
    }

    /// Remove a hook of any kind. Returns false if it was not registered.
    pub fn remove(&self, id: HookId) -> bool {
        self.payload.remove(id)
            || self.request.remove(id)
            || self.response.remove(id)
            || self.error.remove(id)
            || self.substitute.remove(id)
            || self.default_query.remove(id)
    }

    pub(crate) fn apply_payload(&self, payload: &mut Option<Payload>) {
        for hook in self.payload.snapshot() {
            hook(payload);
        }
    }

    pub(crate) fn notify_request(&self, request: &HttpRequest, ctx: &InvocationContext) {
        for hook in self.request.snapshot() {
            hook(request, ctx);
        }
    }

    pub(crate) fn notify_response(&self, response: &HttpResponse, ctx: &InvocationContext) {
        for hook in self.response.snapshot() {
            hook(response, ctx);
        }
    }

    /// Run the error interceptors. Returns false when none is registered.
    pub(crate) fn intercept_error(
        &self,
        err: &RpcError,
        request: &HttpRequest,
        ctx: &mut InvocationContext,
    ) -> bool {
        let hooks = self.error.snapshot();
        for hook in &hooks {
            hook(err, request, ctx);
        }
        !hooks.is_empty()
    }

    /// Run the substitute providers. `None` when none is registered.
    pub(crate) fn substitute(
        &self,
        err: &RpcError,
        ctx: &InvocationContext,
    ) -> Option<Option<Box<dyn Any + Send>>> {
        let hooks = self.substitute.snapshot();
        if hooks.is_empty() {
            return None;
        }
        let mut last = None;
        for hook in &hooks {
            last = hook(err, ctx);
        }
        Some(last)
    }

    /// Collect the contributed defaults into a fresh map.
    pub(crate) fn default_query(&self) -> QueryParams {
        let mut defaults = QueryParams::new();
        for hook in self.default_query.snapshot() {
            hook(&mut defaults);
        }
        defaults
    }

    /// Number of registered hooks across all kinds.
    pub fn len(&self) -> usize {
        self.payload.len()
            + self.request.len()
            + self.response.len()
            + self.error.len()
            + self.substitute.len()
            + self.default_query.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("payload", &self.payload.len())
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .field("error", &self.error.len())
            .field("substitute", &self.substitute.len())
            .field("default_query", &self.default_query.len())
            .finish()
    }
}
