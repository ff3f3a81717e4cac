//! Whole-client decorators.
//!
//! A [`ClientWrapper`] turns one client into another that implements the same
//! trait. The service installs three fixed decorators around its client,
//! innermost first: [`AuthClient`], [`FromServiceClient`], [`TraceClient`].
//! All of them intercept `call`, `stream` and `publish` and only touch the
//! outgoing [`RequestContext`].

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use plexus_core::auth::Auth;
use plexus_core::client::{
    CallOptions, CallStream, Client, ClientOption, ClientOptions, Publication, Request, Response,
};
use plexus_core::context::RequestContext;
use plexus_core::error::CallError;
use plexus_core::metadata::{self, Metadata};
use plexus_core::trace::{Span, SpanKind, Tracer};

pub trait ClientWrapper: Send + Sync {
    fn wrap(&self, client: Arc<dyn Client>) -> Arc<dyn Client>;
}

impl<F> ClientWrapper for F
where
    F: Fn(Arc<dyn Client>) -> Arc<dyn Client> + Send + Sync,
{
    fn wrap(&self, client: Arc<dyn Client>) -> Arc<dyn Client> {
        self(client)
    }
}

/// Applies `wrappers` last to first, so `wrappers[0]` ends up outermost.
#[must_use]
pub fn wrap_client(client: Arc<dyn Client>, wrappers: &[Arc<dyn ClientWrapper>]) -> Arc<dyn Client> {
    wrappers.iter().rev().fold(client, |c, w| w.wrap(c))
}

/// Auth held by the running service, swappable after construction.
pub type AuthSlot = Arc<ArcSwap<Arc<dyn Auth>>>;

/// Service name held by the running service, swappable after construction.
pub type NameSlot = Arc<ArcSwap<String>>;

// ---------------------------------------------------------------------------
// AuthClient
// ---------------------------------------------------------------------------

/// Adds `Authorization` and namespace headers from the service's auth.
///
/// A caller-supplied `Authorization` header is only replaced when the call
/// sets `service_token`. Expired tokens are never attached.
pub struct AuthClient {
    inner: Arc<dyn Client>,
    auth: AuthSlot,
}

impl AuthClient {
    #[must_use]
    pub fn new(inner: Arc<dyn Client>, auth: AuthSlot) -> Self {
        Self { inner, auth }
    }

    fn decorate(&self, mut ctx: RequestContext, service_token: bool) -> RequestContext {
        let options = self.auth.load().options();

        if let Some(token) = options.token.filter(|t| !t.expired()) {
            if service_token || !ctx.metadata.contains(metadata::AUTHORIZATION) {
                ctx.metadata.set(
                    metadata::AUTHORIZATION,
                    format!("{}{}", metadata::BEARER_SCHEME, token.access_token),
                );
            }
        }
        if !ctx.metadata.contains(metadata::NAMESPACE) {
            ctx.metadata.set(metadata::NAMESPACE, options.namespace);
        }
        ctx
    }
}

#[async_trait]
impl Client for AuthClient {
    fn init(&self, opts: Vec<ClientOption>) -> anyhow::Result<()> {
        self.inner.init(opts)
    }

    fn options(&self) -> ClientOptions {
        self.inner.options()
    }

    async fn call(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Response, CallError> {
        let ctx = self.decorate(ctx, opts.service_token);
        self.inner.call(ctx, req, opts).await
    }

    async fn stream(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Box<dyn CallStream>, CallError> {
        let ctx = self.decorate(ctx, opts.service_token);
        self.inner.stream(ctx, req, opts).await
    }

    async fn publish(&self, ctx: RequestContext, msg: Publication) -> Result<(), CallError> {
        let ctx = self.decorate(ctx, false);
        self.inner.publish(ctx, msg).await
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}

// ---------------------------------------------------------------------------
// FromServiceClient
// ---------------------------------------------------------------------------

/// Tags outgoing calls with the calling service's name.
pub struct FromServiceClient {
    inner: Arc<dyn Client>,
    name: NameSlot,
}

impl FromServiceClient {
    #[must_use]
    pub fn new(inner: Arc<dyn Client>, name: NameSlot) -> Self {
        Self { inner, name }
    }

    fn decorate(&self, ctx: RequestContext) -> RequestContext {
        let headers: Metadata = [(metadata::FROM_SERVICE, self.name.load().as_str())]
            .into_iter()
            .collect();
        ctx.with_headers(&headers, false)
    }
}

#[async_trait]
impl Client for FromServiceClient {
    fn init(&self, opts: Vec<ClientOption>) -> anyhow::Result<()> {
        self.inner.init(opts)
    }

    fn options(&self) -> ClientOptions {
        self.inner.options()
    }

    async fn call(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Response, CallError> {
        self.inner.call(self.decorate(ctx), req, opts).await
    }

    async fn stream(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Box<dyn CallStream>, CallError> {
        self.inner.stream(self.decorate(ctx), req, opts).await
    }

    async fn publish(&self, ctx: RequestContext, msg: Publication) -> Result<(), CallError> {
        self.inner.publish(self.decorate(ctx), msg).await
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}

// ---------------------------------------------------------------------------
// TraceClient
// ---------------------------------------------------------------------------

/// Opens an outbound span around each call, stream setup and publication.
pub struct TraceClient {
    inner: Arc<dyn Client>,
    tracer: Arc<dyn Tracer>,
}

impl TraceClient {
    #[must_use]
    pub fn new(inner: Arc<dyn Client>, tracer: Arc<dyn Tracer>) -> Self {
        Self { inner, tracer }
    }

    fn finish<T>(&self, mut span: Span, result: &Result<T, CallError>) {
        if let Err(e) = result {
            span.metadata.insert("error".to_string(), e.to_string());
        }
        self.tracer.finish(span);
    }
}

#[async_trait]
impl Client for TraceClient {
    fn init(&self, opts: Vec<ClientOption>) -> anyhow::Result<()> {
        self.inner.init(opts)
    }

    fn options(&self) -> ClientOptions {
        self.inner.options()
    }

    async fn call(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Response, CallError> {
        let name = format!("{}.{}", req.service, req.endpoint);
        let (ctx, span) = self.tracer.start(&ctx, &name, SpanKind::RequestOutbound);
        let result = self.inner.call(ctx, req, opts).await;
        self.finish(span, &result);
        result
    }

    async fn stream(
        &self,
        ctx: RequestContext,
        req: Request,
        opts: CallOptions,
    ) -> Result<Box<dyn CallStream>, CallError> {
        let name = format!("{}.{}", req.service, req.endpoint);
        let (ctx, span) = self.tracer.start(&ctx, &name, SpanKind::RequestOutbound);
        let result = self.inner.stream(ctx, req, opts).await;
        self.finish(span, &result);
        result
    }

    async fn publish(&self, ctx: RequestContext, msg: Publication) -> Result<(), CallError> {
        let (ctx, span) = self.tracer.start(&ctx, &msg.topic, SpanKind::RequestOutbound);
        let result = self.inner.publish(ctx, msg).await;
        self.finish(span, &result);
        result
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}
