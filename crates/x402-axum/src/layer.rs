//! Axum middleware for enforcing [x402](https://www.x402.org) payments on protected routes.
//!
//! This middleware validates incoming payment headers using a configured x402 facilitator,
//! and settles valid payments either before or after request execution (configurable).
//!
//! Returns a `402 Payment Required` response if the request lacks a valid payment.
//!
//! The actual verify/settle/header-encoding logic lives in [`crate::paygate`]; this module
//! is a [`tower::Layer`]/[`tower::Service`] wrapper around it that resolves price tags per
//! request (static or dynamic) and caches the facilitator's `/supported` capabilities.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, Json};
//! use axum::response::IntoResponse;
//! use http::StatusCode;
//! use serde_json::json;
//! use x402_axum::layer::X402LayerBuilder;
//!
//! let x402 = X402LayerBuilder::new("https://facilitator.ukstv.me/")
//!     .with_description("Access to /protected");
//!
//! async fn my_handler() -> impl IntoResponse {
//!     (StatusCode::OK, Json(json!({ "hello": "world" })))
//! }
//! ```
//!
//! ## Configuration Notes
//!
//! - **[`X402LayerBuilder::with_price_tag`]** / **[`X402LayerBuilder::with_dynamic_price`]** select
//!   the accepted payments, static or computed per request, and finish the builder into a usable
//!   [`X402Middleware`].
//! - **[`X402LayerBuilder::with_description`]** and **[`X402LayerBuilder::with_mime_type`]** are
//!   optional but help the payer understand what is being paid for.
//! - **[`X402LayerBuilder::with_resource`]** explicitly sets the full URI of the protected resource.
//!   This avoids recomputing the resource URI on every request and should be preferred when possible.
//! - If `with_resource` is **not** used, the middleware computes the resource URI dynamically from the
//!   request and a base URL set via **[`X402LayerBuilder::with_base_url`]**.
//! - If no base URL is provided, the middleware falls back to the request's `Host` header.
//! - **[`X402LayerBuilder::with_supported_cache_ttl`]** bounds how often the facilitator's
//!   `/supported` capabilities are refreshed (default one minute).
//!
//! ## Settlement Timing
//!
//! By default, settlement occurs **after** the request is processed. You can change this behavior:
//!
//! - **[`X402LayerBuilder::settle_before_execution`]** settles the payment before the inner handler
//!   runs, avoiding authorization expiry during slow handlers.
//! - **[`X402LayerBuilder::settle_after_execution`]** (default) lets the handler run before the
//!   payment is committed on-chain.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum_core::extract::Request;
use axum_core::response::Response;
use http::{HeaderMap, Uri};
use tokio::sync::Mutex;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;
use x402_extensions::ExtensionRegistry;
use x402_types::facilitator::Facilitator;
use x402_types::proto::SupportedResponse;

use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::paygate::{
    DynamicPriceTags, Paygate, PaygateProtocol, PriceTagSource, ResourceInfoBuilder,
    StaticPriceTags,
};

/// Collects facilitator and resource configuration before a price source is attached.
///
/// Finishing the builder with [`Self::with_price_tag`] or [`Self::with_dynamic_price`] produces
/// an [`X402Middleware`], which is the actual [`tower::Layer`].
pub struct X402LayerBuilder<TFacilitator> {
    facilitator: Arc<TFacilitator>,
    resource: ResourceInfoBuilder,
    base_url: Option<Url>,
    settle_before_execution: bool,
    supported_cache_ttl: Duration,
    extensions: Arc<ExtensionRegistry>,
    paywall_html: Option<Arc<str>>,
}

impl<TFacilitator> Clone for X402LayerBuilder<TFacilitator> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            resource: self.resource.clone(),
            base_url: self.base_url.clone(),
            settle_before_execution: self.settle_before_execution,
            supported_cache_ttl: self.supported_cache_ttl,
            extensions: self.extensions.clone(),
            paywall_html: self.paywall_html.clone(),
        }
    }
}

impl X402LayerBuilder<FacilitatorClient> {
    /// Creates a builder targeting the remote facilitator at `facilitator_url`.
    ///
    /// # Panics
    ///
    /// Panics if `facilitator_url` is not a valid URL. Use [`Self::try_new`] to handle
    /// this fallibly.
    pub fn new(facilitator_url: &str) -> Self {
        Self::try_new(facilitator_url).expect("invalid facilitator URL")
    }

    /// Fallible constructor, see [`Self::new`].
    pub fn try_new(facilitator_url: &str) -> Result<Self, FacilitatorClientError> {
        let facilitator = FacilitatorClient::try_from(facilitator_url)?;
        Ok(Self::from_facilitator(facilitator))
    }

    /// Returns the facilitator's base URL.
    pub fn facilitator_url(&self) -> &Url {
        self.facilitator.base_url()
    }
}

impl TryFrom<&str> for X402LayerBuilder<FacilitatorClient> {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl<TFacilitator> X402LayerBuilder<TFacilitator> {
    /// Wraps an already constructed facilitator (local or remote).
    pub fn from_facilitator(facilitator: TFacilitator) -> Self {
        Self {
            facilitator: Arc::new(facilitator),
            resource: ResourceInfoBuilder::default(),
            base_url: None,
            settle_before_execution: false,
            supported_cache_ttl: Duration::from_secs(60),
            extensions: Arc::new(ExtensionRegistry::new()),
            paywall_html: None,
        }
    }

    /// Registers the extension registry consulted for this route's 402
    /// declarations and settle-response hooks. Defaults to an empty registry
    /// (no extensions participate) when not called.
    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    /// Serves `html` instead of the bare JSON 402 body when the request's
    /// `Accept` header prefers `text/html` (e.g. a browser navigating directly
    /// to a priced page). The JSON 402 body is still embedded verbatim in a
    /// `<script type="application/json" id="x402">` tag, so x402-aware page
    /// scripts can read it without a second round trip.
    pub fn with_paywall_html(mut self, html: &str) -> Self {
        self.paywall_html = Some(Arc::from(html));
        self
    }

    /// Sets the description field on generated payment requirements.
    pub fn with_description(mut self, description: &str) -> Self {
        self.resource.description = description.to_string();
        self
    }

    /// Sets the MIME type of the protected resource.
    pub fn with_mime_type(mut self, mime: &str) -> Self {
        self.resource.mime_type = mime.to_string();
        self
    }

    /// Sets the resource URL directly, avoiding auto-detection from the request.
    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource.url = Some(resource.to_string());
        self
    }

    /// Sets the base URL used to construct resource URLs dynamically when `with_resource`
    /// was not called.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Settles payment before the inner handler runs.
    pub fn settle_before_execution(mut self) -> Self {
        self.settle_before_execution = true;
        self
    }

    /// Settles payment after the inner handler runs (default).
    pub fn settle_after_execution(mut self) -> Self {
        self.settle_before_execution = false;
        self
    }

    /// Sets how long the facilitator's `/supported` capabilities are cached before refresh.
    pub fn with_supported_cache_ttl(mut self, ttl: Duration) -> Self {
        self.supported_cache_ttl = ttl;
        self
    }

    /// Accepts a single static price tag, identical for every request.
    ///
    /// Use [`X402Middleware::or_price_tag`] on the result to accept more than one.
    pub fn with_price_tag<TPriceTag>(
        self,
        price_tag: TPriceTag,
    ) -> X402Middleware<StaticPriceTags<TPriceTag>, TFacilitator>
    where
        TPriceTag: PaygateProtocol,
    {
        X402Middleware::from_builder(self, StaticPriceTags::new(vec![price_tag]))
    }

    /// Accepts a static list of price tags, identical for every request.
    pub fn with_price_tags<TPriceTag>(
        self,
        price_tags: Vec<TPriceTag>,
    ) -> X402Middleware<StaticPriceTags<TPriceTag>, TFacilitator>
    where
        TPriceTag: PaygateProtocol,
    {
        X402Middleware::from_builder(self, StaticPriceTags::new(price_tags))
    }

    /// Computes price tags per request via an async callback.
    pub fn with_dynamic_price<TPriceTag, F, Fut>(
        self,
        callback: F,
    ) -> X402Middleware<DynamicPriceTags<TPriceTag>, TFacilitator>
    where
        TPriceTag: PaygateProtocol,
        F: Fn(&HeaderMap, &Uri, Option<&Url>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<TPriceTag>> + Send + 'static,
    {
        X402Middleware::from_builder(self, DynamicPriceTags::new(callback))
    }
}

/// A small time-boxed cache for a facilitator's `/supported` response.
///
/// Querying `/supported` on every request would add a network round trip to the hot path;
/// the set of schemes/networks/signers a facilitator exposes changes rarely, so it's cached
/// for [`X402LayerBuilder::with_supported_cache_ttl`].
struct SupportedCache {
    ttl: Duration,
    state: Mutex<Option<(Instant, SupportedResponse)>>,
}

impl SupportedCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(None),
        }
    }

    async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> SupportedResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SupportedResponse, E>>,
    {
        let mut guard = self.state.lock().await;
        if let Some((fetched_at, cached)) = guard.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return cached.clone();
            }
        }
        match fetch().await {
            Ok(fresh) => {
                *guard = Some((Instant::now(), fresh.clone()));
                fresh
            }
            // Stale-or-absent cache and a failing facilitator: fall back to whatever we had,
            // or an empty response, rather than failing the request outright.
            Err(_) => guard
                .as_ref()
                .map(|(_, cached)| cached.clone())
                .unwrap_or_default(),
        }
    }
}

/// Middleware layer that enforces x402 payment verification and settlement.
///
/// Produced by finishing an [`X402LayerBuilder`] with a price source. Implements
/// [`tower::Layer`]; apply it to a route with `.layer(...)`.
pub struct X402Middleware<TSource, TFacilitator> {
    facilitator: Arc<TFacilitator>,
    source: TSource,
    resource: ResourceInfoBuilder,
    base_url: Option<Url>,
    settle_before_execution: bool,
    supported_cache: Arc<SupportedCache>,
    extensions: Arc<ExtensionRegistry>,
    paywall_html: Option<Arc<str>>,
}

impl<TSource: Clone, TFacilitator> Clone for X402Middleware<TSource, TFacilitator> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            source: self.source.clone(),
            resource: self.resource.clone(),
            base_url: self.base_url.clone(),
            settle_before_execution: self.settle_before_execution,
            supported_cache: self.supported_cache.clone(),
            extensions: self.extensions.clone(),
            paywall_html: self.paywall_html.clone(),
        }
    }
}

impl<TSource, TFacilitator> X402Middleware<TSource, TFacilitator> {
    fn from_builder(builder: X402LayerBuilder<TFacilitator>, source: TSource) -> Self {
        Self {
            facilitator: builder.facilitator,
            source,
            resource: builder.resource,
            base_url: builder.base_url,
            settle_before_execution: builder.settle_before_execution,
            supported_cache: Arc::new(SupportedCache::new(builder.supported_cache_ttl)),
            extensions: builder.extensions,
            paywall_html: builder.paywall_html,
        }
    }
}

impl<TPriceTag, TFacilitator> X402Middleware<StaticPriceTags<TPriceTag>, TFacilitator>
where
    TPriceTag: PaygateProtocol + Clone,
{
    /// Adds another static price tag to the ones already accepted.
    pub fn or_price_tag(mut self, price_tag: TPriceTag) -> Self {
        self.source = self.source.with_price_tag(price_tag);
        self
    }
}

impl<TSource, TFacilitator> X402Middleware<TSource, TFacilitator>
where
    TSource: PriceTagSource,
    TSource::PriceTag: PaygateProtocol + Clone,
    TFacilitator: Facilitator,
{
    async fn handle<S>(&self, inner: S, req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        let resource = self.resource.as_resource_info(self.base_url.as_ref(), &req);
        let accepts = self
            .source
            .resolve(req.headers(), req.uri(), self.base_url.as_ref())
            .await;
        let facilitator = Arc::clone(&self.facilitator);
        let capabilities = self
            .supported_cache
            .get_or_refresh(|| async { facilitator.supported().await })
            .await;
        let accepts = accepts
            .into_iter()
            .map(|mut tag| {
                tag.enrich_with_capabilities(&capabilities);
                tag
            })
            .collect::<Vec<_>>();
        let paygate = Paygate {
            facilitator: Arc::clone(&self.facilitator),
            settle_before_execution: self.settle_before_execution,
            accepts: Arc::new(accepts),
            resource,
            extensions: Arc::clone(&self.extensions),
            paywall_html: self.paywall_html.clone(),
        };
        paygate.handle_request(inner, req).await
    }
}

/// Wraps a cloned inner Axum service and augments it with payment enforcement logic.
pub struct X402MiddlewareService<TSource, TFacilitator> {
    middleware: X402Middleware<TSource, TFacilitator>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<TSource: Clone, TFacilitator> Clone for X402MiddlewareService<TSource, TFacilitator> {
    fn clone(&self) -> Self {
        Self {
            middleware: self.middleware.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S, TSource, TFacilitator> Layer<S> for X402Middleware<TSource, TFacilitator>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    TSource: Clone,
{
    type Service = X402MiddlewareService<TSource, TFacilitator>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            middleware: self.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

impl<TSource, TFacilitator> Service<Request> for X402MiddlewareService<TSource, TFacilitator>
where
    TSource: PriceTagSource + Clone + Send + Sync + 'static,
    TSource::PriceTag: PaygateProtocol + Clone,
    TFacilitator: Facilitator + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    /// Delegates readiness polling to the wrapped inner service.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    /// Resolves price tags, enforces payment, and forwards to the wrapped service.
    fn call(&mut self, req: Request) -> Self::Future {
        let middleware = self.middleware.clone();
        let inner = self.inner.clone();
        Box::pin(async move { middleware.handle(inner, req).await })
    }
}
