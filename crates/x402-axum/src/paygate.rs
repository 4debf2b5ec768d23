//! Unified Paygate implementation supporting both V1 and V2 x402 protocols.
//!
//! This module provides a trait-based abstraction that allows sharing the core
//! payment gate logic between protocol versions while allowing version-specific
//! behavior through the [`PaygateProtocol`] trait.
//!
//! ## Overview
//!
//! The paygate handles:
//! - Extracting payment headers from requests
//! - Verifying payments with the facilitator
//! - Settling payments on-chain
//! - Returning appropriate 402 responses when payment is required
//!
//! ## Example
//!
//! ```ignore
//! use x402_axum::paygate::{Paygate, PaygateProtocol};
//!
//! // Create a paygate for V1 or V2 protocol
//! let paygate = Paygate {
//!     facilitator,
//!     settle_before_execution: false,
//!     accepts: Arc::new(price_tags),
//!     resource: ResourceInfoBuilder::default().as_resource_info(&base_url, &uri),
//!     extensions: Arc::new(ExtensionRegistry::new()),
//!     paywall_html: None,
//! };
//!
//! // Handle a request
//! let response = paygate.handle_request(inner, request).await;
//! ```

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower::Service;
use url::Url;
use x402_extensions::ExtensionRegistry;
use x402_extensions::registry::{RouteConfig, SettleContext as ExtSettleContext, TransportContext};
use x402_types::facilitator::Facilitator;
use x402_types::proto;
use x402_types::proto::{SupportedResponse, v1, v2};

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use x402_types::util::Base64Bytes;

// ============================================================================
// Common Types
// ============================================================================

/// Builder for resource information that can be used with both V1 and V2 protocols.
#[derive(Debug, Clone)]
pub struct ResourceInfoBuilder {
    /// Description of the protected resource
    pub description: String,
    /// MIME type of the protected resource
    pub mime_type: String,
    /// Optional explicit URL of the protected resource
    pub url: Option<String>,
}

impl Default for ResourceInfoBuilder {
    fn default() -> Self {
        Self {
            description: "".to_string(),
            mime_type: "application/json".to_string(),
            url: None,
        }
    }
}

impl ResourceInfoBuilder {
    /// Determines the resource URL (static or dynamic).
    ///
    /// If `url` is set, returns it directly. Otherwise, constructs a URL by combining
    /// the base URL with the request URI's path and query.
    pub fn as_resource_info(&self, base_url: Option<&Url>, req: &Request) -> v2::ResourceInfo {
        let url = self.url.clone().unwrap_or_else(|| {
            let mut url = base_url.cloned().unwrap_or_else(|| {
                let host = req.headers().get("host").and_then(|h| h.to_str().ok()).unwrap_or("localhost");
                let origin = format!("http://{}", host);
                let url = Url::parse(&origin).unwrap_or_else(|_| Url::parse("http://localhost").unwrap());
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    "X402Middleware base_url is not configured; using {url} as origin for resource resolution"
                );
                url
            });
            let request_uri = req.uri();
            url.set_path(request_uri.path());
            url.set_query(request_uri.query());
            url.to_string()
        });
        v2::ResourceInfo {
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            url,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Common verification errors shared between protocol versions.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("{0} header is required")]
    PaymentHeaderRequired(&'static str),
    #[error("Invalid or malformed payment header")]
    InvalidPaymentHeader,
    #[error("Unable to find matching payment requirements")]
    NoPaymentMatching,
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
}

/// Paygate error type that wraps verification and settlement errors.
#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("Settlement failed: {0}")]
    Settlement(String),
}

// ============================================================================
// PaygateProtocol Trait
// ============================================================================

/// Trait defining version-specific behavior for the x402 payment gate.
///
/// This trait is implemented directly on the price tag types (`V1PriceTag` and
/// `V2PriceTag`/`v2::PaymentRequirements`), allowing the core payment gate logic
/// to be shared while version-specific behavior is implemented separately.
pub trait PaygateProtocol: Clone + Send + Sync + 'static {
    /// The payment payload type extracted from the request header.
    type PaymentPayload: serde::de::DeserializeOwned + Send;

    /// The HTTP header name for the payment payload.
    const PAYMENT_HEADER_NAME: &'static str;

    /// Constructs a verify request from the payment payload and accepted requirements.
    ///
    /// The `resource` parameter provides resource information that may be needed
    /// for protocol-specific requirements (e.g., V1 includes resource info in PaymentRequirements).
    fn make_verify_request(
        payload: Self::PaymentPayload,
        accepts: &[Self],
        resource: &v2::ResourceInfo,
    ) -> Result<proto::VerifyRequest, VerificationError>;

    /// Converts an error into an HTTP response with appropriate format.
    ///
    /// `extensions` carries the per-extension declarations produced by the
    /// extension registry's `declare`/`enrich_declaration` hooks for this
    /// request; it is attached to the `PaymentRequired` body verbatim.
    /// `wants_html` reflects whether the request's `Accept` header prefers
    /// `text/html`; `paywall_html` is the route's configured paywall blob, if
    /// any. When both are present, implementations SHOULD emit the paywall
    /// HTML (with the JSON 402 body embedded for script consumption) instead
    /// of a bare JSON response, for the [`VerificationError::PaymentHeaderRequired`]
    /// case — the JSON body stays authoritative either way.
    fn error_into_response(
        err: PaygateError,
        accepts: &[Self],
        resource: &v2::ResourceInfo,
        extensions: &HashMap<String, serde_json::Value>,
        wants_html: bool,
        paywall_html: Option<&str>,
    ) -> Response;

    /// Converts the verify response to the protocol-specific format and validates it.
    fn validate_verify_response(
        verify_response: proto::VerifyResponse,
    ) -> Result<(), VerificationError>;

    /// Enriches a price tag with facilitator capabilities.
    ///
    /// Called by middleware when building 402 response to add extra information like fee payer
    /// from the facilitator's supported endpoints.
    fn enrich_with_capabilities(&mut self, capabilities: &SupportedResponse);

    /// CAIP-2 (or, for v1, bare) network identifier this price tag targets.
    ///
    /// Used to populate [`RouteConfig::network`] for extension declaration.
    fn network(&self) -> String;

    /// Extracts the extension payloads the client copied forward from the 402
    /// challenge (possibly augmented, e.g. with `payment-identifier.info.id`).
    fn payload_extensions(payload: &Self::PaymentPayload) -> HashMap<String, serde_json::Value>;
}

// ============================================================================
// V1 Protocol Implementation (on v1::PriceTag)
// ============================================================================

impl PaygateProtocol for v1::PriceTag {
    type PaymentPayload = v1::PaymentPayload;

    const PAYMENT_HEADER_NAME: &'static str = "X-PAYMENT";

    fn make_verify_request(
        payment_payload: Self::PaymentPayload,
        accepts: &[Self],
        resource: &v2::ResourceInfo,
    ) -> Result<proto::VerifyRequest, VerificationError> {
        let selected = accepts
            .iter()
            .find(|requirement| {
                requirement.scheme == payment_payload.scheme
                    && requirement.network == payment_payload.network
            })
            .ok_or(VerificationError::NoPaymentMatching)?;

        let verify_request = v1::VerifyRequest {
            x402_version: v1::X402Version1,
            payment_payload,
            payment_requirements: price_tag_to_v1_requirements_with_resource(selected, resource),
        };

        verify_request
            .try_into()
            .map_err(|e| VerificationError::VerificationFailed(format!("{e}")))
    }

    fn error_into_response(
        err: PaygateError,
        accepts: &[Self],
        resource: &v2::ResourceInfo,
        extensions: &HashMap<String, serde_json::Value>,
        wants_html: bool,
        paywall_html: Option<&str>,
    ) -> Response {
        match err {
            PaygateError::Verification(err) => {
                let is_header_missing = matches!(err, VerificationError::PaymentHeaderRequired(_));
                let payment_required_response = v1::PaymentRequired {
                    error: Some(err.to_string()),
                    accepts: accepts
                        .iter()
                        .map(|pt| price_tag_to_v1_requirements_with_resource(pt, resource))
                        .collect(),
                    x402_version: v1::X402Version1,
                    extensions: extensions.clone(),
                };
                if is_header_missing && wants_html {
                    if let Some(html) = paywall_html {
                        return html_paywall_response(html, &payment_required_response);
                    }
                }
                let payment_required_response_bytes =
                    serde_json::to_vec(&payment_required_response).expect("serialization failed");
                let body = Body::from(payment_required_response_bytes);
                Response::builder()
                    .status(StatusCode::PAYMENT_REQUIRED)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .expect("Fail to construct response")
            }
            PaygateError::Settlement(err) => {
                let body = Body::from(
                    json!({
                        "error": "Settlement failed",
                        "details": err.to_string()
                    })
                    .to_string(),
                );
                Response::builder()
                    .status(StatusCode::PAYMENT_REQUIRED)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .expect("Fail to construct response")
            }
        }
    }

    fn validate_verify_response(
        verify_response: proto::VerifyResponse,
    ) -> Result<(), VerificationError> {
        let verify_response_v1: v1::VerifyResponse = verify_response
            .try_into()
            .map_err(|e| VerificationError::VerificationFailed(format!("{e}")))?;

        match verify_response_v1 {
            v1::VerifyResponse::Valid { .. } => Ok(()),
            v1::VerifyResponse::Invalid { reason, .. } => {
                Err(VerificationError::VerificationFailed(reason))
            }
        }
    }

    fn enrich_with_capabilities(&mut self, capabilities: &SupportedResponse) {
        self.enrich(capabilities);
    }

    fn network(&self) -> String {
        self.network.clone()
    }

    fn payload_extensions(payload: &Self::PaymentPayload) -> HashMap<String, serde_json::Value> {
        payload.extensions.clone()
    }
}

/// Helper function to convert V1PriceTag to v1::PaymentRequirements with resource info.
fn price_tag_to_v1_requirements_with_resource(
    price_tag: &v1::PriceTag,
    resource: &v2::ResourceInfo,
) -> v1::PaymentRequirements {
    v1::PaymentRequirements {
        scheme: price_tag.scheme.clone(),
        network: price_tag.network.clone(),
        max_amount_required: price_tag.amount.clone(),
        resource: resource.url.clone(),
        description: resource.description.clone(),
        mime_type: resource.mime_type.clone(),
        output_schema: None,
        pay_to: price_tag.pay_to.clone(),
        max_timeout_seconds: price_tag.max_timeout_seconds,
        asset: price_tag.asset.clone(),
        extra: price_tag.extra.clone(),
    }
}

// ============================================================================
// V2 Protocol Implementation (on v2::PaymentRequirements / V2PriceTag)
// ============================================================================

impl PaygateProtocol for v2::PriceTag {
    type PaymentPayload = v2::PaymentPayload<v2::PaymentRequirements, serde_json::Value>;

    const PAYMENT_HEADER_NAME: &'static str = "Payment-Signature";

    fn make_verify_request(
        payment_payload: Self::PaymentPayload,
        accepts: &[Self],
        _resource: &v2::ResourceInfo,
    ) -> Result<proto::VerifyRequest, VerificationError> {
        // In V2, the accepted requirements are embedded in the payload
        // Resource info is already included in the payment payload from the client
        let accepted = &payment_payload.accepted;

        // Find matching requirements from our accepts list
        // According to V2 spec, the accepted requirements must exactly match
        // one of the requirements we offered in PaymentRequired.accepts
        let selected = accepts
            .iter()
            .find(|price_tag| **price_tag == *accepted)
            .ok_or(VerificationError::NoPaymentMatching)?;

        // Build the V2 verify request
        let verify_request = v2::VerifyRequest {
            x402_version: v2::X402Version2,
            payment_payload,
            payment_requirements: selected.requirements.clone(),
        };

        let raw = serde_json::to_value(&verify_request)
            .and_then(|json_string| serde_json::value::to_raw_value(&json_string))
            .map_err(|e| VerificationError::VerificationFailed(format!("{e}")))?;

        Ok(proto::VerifyRequest::from(raw))
    }

    fn error_into_response(
        err: PaygateError,
        accepts: &[Self],
        resource: &v2::ResourceInfo,
        extensions: &HashMap<String, serde_json::Value>,
        wants_html: bool,
        paywall_html: Option<&str>,
    ) -> Response {
        match err {
            PaygateError::Verification(err) => {
                let is_header_missing = matches!(err, VerificationError::PaymentHeaderRequired(_));
                let status_code = if let VerificationError::PreconditionFailed(_) = &err {
                    StatusCode::PRECONDITION_FAILED
                } else {
                    StatusCode::PAYMENT_REQUIRED
                };
                let payment_required_response = v2::PaymentRequired {
                    error: Some(err.to_string()),
                    accepts: accepts.iter().map(|pt| pt.requirements.clone()).collect(),
                    x402_version: v2::X402Version2,
                    resource: resource.clone(),
                    extensions: extensions.clone(),
                };
                if is_header_missing && wants_html {
                    if let Some(html) = paywall_html {
                        return html_paywall_response(html, &payment_required_response);
                    }
                }
                // V2 sends payment required in the "Payment-Required" header (base64 encoded)
                let payment_required_bytes =
                    serde_json::to_vec(&payment_required_response).expect("serialization failed");
                let payment_required_header = Base64Bytes::encode(&payment_required_bytes);
                let header_value = HeaderValue::from_bytes(payment_required_header.as_ref())
                    .expect("Failed to create header value");

                Response::builder()
                    .status(status_code)
                    .header("Payment-Required", header_value)
                    .body(Body::empty())
                    .expect("Fail to construct response")
            }
            PaygateError::Settlement(err) => {
                let body = Body::from(
                    json!({
                        "error": "Settlement failed",
                        "details": err.to_string()
                    })
                    .to_string(),
                );
                Response::builder()
                    .status(StatusCode::PAYMENT_REQUIRED)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .expect("Fail to construct response")
            }
        }
    }

    fn validate_verify_response(
        verify_response: proto::VerifyResponse,
    ) -> Result<(), VerificationError> {
        let verify_response_v2: v2::VerifyResponse = verify_response
            .try_into()
            .map_err(|e| VerificationError::VerificationFailed(format!("{e}")))?;

        match verify_response_v2 {
            v2::VerifyResponse::Valid { .. } => Ok(()),
            v2::VerifyResponse::Invalid { reason, payer: _ } => {
                if reason == "permit2_allowance_required" {
                    Err(VerificationError::PreconditionFailed(reason))
                } else {
                    Err(VerificationError::VerificationFailed(reason))
                }
            }
        }
    }

    fn enrich_with_capabilities(&mut self, capabilities: &SupportedResponse) {
        self.enrich(capabilities);
    }

    fn network(&self) -> String {
        self.requirements.network.to_string()
    }

    fn payload_extensions(payload: &Self::PaymentPayload) -> HashMap<String, serde_json::Value> {
        payload.extensions.clone()
    }
}

// ============================================================================
// Unified Paygate Implementation
// ============================================================================

/// Unified payment gate that works with both V1 and V2 protocols.
///
/// The protocol version is determined by the price tag type parameter `P`, which must
/// implement [`PaygateProtocol`]. Use `V1PriceTag` for V1 protocol or `V2PriceTag`
/// (alias for `v2::PaymentRequirements`) for V2 protocol.
pub struct Paygate<TPriceTag, TFacilitator> {
    /// The facilitator for verifying and settling payments
    pub facilitator: TFacilitator,
    /// Whether to settle before or after request execution
    pub settle_before_execution: bool,
    /// Accepted payment requirements
    pub accepts: Arc<Vec<TPriceTag>>,
    /// Resource information for the protected endpoint
    pub resource: v2::ResourceInfo,
    /// Registered extensions, consulted at declare/enrich time (402 body) and
    /// settle time (`X-Payment-Response` body). Empty by default.
    pub extensions: Arc<ExtensionRegistry>,
    /// Optional paywall HTML served instead of the JSON 402 body when the
    /// client's `Accept` header prefers HTML (e.g. a browser navigation).
    /// The 402 JSON stays authoritative: when present, it is embedded
    /// verbatim in a `<script type="application/json" id="x402">` tag for
    /// script consumption.
    pub paywall_html: Option<Arc<str>>,
}

impl<TPriceTag, TFacilitator> Paygate<TPriceTag, TFacilitator> {
    /// Calls the inner service with proper telemetry instrumentation.
    async fn call_inner<
        ReqBody,
        ResBody,
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    >(
        mut inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<http::Response<ResBody>, S::Error>
    where
        S::Future: Send,
    {
        #[cfg(feature = "telemetry")]
        {
            inner
                .call(req)
                .instrument(tracing::info_span!("inner"))
                .await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            inner.call(req).await
        }
    }
}

impl<TPriceTag, TFacilitator> Paygate<TPriceTag, TFacilitator>
where
    TPriceTag: PaygateProtocol,
    TFacilitator: Facilitator,
{
    /// Handles an incoming request, processing payment if required.
    ///
    /// Returns 402 response if payment fails.
    /// Otherwise, returns the response from the inner service.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.handle_request", skip_all)
    )]
    pub async fn handle_request<
        ReqBody,
        ResBody,
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    >(
        self,
        inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<Response, Infallible>
    where
        S::Response: IntoResponse,
        S::Error: IntoResponse,
        S::Future: Send,
    {
        let declared = self.declared_extensions(req.headers());
        let wants_html = accepts_html(req.headers());
        match self.handle_request_fallible(inner, req).await {
            Ok(response) => Ok(response),
            Err(err) => {
                // Get enriched accepts for 402 response
                Ok(TPriceTag::error_into_response(
                    err,
                    &self.accepts,
                    &self.resource,
                    &declared,
                    wants_html,
                    self.paywall_html.as_deref(),
                ))
            }
        }
    }

    /// Declares and per-request-enriches every registered extension's
    /// contribution to the 402 body, keyed by extension name.
    fn declared_extensions(&self, headers: &HeaderMap) -> HashMap<String, serde_json::Value> {
        let route = RouteConfig {
            resource: self.resource.url.clone(),
            description: self.resource.description.clone(),
            mime_type: self.resource.mime_type.clone(),
            network: self
                .accepts
                .first()
                .map(|pt| pt.network())
                .unwrap_or_default(),
            output_schema: None,
        };
        let mut declared = self.extensions.declare_all(&route);
        let ctx = TransportContext {
            headers: headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect(),
            resource_url: self.resource.url.clone(),
        };
        self.extensions.enrich_all(&mut declared, &ctx);
        declared
    }

    /// Gets enriched price tags with facilitator capabilities.
    pub async fn enrich_accepts(&mut self) {
        // Try to get capabilities, use empty if fails
        let capabilities = self.facilitator.supported().await.unwrap_or_default();

        let accepts = self
            .accepts
            .iter()
            .map(|pt| {
                let mut pt_clone = pt.clone();
                pt_clone.enrich_with_capabilities(&capabilities);
                pt_clone
            })
            .collect::<Vec<_>>();
        self.accepts = Arc::new(accepts);
    }

    /// Handles an incoming request, returning errors as `PaygateError`.
    ///
    /// This is the fallible version of `handle_request` that returns an actual error
    /// instead of turning it into 402 Payment Required response.
    pub async fn handle_request_fallible<
        ReqBody,
        ResBody,
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    >(
        &self,
        inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<Response, PaygateError>
    where
        S::Response: IntoResponse,
        S::Error: IntoResponse,
        S::Future: Send,
    {
        // Extract payment payload from headers. Falls back to the legacy bare
        // `PAYMENT` header name for v1 clients predating `X-PAYMENT`.
        let header = extract_payment_header(req.headers(), TPriceTag::PAYMENT_HEADER_NAME)
            .or_else(|| extract_payment_header(req.headers(), "PAYMENT"))
            .ok_or(VerificationError::PaymentHeaderRequired(
                TPriceTag::PAYMENT_HEADER_NAME,
            ))?;
        let payment_payload = extract_payment_payload::<TPriceTag::PaymentPayload>(header)
            .ok_or(VerificationError::InvalidPaymentHeader)?;
        let payload_extensions = TPriceTag::payload_extensions(&payment_payload);

        let verify_request =
            TPriceTag::make_verify_request(payment_payload, &self.accepts, &self.resource)?;

        if self.settle_before_execution {
            // Settlement before execution: settle payment first, then call inner handler
            #[cfg(feature = "telemetry")]
            tracing::debug!("Settling payment before request execution");

            let settlement = self
                .settle_payment(&verify_request, &payload_extensions)
                .await?;

            let header_value = settlement_to_header(settlement)?;

            // Settlement succeeded, now execute the request
            let response = match Self::call_inner(inner, req).await {
                Ok(response) => response,
                Err(err) => return Ok(err.into_response()),
            };

            // Add payment response header
            let mut res = response;
            res.headers_mut().insert("X-Payment-Response", header_value);
            Ok(res.into_response())
        } else {
            // Settlement after execution (default): call inner handler first, then settle
            #[cfg(feature = "telemetry")]
            tracing::debug!("Settling payment after request execution");

            let verify_response = self.verify_payment(&verify_request).await?;

            TPriceTag::validate_verify_response(verify_response)?;

            let response = match Self::call_inner(inner, req).await {
                Ok(response) => response,
                Err(err) => return Ok(err.into_response()),
            };

            if response.status().is_client_error() || response.status().is_server_error() {
                return Ok(response.into_response());
            }

            let settlement = self
                .settle_payment(&verify_request, &payload_extensions)
                .await?;

            let header_value = settlement_to_header(settlement)?;

            let mut res = response;
            res.headers_mut().insert("X-Payment-Response", header_value);
            Ok(res.into_response())
        }
    }

    /// Verifies a payment with the facilitator.
    pub async fn verify_payment(
        &self,
        verify_request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, VerificationError> {
        let verify_response = self
            .facilitator
            .verify(verify_request)
            .await
            .map_err(|e| VerificationError::VerificationFailed(format!("{e}")))?;
        Ok(verify_response)
    }

    /// Settles a payment with the facilitator, then runs every registered
    /// extension's settle-hook and merges its contribution into
    /// `SettleResponse.extensions` before the caller encodes the header.
    ///
    /// `payload_extensions` is whatever the client echoed forward in
    /// `PaymentPayload.extensions` — the settle hooks see exactly that
    /// structure, not the server's own 402-time declarations, so a client
    /// augmentation like `payment-identifier.info.id` is visible to the hook
    /// that reads it.
    pub async fn settle_payment(
        &self,
        settle_request: &proto::SettleRequest,
        payload_extensions: &HashMap<String, serde_json::Value>,
    ) -> Result<proto::SettleResponse, PaygateError> {
        let settle_response = self
            .facilitator
            .settle(settle_request)
            .await
            .map_err(|e| PaygateError::Settlement(format!("{e}")))?;
        Ok(self.merge_settle_extensions(settle_response, payload_extensions))
    }

    /// Invokes `on_settle` for every registered extension and merges the
    /// results into the response's `extensions` object.
    fn merge_settle_extensions(
        &self,
        mut settle_response: proto::SettleResponse,
        payload_extensions: &HashMap<String, serde_json::Value>,
    ) -> proto::SettleResponse {
        let success = settle_response
            .0
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let network = settle_response
            .0
            .get("network")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let transaction = settle_response
            .0
            .get("transaction")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let payer = settle_response
            .0
            .get("payer")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let ctx = ExtSettleContext {
            payer,
            network,
            transaction,
            success,
        };
        let merged = self.extensions.on_settle_all(&ctx, payload_extensions);
        if !merged.is_empty() {
            if let Some(obj) = settle_response.0.as_object_mut() {
                let entry = obj
                    .entry("extensions")
                    .or_insert_with(|| json!({}));
                if let Some(entry) = entry.as_object_mut() {
                    for (key, value) in merged {
                        entry.insert(key, value);
                    }
                }
            }
        }
        settle_response
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Builds the paywall HTML response for a 402, embedding the JSON body
/// verbatim in a `<script>` tag so browser-side code can still read it.
fn html_paywall_response<T: serde::Serialize>(html: &str, json_body: &T) -> Response {
    let embedded = serde_json::to_string(json_body).unwrap_or_else(|_| "{}".to_string());
    let page = format!(
        "{html}\n<script type=\"application/json\" id=\"x402\">{embedded}</script>\n"
    );
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(Body::from(page))
        .expect("Fail to construct response")
}

/// Whether an `Accept` header value prefers `text/html` over `application/json`.
///
/// Used for paywall content negotiation: browsers navigating directly to a
/// priced endpoint send `Accept: text/html,...`, while x402-aware clients
/// send `Accept: application/json` or omit the header.
fn accepts_html(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(http::header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let html_pos = accept.find("text/html");
    let json_pos = accept.find("application/json");
    match (html_pos, json_pos) {
        (Some(h), Some(j)) => h < j,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Extracts the payment header value from the header map.
fn extract_payment_header<'a>(header_map: &'a HeaderMap, header_name: &'a str) -> Option<&'a [u8]> {
    header_map.get(header_name).map(|h| h.as_bytes())
}

/// Extracts and deserializes the payment payload from base64-encoded header bytes.
fn extract_payment_payload<T>(header_bytes: &[u8]) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    let base64 = Base64Bytes::from(header_bytes).decode().ok()?;
    let value = serde_json::from_slice(base64.as_ref()).ok()?;
    Some(value)
}

/// Converts a [`proto::SettleResponse`] into an HTTP header value.
///
/// Returns an error response if conversion fails.
fn settlement_to_header(settlement: proto::SettleResponse) -> Result<HeaderValue, PaygateError> {
    let json =
        serde_json::to_vec(&settlement).map_err(|err| PaygateError::Settlement(err.to_string()))?;
    let payment_header = Base64Bytes::encode(json);
    HeaderValue::from_bytes(payment_header.as_ref())
        .map_err(|err| PaygateError::Settlement(err.to_string()))
}

// ============================================================================
// PriceTagSource Trait and Implementations
// ============================================================================

/// Trait for types that can provide price tags for a request.
///
/// This trait abstracts over static and dynamic pricing strategies.
/// Implementations must be infallible - they always return price tags.
///
/// # Example
///
/// ```ignore
/// use x402_axum::paygate::{PriceTagSource, StaticPriceTags, DynamicPriceTags};
///
/// // Static pricing - same price for every request
/// let static_source = StaticPriceTags::new(vec![my_price_tag]);
///
/// // Dynamic pricing - compute price per-request
/// let dynamic_source = DynamicPriceTags::new(|headers, uri, base_url| async move {
///     vec![compute_price_tag(headers)]
/// });
/// ```
pub trait PriceTagSource {
    /// The concrete price tag type produced by this source.
    type PriceTag: PaygateProtocol;

    /// Resolves price tags for the given request context.
    ///
    /// This method is infallible - it must always return a non-empty vector of price tags.
    fn resolve(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        base_url: Option<&Url>,
    ) -> impl Future<Output = Vec<Self::PriceTag>> + Send;
}

// ============================================================================
// StaticPriceTags Implementation
// ============================================================================

/// Static price tag source - returns the same price tags for every request.
///
/// This is the default implementation used when calling `with_price_tag()`.
/// It simply stores a vector of price tags and returns clones on each request.
///
/// # Example
///
/// ```ignore
/// use x402_axum::paygate::StaticPriceTags;
///
/// let source = StaticPriceTags::new(vec![V1Eip155Exact::price_tag(pay_to, amount)]);
/// ```
#[derive(Clone, Debug)]
pub struct StaticPriceTags<TPriceTag> {
    tags: Arc<Vec<TPriceTag>>,
}

impl<TPriceTag> StaticPriceTags<TPriceTag> {
    /// Creates a new static price tag source from a vector of price tags.
    pub fn new(tags: Vec<TPriceTag>) -> Self {
        Self {
            tags: Arc::new(tags),
        }
    }

    /// Returns a reference to the stored price tags.
    pub fn tags(&self) -> &[TPriceTag] {
        &self.tags
    }
}

impl<TPriceTag> StaticPriceTags<TPriceTag>
where
    TPriceTag: Clone,
{
    /// Adds a price tag to the source.
    pub fn with_price_tag(mut self, tag: TPriceTag) -> Self {
        let mut tags = (*self.tags).clone();
        tags.push(tag);
        self.tags = Arc::new(tags);
        self
    }
}

impl<TPriceTag> PriceTagSource for StaticPriceTags<TPriceTag>
where
    TPriceTag: PaygateProtocol,
{
    type PriceTag = TPriceTag;

    async fn resolve(
        &self,
        _headers: &HeaderMap,
        _uri: &Uri,
        _base_url: Option<&Url>,
    ) -> Vec<Self::PriceTag> {
        // Simply clone the static tags
        (*self.tags).clone()
    }
}

// ============================================================================
// DynamicPriceTags Implementation
// ============================================================================

/// Internal type alias for the boxed dynamic pricing callback.
/// Users don't interact with this directly.
///
/// Uses higher-ranked trait bounds (HRTB) to express that the callback
/// works with any lifetime of the input references.
type BoxedDynamicPriceCallback<TPriceTag> = dyn for<'a> Fn(
        &'a HeaderMap,
        &'a Uri,
        Option<&'a Url>,
    ) -> Pin<Box<dyn Future<Output = Vec<TPriceTag>> + Send + 'a>>
    + Send
    + Sync;

/// Dynamic price tag source - computes price tags per-request via callback.
///
/// This implementation allows computing different prices based on request
/// headers, URI, or other runtime factors.
///
/// # Example
///
/// ```ignore
/// use alloy_primitives::address;
/// use x402_axum::paygate::DynamicPriceTags;
/// use x402_chain_eip155::V1Eip155Exact;
/// use x402_types::networks::USDC;
///
/// // Users write a simple async closure - no Box::pin needed!
/// let source = DynamicPriceTags::new(|headers, uri, _base_url| async move {
///     let is_premium = headers
///         .get("X-User-Tier")
///         .and_then(|v| v.to_str().ok())
///         .map(|v| v == "premium")
///         .unwrap_or(false);
///
///     let amount = if is_premium { "0.005" } else { "0.01" };
///     vec![V1Eip155Exact::price_tag(
///         address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"),
///         USDC::base_sepolia().parse(amount).unwrap()
///     )]
/// });
/// ```
pub struct DynamicPriceTags<TPriceTag> {
    callback: Arc<BoxedDynamicPriceCallback<TPriceTag>>,
}

impl<TPriceTag> Clone for DynamicPriceTags<TPriceTag> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<TPriceTag> std::fmt::Debug for DynamicPriceTags<TPriceTag> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicPriceTags")
            .field("callback", &"<callback>")
            .finish()
    }
}

impl<TPriceTag> DynamicPriceTags<TPriceTag> {
    /// Creates a new dynamic price source from an async closure.
    ///
    /// The closure receives request context and returns a vector of price tags.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use alloy_primitives::address;
    /// use x402_chain_eip155::V1Eip155Exact;
    /// use x402_types::networks::USDC;
    ///
    /// DynamicPriceTags::new(|_headers, _uri, _base_url| async move {
    ///     vec![V1Eip155Exact::price_tag(
    ///         address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"),
    ///         USDC::base_sepolia().parse("0.01").unwrap()
    ///     )]
    /// })
    /// ```
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(&HeaderMap, &Uri, Option<&Url>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<TPriceTag>> + Send + 'static,
    {
        Self {
            callback: Arc::new(move |headers, uri, base_url| {
                Box::pin(callback(headers, uri, base_url))
            }),
        }
    }
}

impl<TPriceTag> PriceTagSource for DynamicPriceTags<TPriceTag>
where
    TPriceTag: PaygateProtocol,
{
    type PriceTag = TPriceTag;

    async fn resolve(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        base_url: Option<&Url>,
    ) -> Vec<Self::PriceTag> {
        (self.callback)(headers, uri, base_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x402_extensions::registry::{ResourceServerExtension, SettleContext as ExtCtx};

    fn headers_with_accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::ACCEPT, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_html_prefers_html_when_listed_first() {
        let headers = headers_with_accept("text/html,application/json;q=0.9");
        assert!(accepts_html(&headers));
    }

    #[test]
    fn accepts_html_false_when_json_only() {
        let headers = headers_with_accept("application/json");
        assert!(!accepts_html(&headers));
    }

    #[test]
    fn accepts_html_false_when_json_precedes_html() {
        let headers = headers_with_accept("application/json, text/html");
        assert!(!accepts_html(&headers));
    }

    #[test]
    fn accepts_html_false_when_header_absent() {
        let headers = HeaderMap::new();
        assert!(!accepts_html(&headers));
    }

    #[test]
    fn extract_payment_header_prefers_primary_name() {
        let mut headers = HeaderMap::new();
        headers.insert("X-PAYMENT", HeaderValue::from_static("primary"));
        headers.insert("PAYMENT", HeaderValue::from_static("fallback"));
        let found = extract_payment_header(&headers, "X-PAYMENT")
            .or_else(|| extract_payment_header(&headers, "PAYMENT"));
        assert_eq!(found, Some("primary".as_bytes()));
    }

    #[test]
    fn extract_payment_header_falls_back_to_bare_payment() {
        let mut headers = HeaderMap::new();
        headers.insert("PAYMENT", HeaderValue::from_static("legacy"));
        let found = extract_payment_header(&headers, "X-PAYMENT")
            .or_else(|| extract_payment_header(&headers, "PAYMENT"));
        assert_eq!(found, Some("legacy".as_bytes()));
    }

    struct Stamp;

    impl ResourceServerExtension for Stamp {
        fn name(&self) -> &'static str {
            "stamp"
        }

        fn schema(&self) -> &serde_json::Value {
            static SCHEMA: std::sync::OnceLock<serde_json::Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| json!({"type": "object"}))
        }

        fn on_settle(
            &self,
            ctx: &ExtCtx,
            _declaration: Option<&serde_json::Value>,
        ) -> Option<serde_json::Value> {
            Some(json!({"payer": ctx.payer, "success": ctx.success}))
        }
    }

    fn test_paygate() -> Paygate<v1::PriceTag, crate::facilitator_client::FacilitatorClient> {
        Paygate {
            facilitator: crate::facilitator_client::FacilitatorClient::try_from(
                "https://facilitator.example/",
            )
            .unwrap(),
            settle_before_execution: false,
            accepts: Arc::new(vec![]),
            resource: v2::ResourceInfo {
                description: "".to_string(),
                mime_type: "application/json".to_string(),
                url: "https://example.com/paid".to_string(),
            },
            extensions: Arc::new(ExtensionRegistry::new().and_register(Stamp)),
            paywall_html: None,
        }
    }

    #[test]
    fn merge_settle_extensions_attaches_hook_output() {
        let paygate = test_paygate();
        let settle_response = proto::SettleResponse(json!({
            "success": true,
            "network": "eip155:8453",
            "transaction": "0xdead",
            "payer": "0xabc",
        }));
        let merged = paygate.merge_settle_extensions(settle_response, &HashMap::new());
        assert_eq!(merged.0["extensions"]["stamp"]["payer"], "0xabc");
        assert_eq!(merged.0["extensions"]["stamp"]["success"], true);
    }

    #[test]
    fn merge_settle_extensions_is_noop_without_registered_extensions() {
        let mut paygate = test_paygate();
        paygate.extensions = Arc::new(ExtensionRegistry::new());
        let settle_response = proto::SettleResponse(json!({
            "success": true,
            "network": "eip155:8453",
            "transaction": "0xdead",
            "payer": "0xabc",
        }));
        let merged = paygate.merge_settle_extensions(settle_response, &HashMap::new());
        assert!(merged.0.get("extensions").is_none());
    }

    #[test]
    fn v1_error_into_response_uses_paywall_html_when_accepted() {
        let err = PaygateError::Verification(VerificationError::PaymentHeaderRequired("X-PAYMENT"));
        let resource = v2::ResourceInfo {
            description: "".to_string(),
            mime_type: "application/json".to_string(),
            url: "https://example.com/paid".to_string(),
        };
        let response = <v1::PriceTag as PaygateProtocol>::error_into_response(
            err,
            &[],
            &resource,
            &HashMap::new(),
            true,
            Some("<h1>Pay up</h1>"),
        );
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("text/html"));
    }

    #[test]
    fn v1_error_into_response_stays_json_without_html_preference() {
        let err = PaygateError::Verification(VerificationError::PaymentHeaderRequired("X-PAYMENT"));
        let resource = v2::ResourceInfo {
            description: "".to_string(),
            mime_type: "application/json".to_string(),
            url: "https://example.com/paid".to_string(),
        };
        let response = <v1::PriceTag as PaygateProtocol>::error_into_response(
            err,
            &[],
            &resource,
            &HashMap::new(),
            false,
            Some("<h1>Pay up</h1>"),
        );
        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert_eq!(content_type, "application/json");
    }
}
