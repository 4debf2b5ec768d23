//! Extension registry for the x402 resource-server runtime.
//!
//! Mirrors the shape of [`x402_types::scheme::SchemeRegistry`]: extensions are
//! trait objects keyed by name into a single read-only-after-startup registry,
//! populated once and consulted at each of the three hook points a request
//! passes through (declare, enrich, settle).

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;

/// Static description of the route an extension is being asked to declare for.
///
/// Passed to [`ResourceServerExtension::declare`] when building the `accepts[]`
/// entries of a 402 response, before any request has arrived.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// The resource URL this payment requirement protects.
    pub resource: String,
    /// Human-readable description of the resource.
    pub description: String,
    /// MIME type of the resource response.
    pub mime_type: String,
    /// CAIP-2 or legacy network identifier the requirement targets.
    pub network: String,
    /// The V1 `outputSchema` for this route, if the server declared one.
    /// `bazaar` auto-translates this into its V2 `extensions` entry.
    pub output_schema: Option<serde_json::Value>,
}

/// Per-request context available when enriching an already-declared extension
/// block, e.g. to stamp a freshly generated nonce bound to this request.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    /// Inbound request headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// Absolute URL of the resource being requested.
    pub resource_url: String,
}

/// Context available once a payment has settled, passed to
/// [`ResourceServerExtension::on_settle`] so extensions can attach
/// settlement-derived data (e.g. a payment-identifier receipt) to the
/// `X-Payment-Response` header.
#[derive(Debug, Clone)]
pub struct SettleContext {
    /// Address that paid.
    pub payer: String,
    /// Network the settlement executed on.
    pub network: String,
    /// On-chain transaction identifier, empty string if settlement failed.
    pub transaction: String,
    /// Whether settlement succeeded.
    pub success: bool,
}

/// A pluggable x402 extension, as described in the protocol's extension
/// registry: a named JSON Schema-backed capability that can contribute to the
/// 402 response, react to per-request transport context, and attach data once
/// a payment settles.
///
/// Hooks are deliberately synchronous and side-effect-free beyond their
/// return value: extensions never depend on each other's state within one
/// request, and ordering between registered extensions is unspecified.
pub trait ResourceServerExtension: Send + Sync {
    /// The extension's registry name, e.g. `"bazaar"`, `"payment-identifier"`.
    fn name(&self) -> &'static str;

    /// JSON Schema (Draft 2020-12) describing this extension's payload shape.
    fn schema(&self) -> &serde_json::Value;

    /// Builds this extension's declaration for a route, or `None` if the
    /// extension has nothing to add for this route (e.g. `sign-in-with-x` on
    /// a route that doesn't require wallet-bound auth).
    fn declare(&self, _route: &RouteConfig) -> Option<serde_json::Value> {
        None
    }

    /// Mutates an already-declared block with per-request data, such as a
    /// freshly generated nonce. Called once per incoming request, after
    /// `declare` has produced the static shape.
    fn enrich_declaration(&self, _declaration: &mut serde_json::Value, _ctx: &TransportContext) {}

    /// Called after settlement completes (success or failure). Returns data
    /// to merge into `SettleResponse.extensions[name]`, or `None` to omit the
    /// extension from the settle response entirely.
    fn on_settle(
        &self,
        _ctx: &SettleContext,
        _declaration: Option<&serde_json::Value>,
    ) -> Option<serde_json::Value> {
        None
    }

    /// Validates an incoming extension payload against [`Self::schema`].
    /// Per the protocol's extension contract, a facilitator ignores a
    /// malformed extension payload rather than rejecting the request;
    /// callers should log a warning and proceed as if the payload were
    /// absent when this returns `false`.
    fn validate(&self, payload: &serde_json::Value) -> bool {
        match jsonschema::validator_for(self.schema()) {
            Ok(validator) => validator.is_valid(payload),
            Err(error) => {
                tracing::warn!(
                    extension = self.name(),
                    error = %error,
                    "extension schema failed to compile; treating payload as invalid"
                );
                false
            }
        }
    }
}

/// Registry of active extensions, built once at startup and read-only
/// thereafter.
#[derive(Default)]
pub struct ExtensionRegistry(HashMap<&'static str, Box<dyn ResourceServerExtension>>);

impl Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.keys().copied().collect();
        f.debug_tuple("ExtensionRegistry").field(&names).finish()
    }
}

impl ExtensionRegistry {
    /// Creates an empty extension registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension and returns self for chaining, mirroring
    /// `SchemeBlueprints::and_register`.
    pub fn and_register<E: ResourceServerExtension + 'static>(mut self, extension: E) -> Self {
        self.register(extension);
        self
    }

    /// Registers an extension.
    pub fn register<E: ResourceServerExtension + 'static>(&mut self, extension: E) {
        self.0.insert(extension.name(), Box::new(extension));
    }

    /// Looks up an extension by name.
    pub fn get(&self, name: &str) -> Option<&dyn ResourceServerExtension> {
        self.0.get(name).map(|v| v.deref())
    }

    /// Iterates over all registered extensions.
    pub fn values(&self) -> impl Iterator<Item = &dyn ResourceServerExtension> {
        self.0.values().map(|v| v.deref())
    }

    /// Calls [`ResourceServerExtension::declare`] on every registered
    /// extension for the given route, collecting the non-`None` results.
    pub fn declare_all(&self, route: &RouteConfig) -> HashMap<String, serde_json::Value> {
        self.values()
            .filter_map(|ext| ext.declare(route).map(|v| (ext.name().to_string(), v)))
            .collect()
    }

    /// Runs [`ResourceServerExtension::enrich_declaration`] in place over a
    /// set of previously declared extension blocks.
    pub fn enrich_all(
        &self,
        declarations: &mut HashMap<String, serde_json::Value>,
        ctx: &TransportContext,
    ) {
        for (name, declaration) in declarations.iter_mut() {
            if let Some(ext) = self.get(name) {
                ext.enrich_declaration(declaration, ctx);
            }
        }
    }

    /// Runs [`ResourceServerExtension::on_settle`] across every registered
    /// extension, collecting the non-`None` results to merge into
    /// `SettleResponse.extensions`.
    pub fn on_settle_all(
        &self,
        ctx: &SettleContext,
        declarations: &HashMap<String, serde_json::Value>,
    ) -> HashMap<String, serde_json::Value> {
        self.values()
            .filter_map(|ext| {
                ext.on_settle(ctx, declarations.get(ext.name()))
                    .map(|v| (ext.name().to_string(), v))
            })
            .collect()
    }

    /// Validates an inbound extension payload the facilitator consumes,
    /// returning `false` (and logging) if the extension is unknown or the
    /// payload fails schema validation.
    pub fn validate_consumed(&self, name: &str, payload: &serde_json::Value) -> bool {
        match self.get(name) {
            Some(ext) => ext.validate(payload),
            None => {
                tracing::warn!(extension = name, "unknown extension in payload; ignoring");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl ResourceServerExtension for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn schema(&self) -> &serde_json::Value {
            static SCHEMA: std::sync::OnceLock<serde_json::Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| json!({"type": "object"}))
        }

        fn declare(&self, route: &RouteConfig) -> Option<serde_json::Value> {
            Some(json!({"resource": route.resource}))
        }

        fn on_settle(
            &self,
            ctx: &SettleContext,
            _declaration: Option<&serde_json::Value>,
        ) -> Option<serde_json::Value> {
            Some(json!({"payer": ctx.payer}))
        }
    }

    #[test]
    fn declare_and_settle_round_trip() {
        let registry = ExtensionRegistry::new().and_register(Echo);
        let route = RouteConfig {
            resource: "https://example.com/paid".to_string(),
            description: "test".to_string(),
            mime_type: "application/json".to_string(),
            network: "eip155:8453".to_string(),
            output_schema: None,
        };
        let declared = registry.declare_all(&route);
        assert_eq!(declared["echo"]["resource"], "https://example.com/paid");

        let settle_ctx = SettleContext {
            payer: "0xabc".to_string(),
            network: "eip155:8453".to_string(),
            transaction: "0xdeadbeef".to_string(),
            success: true,
        };
        let settled = registry.on_settle_all(&settle_ctx, &declared);
        assert_eq!(settled["echo"]["payer"], "0xabc");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let registry = ExtensionRegistry::new();
        assert!(!registry.validate_consumed("does-not-exist", &json!({})));
    }
}
