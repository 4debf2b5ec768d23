//! Payment scheme registry for x402.
//!
//! This module provides the extensible scheme system that allows different
//! payment methods to be plugged into the x402 protocol. Each scheme defines
//! how payments are authorized, verified, and settled.
//!
//! # Architecture
//!
//! The scheme system has three main components:
//!
//! 1. **Blueprints** ([`SchemeBlueprints`]) - Factories that create scheme handlers
//!    for a given chain provider type `P`
//! 2. **Handlers** ([`X402SchemeFacilitator`]) - Process verify/settle requests
//!    once a blueprint has erased `P` into a trait object
//! 3. **Registry** ([`SchemeRegistry`]) - Maps chain+scheme combinations to handlers
//!
//! Blueprints are generic over the chain provider type so that a single scheme
//! (e.g. "exact" on EIP-155) can be built from whatever provider type a caller
//! has in hand - a concrete `Arc<Eip155ChainProvider>`, or a `&ChainProvider`
//! enum that a binary dispatches across chain families. Once built, the result
//! is an erased `Box<dyn X402SchemeFacilitator>` with no provider type left in
//! its signature, so handlers for unrelated chains can live in the same
//! [`SchemeRegistry`].
//!
//! # Implementing a Custom Scheme
//!
//! 1. Implement [`X402SchemeId`] to identify your scheme
//! 2. Implement [`X402SchemeFacilitatorBuilder<P>`] to create handlers from your
//!    provider type
//! 3. Implement [`X402SchemeFacilitator`] for the actual verification/settlement logic
//! 4. Register your scheme with [`SchemeBlueprints::register`]

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

use crate::chain::{ChainId, ChainProviderOps, ChainRegistry};
pub use crate::config::SchemeConfig;
use crate::proto;
use crate::proto::{AsPaymentProblem, ErrorReason, PaymentProblem, PaymentVerificationError};

pub mod client;

/// Trait for scheme handlers that process payment verification and settlement.
///
/// Implementations of this trait handle the core payment processing logic:
/// verifying that payments are valid and settling them on-chain.
#[async_trait::async_trait]
pub trait X402SchemeFacilitator: Send + Sync {
    /// Verifies a payment authorization without settling it.
    ///
    /// This checks that the payment is properly signed, matches the requirements,
    /// and the payer has sufficient funds.
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, X402SchemeFacilitatorError>;

    /// Settles a verified payment on-chain.
    ///
    /// This submits the payment transaction to the blockchain and waits
    /// for confirmation.
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, X402SchemeFacilitatorError>;

    /// Returns the payment methods supported by this handler.
    async fn supported(&self) -> Result<proto::SupportedResponse, X402SchemeFacilitatorError>;
}

/// Trait for identifying a payment scheme.
///
/// Each scheme has a unique identifier composed of the protocol version,
/// chain namespace, and scheme name.
pub trait X402SchemeId {
    /// Returns the x402 protocol version (1 or 2).
    fn x402_version(&self) -> u8 {
        2
    }
    /// Returns the chain namespace (e.g., "eip155", "solana").
    fn namespace(&self) -> &str;
    /// Returns the scheme name (e.g., "exact").
    fn scheme(&self) -> &str;
    /// Returns the full scheme identifier (e.g., "v2-eip155-exact").
    fn id(&self) -> String {
        format!(
            "v{}-{}-{}",
            self.x402_version(),
            self.namespace(),
            self.scheme(),
        )
    }
}

/// Trait for building scheme handlers from a chain provider of type `P`.
///
/// Implementations are generic over the provider type so that the same
/// scheme can be built both from a chain-specific provider (e.g.
/// `Arc<Eip155ChainProvider>`) and from whatever provider-dispatch enum a
/// binary uses to erase multiple chain families behind one type.
pub trait X402SchemeFacilitatorBuilder<P> {
    /// Creates a new scheme handler for the given chain provider.
    ///
    /// # Arguments
    ///
    /// * `provider` - The chain provider to use for on-chain operations
    /// * `config` - Optional scheme-specific configuration
    fn build(
        &self,
        provider: P,
        config: Option<serde_json::Value>,
    ) -> Result<Box<dyn X402SchemeFacilitator>, Box<dyn std::error::Error>>;
}

/// Marker trait for types that are both identifiable and buildable for provider `P`.
///
/// This combines [`X402SchemeId`] and [`X402SchemeFacilitatorBuilder<P>`] for
/// use in the blueprint registry.
pub trait X402SchemeBlueprint<P>: X402SchemeId + X402SchemeFacilitatorBuilder<P> {}
impl<T, P> X402SchemeBlueprint<P> for T where T: X402SchemeId + X402SchemeFacilitatorBuilder<P> {}

/// Errors that can occur during scheme operations.
#[derive(Debug, thiserror::Error)]
pub enum X402SchemeFacilitatorError {
    /// Payment verification failed.
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
    /// On-chain operation failed.
    #[error("Onchain error: {0}")]
    OnchainFailure(String),
}

impl AsPaymentProblem for X402SchemeFacilitatorError {
    fn as_payment_problem(&self) -> PaymentProblem {
        match self {
            X402SchemeFacilitatorError::PaymentVerification(e) => e.as_payment_problem(),
            X402SchemeFacilitatorError::OnchainFailure(e) => {
                PaymentProblem::new(ErrorReason::UnexpectedError, e.to_string())
            }
        }
    }
}

/// Registry of scheme blueprints (factories), generic over provider type `P`.
///
/// Blueprints are used to create scheme handlers for a specific chain provider
/// type. Register blueprints at startup, then use [`SchemeRegistry::build`] to
/// instantiate handlers for every configured chain.
pub struct SchemeBlueprints<P>(HashMap<String, Box<dyn X402SchemeBlueprint<P>>>);

impl<P> Default for SchemeBlueprints<P> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<P> Debug for SchemeBlueprints<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slugs: Vec<String> = self.0.keys().map(|s| s.to_string()).collect();
        f.debug_tuple("SchemeBlueprints").field(&slugs).finish()
    }
}

impl<P> SchemeBlueprints<P> {
    /// Creates an empty blueprint registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a blueprint and returns self for chaining.
    pub fn and_register<B: X402SchemeBlueprint<P> + 'static>(mut self, blueprint: B) -> Self {
        self.register(blueprint);
        self
    }

    /// Registers a scheme blueprint.
    pub fn register<B: X402SchemeBlueprint<P> + 'static>(&mut self, blueprint: B) {
        self.0.insert(blueprint.id(), Box::new(blueprint));
    }

    /// Gets a blueprint by its ID.
    pub fn get(&self, id: &str) -> Option<&dyn X402SchemeBlueprint<P>> {
        self.0.get(id).map(|v| v.deref())
    }
}

/// Unique identifier for a scheme handler instance.
///
/// Combines the chain ID, protocol version, and scheme name to uniquely
/// identify a handler that can process payments for a specific combination.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SchemeHandlerSlug {
    /// The chain this handler operates on.
    pub chain_id: ChainId,
    /// The x402 protocol version.
    pub x402_version: u8,
    /// The scheme name (e.g., "exact").
    pub name: String,
}

impl SchemeHandlerSlug {
    /// Creates a new scheme handler slug.
    pub fn new(chain_id: ChainId, x402_version: u8, name: String) -> Self {
        Self {
            chain_id,
            x402_version,
            name,
        }
    }
}

impl Display for SchemeHandlerSlug {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:v{}:{}",
            self.chain_id.namespace, self.chain_id.reference, self.x402_version, self.name
        )
    }
}

/// Registry of active scheme handlers.
///
/// Maps chain+scheme combinations to their handlers. Built from blueprints
/// and chain providers based on configuration. Unlike [`SchemeBlueprints<P>`],
/// this registry is not generic: every handler it holds has already had its
/// provider type erased into `Box<dyn X402SchemeFacilitator>` by
/// [`SchemeRegistry::build`], so handlers built from different provider types
/// (EVM, Solana, ...) can live together in one registry.
#[derive(Default)]
pub struct SchemeRegistry(HashMap<SchemeHandlerSlug, Box<dyn X402SchemeFacilitator>>);

impl Debug for SchemeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slugs: Vec<String> = self.0.keys().map(|s| s.to_string()).collect();
        f.debug_tuple("SchemeRegistry").field(&slugs).finish()
    }
}

impl SchemeRegistry {
    /// Builds a scheme registry from blueprints and configuration.
    ///
    /// For each enabled scheme in the config, this finds the matching blueprint
    /// and chain provider, then builds a handler. `P` is the chain provider
    /// type shared by `chains` and `blueprints` - callers that need to mix
    /// multiple chain families typically erase them behind a common enum
    /// first (see `x402_chain_eip155`/`x402_chain_solana` for the per-family
    /// provider types) and build blueprints generic over `&TheEnum`.
    pub fn build<P: ChainProviderOps>(
        chains: ChainRegistry<P>,
        blueprints: SchemeBlueprints<P>,
        config: &[SchemeConfig],
    ) -> Self
    where
        for<'a> SchemeBlueprints<&'a P>: Sized,
    {
        let mut handlers: HashMap<SchemeHandlerSlug, Box<dyn X402SchemeFacilitator>> =
            HashMap::with_capacity(config.len());
        for scheme_config in config {
            if !scheme_config.enabled {
                tracing::info!(
                    "Skipping disabled scheme {} for chains {}",
                    scheme_config.id,
                    scheme_config.chains
                );
                continue;
            }
            let blueprint = match blueprints.get(&scheme_config.id) {
                Some(blueprint) => blueprint,
                None => {
                    tracing::warn!("No scheme registered: {}", scheme_config.id);
                    continue;
                }
            };
            let chain_providers = chains.by_chain_id_pattern(&scheme_config.chains);
            if chain_providers.is_empty() {
                tracing::warn!("No chain provider found for {}", scheme_config.chains);
                continue;
            }

            for chain_provider in chain_providers {
                let chain_id = chain_provider.chain_id();
                let handler =
                    match blueprint.build(chain_provider, scheme_config.config.clone()) {
                        Ok(handler) => handler,
                        Err(err) => {
                            tracing::error!(
                                "Error building scheme handler for {}: {}",
                                scheme_config.id,
                                err
                            );
                            continue;
                        }
                    };
                let slug = SchemeHandlerSlug::new(
                    chain_id.clone(),
                    blueprint.x402_version(),
                    blueprint.scheme().to_string(),
                );
                tracing::info!(chain_id = %chain_id, scheme = %blueprint.scheme(), id = blueprint.id(), "Registered scheme handler");
                handlers.insert(slug, handler);
            }
        }
        Self(handlers)
    }

    /// Gets a handler by its slug.
    pub fn by_slug(&self, slug: &SchemeHandlerSlug) -> Option<&dyn X402SchemeFacilitator> {
        let handler = self.0.get(slug)?.deref();
        Some(handler)
    }

    /// Returns an iterator over all registered handlers.
    pub fn values(&self) -> impl Iterator<Item = &dyn X402SchemeFacilitator> {
        self.0.values().map(|v| v.deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyProvider;

    impl ChainProviderOps for DummyProvider {
        fn signer_addresses(&self) -> Vec<String> {
            Vec::new()
        }
        fn chain_id(&self) -> ChainId {
            "eip155:8453".parse().unwrap()
        }
    }

    struct DummyScheme;

    impl X402SchemeId for DummyScheme {
        fn namespace(&self) -> &str {
            "eip155"
        }
        fn scheme(&self) -> &str {
            "exact"
        }
    }

    impl X402SchemeFacilitatorBuilder<DummyProvider> for DummyScheme {
        fn build(
            &self,
            _provider: DummyProvider,
            _config: Option<serde_json::Value>,
        ) -> Result<Box<dyn X402SchemeFacilitator>, Box<dyn std::error::Error>> {
            Err("not built in this test".into())
        }
    }

    #[test]
    fn scheme_id_formats_as_version_namespace_scheme() {
        assert_eq!(DummyScheme.id(), "v2-eip155-exact");
    }

    #[test]
    fn blueprints_register_and_lookup_by_id() {
        let blueprints = SchemeBlueprints::<DummyProvider>::new().and_register(DummyScheme);
        assert!(blueprints.get("v2-eip155-exact").is_some());
        assert!(blueprints.get("v2-solana-exact").is_none());
    }

    #[test]
    fn scheme_handler_slug_displays_as_colon_separated_path() {
        let chain_id: ChainId = "eip155:8453".parse().unwrap();
        let slug = SchemeHandlerSlug::new(chain_id, 2, "exact".to_string());
        assert_eq!(slug.to_string(), "eip155:8453:v2:exact");
    }

    #[test]
    fn onchain_failure_maps_to_unexpected_error_reason() {
        let error = X402SchemeFacilitatorError::OnchainFailure("rpc timeout".to_string());
        let problem = error.as_payment_problem();
        assert_eq!(problem.reason(), ErrorReason::UnexpectedError);
    }

    #[test]
    fn payment_verification_error_passes_through_reason() {
        let error: X402SchemeFacilitatorError = PaymentVerificationError::Expired.into();
        let problem = error.as_payment_problem();
        assert_eq!(
            problem.reason(),
            ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore
        );
    }

    #[test]
    fn registry_build_skips_disabled_schemes() {
        let mut providers = HashMap::new();
        providers.insert("eip155:8453".parse().unwrap(), DummyProvider);
        let chains = ChainRegistry::new(providers);
        let blueprints = SchemeBlueprints::<DummyProvider>::new().and_register(DummyScheme);
        let config = vec![SchemeConfig {
            id: "v2-eip155-exact".to_string(),
            chains: "eip155:8453".parse().unwrap(),
            enabled: false,
            config: None,
        }];
        let registry = SchemeRegistry::build(chains, blueprints, &config);
        assert!(registry.values().next().is_none());
    }
}
