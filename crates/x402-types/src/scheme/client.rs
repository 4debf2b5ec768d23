//! Client-side scheme registry: the payer-side mirror of [`super::X402SchemeFacilitator`].
//!
//! Where a facilitator-side [`super::X402SchemeFacilitator`] verifies and settles a
//! payment that has already been constructed, an [`X402SchemeClient`] goes the other
//! way: given a [`proto::PaymentRequired`] challenge, it produces the [`PaymentCandidate`]s
//! it is able to pay, each carrying a [`PaymentCandidateSigner`] that knows how to sign
//! and encode the scheme-specific payload on demand.
//!
//! HTTP-client crates (e.g. `x402-reqwest`) register one [`X402SchemeClient`] per
//! chain/version/scheme they support, collect candidates from every registered client,
//! and use a [`PaymentSelector`] to pick one.

use alloy_primitives::U256;

use crate::chain::ChainId;
use crate::proto;
use crate::scheme::X402SchemeId;

/// A payment option a registered [`X402SchemeClient`] is able to satisfy.
///
/// Built by matching a client's capabilities (signer, chain, scheme) against one
/// entry of a [`proto::PaymentRequired`] challenge's `accepts[]`.
pub struct PaymentCandidate {
    /// The chain this candidate would pay on.
    pub chain_id: ChainId,
    /// The asset (token contract address, or `"native"`) to pay with.
    pub asset: String,
    /// The atomic-unit amount this candidate would authorize.
    pub amount: U256,
    /// The payment scheme identifier (e.g. `"exact"`).
    pub scheme: String,
    /// The x402 protocol version (1 or 2) this candidate targets.
    pub x402_version: u8,
    /// The recipient address this candidate would pay to.
    pub pay_to: String,
    /// Produces the base64-encoded `X-PAYMENT` payload for this candidate on demand.
    pub signer: Box<dyn PaymentCandidateSigner>,
}

impl PaymentCandidate {
    /// Signs and encodes this candidate's payment payload.
    ///
    /// Delegates to the candidate's [`PaymentCandidateSigner`]; signing only happens
    /// once a [`PaymentSelector`] has actually picked this candidate, never eagerly
    /// for every candidate a client produces.
    pub async fn sign(&self) -> Result<String, X402Error> {
        self.signer.sign_payment().await
    }
}

/// Produces the scheme-specific, base64-encoded `X-PAYMENT` header value for one
/// [`PaymentCandidate`], once selected.
///
/// Implementations typically close over a signer, the matched `PaymentRequirements`,
/// and whatever chain context (nonce, compute budget, timestamp window) the scheme
/// needs at signing time.
#[async_trait::async_trait]
pub trait PaymentCandidateSigner: Send + Sync {
    /// Signs the payment and returns the base64-encoded `PaymentPayload` JSON.
    async fn sign_payment(&self) -> Result<String, X402Error>;
}

/// A client-side handler for one chain/version/scheme combination.
///
/// Mirrors [`super::X402SchemeFacilitator`] on the payer's side: given a challenge,
/// it reports every `accepts[]` entry it can pay, each wrapped in a [`PaymentCandidate`].
pub trait X402SchemeClient: X402SchemeId + Send + Sync {
    /// Returns the payment candidates this client can satisfy from the given challenge.
    ///
    /// Returns an empty `Vec` if the challenge's protocol version, chain, or scheme
    /// does not match what this client handles.
    fn accept(&self, payment_required: &proto::PaymentRequired) -> Vec<PaymentCandidate>;
}

/// Chooses one [`PaymentCandidate`] out of those offered across all registered
/// [`X402SchemeClient`]s.
pub trait PaymentSelector {
    /// Selects a candidate, or `None` if none of the offered candidates are acceptable.
    fn select<'a>(&self, candidates: &'a [PaymentCandidate]) -> Option<&'a PaymentCandidate>;
}

/// The default [`PaymentSelector`]: picks the first candidate reported, in the order
/// scheme clients were registered and `accepts[]` was advertised.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl PaymentSelector for FirstMatch {
    fn select<'a>(&self, candidates: &'a [PaymentCandidate]) -> Option<&'a PaymentCandidate> {
        candidates.first()
    }
}

/// Errors raised while building or signing a client-side payment.
#[derive(Debug, thiserror::Error)]
pub enum X402Error {
    /// The challenge response could not be parsed into a [`proto::PaymentRequired`].
    #[error("{0}")]
    ParseError(String),
    /// No registered [`X402SchemeClient`] produced a usable [`PaymentCandidate`].
    #[error("no registered scheme client matches any advertised payment option")]
    NoMatchingPaymentOption,
    /// The original request could not be cloned to retry with a payment header
    /// (typically a streaming body).
    #[error("request is not cloneable, cannot retry with payment header")]
    RequestNotCloneable,
    /// Signing or encoding the scheme-specific payload failed.
    #[error("{0}")]
    SigningError(String),
}
