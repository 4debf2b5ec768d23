//! Protocol types for x402 payment messages.
//!
//! This module defines the wire format types used in the x402 protocol for
//! communication between buyers, sellers, and facilitators. It supports both
//! protocol version 1 (V1) and version 2 (V2).
//!
//! # Protocol Versions
//!
//! - **V1** ([`v1`]): Original protocol with network names and simpler structure
//! - **V2** ([`v2`]): Enhanced protocol with CAIP-2 chain IDs and richer metadata
//!
//! # Key Types
//!
//! - [`SupportedPaymentKind`] - Describes a payment method supported by a facilitator
//! - [`SupportedResponse`] - Response from facilitator's `/supported` endpoint
//! - [`VerifyRequest`] / [`VerifyResponse`] - Payment verification messages
//! - [`SettleRequest`] / [`SettleResponse`] - Payment settlement messages
//! - [`PaymentVerificationError`] - Errors that can occur during verification
//! - [`PaymentProblem`] - Structured error response for payment failures
//!
//! # Wire Format
//!
//! All types serialize to JSON using camelCase field names. The protocol version
//! is indicated by the `x402Version` field in payment payloads.

use serde::{Deserialize, Serialize};
use serde_with::{VecSkipError, serde_as};
use std::collections::HashMap;

use crate::chain::ChainId;
use crate::scheme::SchemeHandlerSlug;

pub mod util;
pub mod v1;
pub mod v2;

/// Trait for types that have both V1 and V2 protocol variants.
///
/// This trait enables generic handling of protocol-versioned types through
/// the [`ProtocolVersioned`] enum.
pub trait ProtocolV {
    /// The V1 protocol variant of this type.
    type V1;
    /// The V2 protocol variant of this type.
    type V2;
}

/// A versioned protocol type that can be either V1 or V2.
///
/// This enum wraps protocol-specific types to allow handling both versions
/// in a unified way.
pub enum ProtocolVersioned<T>
where
    T: ProtocolV,
{
    /// Protocol version 1 variant.
    #[allow(dead_code)]
    V1(T::V1),
    /// Protocol version 2 variant.
    #[allow(dead_code)]
    V2(T::V2),
}

/// Describes a payment method supported by a facilitator.
///
/// This type is returned in the [`SupportedResponse`] to indicate what
/// payment schemes, networks, and protocol versions a facilitator can handle.
///
/// # Example
///
/// ```json
/// {
///   "x402Version": 2,
///   "scheme": "exact",
///   "network": "eip155:8453"
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    /// The x402 protocol version (1 or 2).
    pub x402_version: u8,
    /// The payment scheme identifier (e.g., "exact").
    pub scheme: String,
    /// The network identifier (CAIP-2 chain ID for V2, network name for V1).
    pub network: String,
    /// Optional scheme-specific extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response from a facilitator's `/supported` endpoint.
///
/// This response tells clients what payment methods the facilitator supports,
/// including protocol versions, schemes, networks, and signer addresses.
///
/// # Example
///
/// ```json
/// {
///   "kinds": [
///     { "x402Version": 2, "scheme": "exact", "network": "eip155:8453" }
///   ],
///   "extensions": [],
///   "signers": {
///     "eip155:8453": ["0x1234..."]
///   }
/// }
/// ```
#[serde_as]
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)] // Public for consumption by downstream crates.
pub struct SupportedResponse {
    /// List of supported payment kinds.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedPaymentKind>,
    /// List of supported protocol extensions.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Map of chain IDs to signer addresses for that chain.
    #[serde(default)]
    pub signers: HashMap<ChainId, Vec<String>>,
}

/// Request to verify a payment before settlement.
///
/// This wrapper contains the payment payload and requirements sent by a client
/// to a facilitator for verification. The facilitator checks that the payment
/// authorization is valid, properly signed, and matches the requirements.
///
/// The inner JSON structure varies by protocol version and scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest(Box<serde_json::value::RawValue>);

/// Request to settle a verified payment on-chain.
///
/// This is the same structure as [`VerifyRequest`], containing the payment
/// payload that was previously verified.
pub type SettleRequest = VerifyRequest;

impl From<Box<serde_json::value::RawValue>> for VerifyRequest {
    fn from(value: Box<serde_json::value::RawValue>) -> Self {
        Self(value)
    }
}

impl VerifyRequest {
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Parses the wrapped raw JSON into an owned [`serde_json::Value`].
    ///
    /// The wrapped bytes are already known-valid JSON (they came from either
    /// an incoming HTTP body or a prior `serde_json::to_value` call), so this
    /// only fails if the caller somehow constructed a `VerifyRequest` from
    /// invalid bytes directly.
    pub fn into_json(self) -> serde_json::Value {
        serde_json::from_str(self.0.get()).unwrap_or(serde_json::Value::Null)
    }

    /// Builds a [`VerifyRequest`] from an already-serialized value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw = serde_json::value::to_raw_value(&value)?;
        Ok(Self(raw))
    }

    /// Reads the bare `x402Version` field without committing to a full V1/V2 parse.
    ///
    /// Used to distinguish "version we've never heard of" (→ `invalid_x402_version`)
    /// from "version we know but scheme/network is unsupported" (→ `unsupported_scheme`),
    /// which [`Self::scheme_handler_slug`] otherwise collapses into one `None`.
    pub fn x402_version_raw(&self) -> Option<u8> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Versioned {
            x402_version: u8,
        }
        serde_json::from_str::<Versioned>(self.as_str())
            .ok()
            .map(|v| v.x402_version)
    }

    /// Extracts the scheme handler slug from the request.
    ///
    /// This determines which scheme handler should process this payment
    /// based on the protocol version, chain ID, and scheme name.
    ///
    /// Returns `None` if the request format is invalid or the scheme is unknown.
    pub fn scheme_handler_slug(&self) -> Option<SchemeHandlerSlug> {
        #[derive(Debug, Deserialize, Serialize)]
        #[serde(untagged)]
        enum VerifyRequestWire {
            #[serde(rename_all = "camelCase")]
            V1 {
                x402_version: v1::X402Version1,
                payment_payload: PaymentPayloadV1,
            },
            #[serde(rename_all = "camelCase")]
            V2 {
                x402_version: v2::X402Version2,
                payment_payload: PaymentPayloadV2,
            },
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        struct PaymentPayloadV1 {
            pub network: String,
            pub scheme: String,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        struct PaymentPayloadV2 {
            pub accepted: PaymentPayloadV2Accepted,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        struct PaymentPayloadV2Accepted {
            pub network: ChainId,
            pub scheme: String,
        }

        let wire = serde_json::from_str::<VerifyRequestWire>(self.as_str()).ok()?;
        match wire {
            VerifyRequestWire::V1 {
                payment_payload,
                x402_version,
            } => {
                let network_name = payment_payload.network;
                let chain_id = ChainId::from_network_name(&network_name)?;
                let scheme = payment_payload.scheme;
                let slug = SchemeHandlerSlug::new(chain_id, x402_version.into(), scheme);
                Some(slug)
            }
            VerifyRequestWire::V2 {
                payment_payload,
                x402_version,
            } => {
                let chain_id = payment_payload.accepted.network;
                let scheme = payment_payload.accepted.scheme;
                let slug = SchemeHandlerSlug::new(chain_id, x402_version.into(), scheme);
                Some(slug)
            }
        }
    }
}

/// Response from a payment verification request.
///
/// Contains the verification result as JSON. The structure varies by
/// protocol version and scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse(pub serde_json::Value);

/// Response from a payment settlement request.
///
/// Contains the settlement result as JSON, typically including the
/// transaction hash if settlement was successful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleResponse(pub serde_json::Value);

/// Errors that can occur during payment verification.
///
/// These errors are returned when a payment fails validation checks
/// performed by the facilitator before settlement.
#[derive(Debug, thiserror::Error)]
pub enum PaymentVerificationError {
    /// The payment payload format is invalid or malformed.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// The payment amount doesn't match the requirements, for schemes with no
    /// finer-grained amount-mismatch reason of their own (e.g. permit/permit2).
    #[error("payment amount {sent} does not satisfy required amount {required}")]
    InvalidPaymentAmount { required: String, sent: String },
    /// The exact-EVM authorization's signed `value` is less than `maxAmountRequired`.
    #[error("authorization value {sent} is less than required amount {required}")]
    InvalidExactEvmAuthorizationValue { required: String, sent: String },
    /// The payment authorization's `validAfter` timestamp is in the future.
    #[error("Payment authorization is not yet valid")]
    Early,
    /// The payment authorization's `validBefore` timestamp has passed.
    #[error("Payment authorization is expired")]
    Expired,
    /// The payment's chain ID doesn't match the requirements.
    #[error("Payment chain id is invalid with respect to the payment requirements")]
    ChainIdMismatch,
    /// The payment recipient doesn't match the requirements, for schemes with no
    /// finer-grained recipient-mismatch reason of their own.
    #[error("recipient {actual} does not match required recipient {expected}")]
    RecipientMismatch { expected: String, actual: String },
    /// The payment asset (token) doesn't match the requirements.
    #[error("asset {actual} does not match required asset {expected}")]
    AssetMismatch { expected: String, actual: String },
    /// The payer's on-chain balance is insufficient.
    #[error("available balance {available} is less than required amount {required}")]
    InsufficientFunds { available: String, required: String },
    #[error("allowance {available} is less than required amount {required}")]
    InsufficientAllowance { available: String, required: String },
    /// The payment signature is invalid.
    #[error("{0}")]
    InvalidSignature(String),
    /// Transaction simulation failed.
    #[error("{0}")]
    TransactionSimulation(String),
    /// The chain is not supported by this facilitator.
    #[error("Unsupported chain")]
    UnsupportedChain,
    /// The payment scheme is not supported by this facilitator.
    #[error("Unsupported scheme")]
    UnsupportedScheme,
    /// The accepted payment details don't match the requirements.
    #[error("Accepted does not match payment requirements")]
    AcceptedRequirementsMismatch,
    /// The `x402Version` on the request is not implemented by this facilitator.
    #[error("Unsupported x402 protocol version")]
    InvalidX402Version,
    /// The payment payload's scheme field does not match a known scheme identifier.
    #[error("Invalid scheme: {0}")]
    InvalidScheme(String),
    /// The advertised `PaymentRequirements` are internally inconsistent (e.g. bad network string).
    #[error("Invalid payment requirements: {0}")]
    InvalidPaymentRequirements(String),
    /// The on-chain state (e.g. nonce, ATA) is not in the state the payload assumes.
    #[error("Invalid transaction state: {0}")]
    InvalidTransactionState(String),
    /// SVM transfer instruction's mint doesn't match `requirements.asset` (§4.3 rule 4).
    #[error("transfer mint {actual} does not match required asset {expected}")]
    InvalidExactSvmMintMismatch { expected: String, actual: String },
    /// SVM transfer instruction's destination is not the payee's associated token
    /// account, derived from `(payTo, asset)` (§4.3 rule 4).
    #[error("transfer destination {actual} is not payTo's associated token account {expected}")]
    InvalidExactSvmTransferToIncorrectAta { expected: String, actual: String },
    /// SVM transfer instruction amount doesn't match `requirements.maxAmountRequired`
    /// (§4.3 rule 4).
    #[error("transfer amount {sent} does not match required amount {required}")]
    InvalidExactSvmAmountMismatch { required: String, sent: String },
    /// SVM transaction has the wrong instruction count for its shape (§4.3 rule 1).
    #[error("{0}")]
    InvalidExactSvmInstructionCount(String),
    /// SVM compute-budget instructions are malformed or exceed a facilitator ceiling
    /// (§4.3 rule 2).
    #[error("{0}")]
    InvalidExactSvmComputeBudget(String),
    /// SVM optional create-ATA instruction's payee or mint doesn't match
    /// `requirements.payTo`/`requirements.asset` (§4.3 rule 3).
    #[error("create-ATA instruction targets {actual}, expected {expected}")]
    InvalidExactSvmCreateAtaMismatch { expected: String, actual: String },
    /// SVM payer's token account referenced by the transfer instruction doesn't exist
    /// (§4.3 rule 4).
    #[error("{0}")]
    InvalidExactSvmMissingSenderAccount(String),
    /// SVM fee payer appears as a token source/destination in an instruction, or is
    /// itself the token signer (§4.3 rule 5).
    #[error("{0}")]
    InvalidExactSvmFeePayer(String),
    /// SVM preflight transaction simulation failed (§4.3 rule 6).
    #[error("{0}")]
    InvalidExactSvmSimulationFailed(String),
}

impl AsPaymentProblem for PaymentVerificationError {
    fn as_payment_problem(&self) -> PaymentProblem {
        let problem = |reason: ErrorReason| PaymentProblem::new(reason, self.to_string());
        let unit_context = |unit: &str| serde_json::json!({ "unit": unit });
        match self {
            PaymentVerificationError::InvalidFormat(_) => problem(ErrorReason::InvalidFormat),
            PaymentVerificationError::InvalidPaymentAmount { required, sent } => {
                problem(ErrorReason::InvalidPaymentAmount).with_context(serde_json::json!({
                    "available": sent,
                    "cost": required,
                    "unit": "atomic",
                }))
            }
            PaymentVerificationError::InvalidExactEvmAuthorizationValue { required, sent } => {
                problem(ErrorReason::InvalidExactEvmPayloadAuthorizationValue).with_context(
                    serde_json::json!({
                        "available": sent,
                        "cost": required,
                        "unit": "atomic",
                    }),
                )
            }
            PaymentVerificationError::InsufficientFunds {
                available,
                required,
            } => problem(ErrorReason::InsufficientFunds).with_context(serde_json::json!({
                "available": available,
                "cost": required,
                "unit": "atomic",
            })),
            PaymentVerificationError::InsufficientAllowance {
                available,
                required,
            } => problem(ErrorReason::Permit2AllowanceRequired).with_context(serde_json::json!({
                "available": available,
                "cost": required,
                "unit": "atomic",
            })),
            PaymentVerificationError::Early => {
                problem(ErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter)
            }
            PaymentVerificationError::Expired => {
                problem(ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore)
            }
            PaymentVerificationError::ChainIdMismatch => problem(ErrorReason::ChainIdMismatch),
            PaymentVerificationError::RecipientMismatch { expected, actual } => {
                problem(ErrorReason::InvalidExactEvmPayloadRecipientMismatch).with_context(
                    serde_json::json!({ "expected": expected, "actual": actual }),
                )
            }
            PaymentVerificationError::AssetMismatch { expected, actual } => {
                problem(ErrorReason::AssetMismatch)
                    .with_context(serde_json::json!({ "expected": expected, "actual": actual }))
            }
            PaymentVerificationError::InvalidSignature(_) => {
                problem(ErrorReason::InvalidExactEvmPayloadSignature)
            }
            PaymentVerificationError::TransactionSimulation(_) => {
                problem(ErrorReason::TransactionSimulation)
            }
            PaymentVerificationError::UnsupportedChain => problem(ErrorReason::UnsupportedChain),
            PaymentVerificationError::UnsupportedScheme => problem(ErrorReason::UnsupportedScheme),
            PaymentVerificationError::AcceptedRequirementsMismatch => {
                problem(ErrorReason::AcceptedRequirementsMismatch)
            }
            PaymentVerificationError::InvalidX402Version => {
                problem(ErrorReason::InvalidX402Version)
            }
            PaymentVerificationError::InvalidScheme(_) => problem(ErrorReason::InvalidScheme),
            PaymentVerificationError::InvalidPaymentRequirements(_) => {
                problem(ErrorReason::InvalidPaymentRequirements)
            }
            PaymentVerificationError::InvalidTransactionState(_) => {
                problem(ErrorReason::InvalidTransactionState)
            }
            PaymentVerificationError::InvalidExactSvmMintMismatch { expected, actual } => {
                problem(ErrorReason::InvalidExactSvmPayloadMintMismatch).with_context(
                    serde_json::json!({ "expected": expected, "actual": actual }),
                )
            }
            PaymentVerificationError::InvalidExactSvmTransferToIncorrectAta {
                expected,
                actual,
            } => problem(ErrorReason::InvalidExactSvmPayloadTransactionTransferToIncorrectAta)
                .with_context(serde_json::json!({ "expected": expected, "actual": actual })),
            PaymentVerificationError::InvalidExactSvmAmountMismatch { required, sent } => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionAmountMismatch).with_context(
                    serde_json::json!({
                        "available": sent,
                        "cost": required,
                        "unit": "atomic",
                    }),
                )
            }
            PaymentVerificationError::InvalidExactSvmInstructionCount(_) => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionInstructionCount)
            }
            PaymentVerificationError::InvalidExactSvmComputeBudget(_) => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionComputeBudget)
            }
            PaymentVerificationError::InvalidExactSvmCreateAtaMismatch { expected, actual } => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionCreateAtaMismatch)
                    .with_context(serde_json::json!({ "expected": expected, "actual": actual }))
            }
            PaymentVerificationError::InvalidExactSvmMissingSenderAccount(_) => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionMissingSenderAccount)
            }
            PaymentVerificationError::InvalidExactSvmFeePayer(_) => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionFeePayer)
            }
            PaymentVerificationError::InvalidExactSvmSimulationFailed(_) => {
                problem(ErrorReason::InvalidExactSvmPayloadTransactionSimulationFailed)
                    .with_context(unit_context("atomic"))
            }
        }
    }
}

impl From<serde_json::Error> for PaymentVerificationError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidFormat(value.to_string())
    }
}

/// Machine-readable error reason codes for payment failures.
///
/// These codes are used in error responses to allow clients to
/// programmatically handle different failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The payment payload format is invalid.
    InvalidFormat,
    /// The payment amount is incorrect, for schemes with no finer-grained
    /// amount-mismatch reason of their own.
    InvalidPaymentAmount,
    /// The chain ID doesn't match.
    ChainIdMismatch,
    /// The token asset doesn't match.
    AssetMismatch,
    /// The accepted details don't match requirements.
    AcceptedRequirementsMismatch,
    /// Transaction simulation failed.
    TransactionSimulation,
    /// Insufficient on-chain balance.
    InsufficientFunds,
    /// Insufficient allowance.
    Permit2AllowanceRequired,
    /// The exact-EVM authorization signature is invalid.
    InvalidExactEvmPayloadSignature,
    /// The exact-EVM authorization's `validAfter` is in the future.
    InvalidExactEvmPayloadAuthorizationValidAfter,
    /// The exact-EVM authorization's `validBefore` has passed.
    InvalidExactEvmPayloadAuthorizationValidBefore,
    /// The exact-EVM authorization's signed value is less than `maxAmountRequired`.
    InvalidExactEvmPayloadAuthorizationValue,
    /// The exact-EVM payload's recipient doesn't match `payTo`.
    InvalidExactEvmPayloadRecipientMismatch,
    /// The SVM transaction has the wrong instruction count for its shape.
    InvalidExactSvmPayloadTransactionInstructionCount,
    /// The SVM transaction's compute-budget instructions are malformed or exceed
    /// a facilitator ceiling.
    InvalidExactSvmPayloadTransactionComputeBudget,
    /// The SVM optional create-ATA instruction's payee or mint doesn't match
    /// `payTo`/`asset`.
    InvalidExactSvmPayloadTransactionCreateAtaMismatch,
    /// The SVM transfer instruction's mint doesn't match `asset`.
    InvalidExactSvmPayloadMintMismatch,
    /// The SVM transfer instruction's destination isn't the payee's ATA.
    InvalidExactSvmPayloadTransactionTransferToIncorrectAta,
    /// The SVM transfer instruction's amount doesn't match `maxAmountRequired`.
    InvalidExactSvmPayloadTransactionAmountMismatch,
    /// The SVM payer's token account referenced by the transfer doesn't exist.
    InvalidExactSvmPayloadTransactionMissingSenderAccount,
    /// The SVM fee payer is the token signer, or appears as a transfer source/destination.
    InvalidExactSvmPayloadTransactionFeePayer,
    /// SVM preflight transaction simulation failed.
    InvalidExactSvmPayloadTransactionSimulationFailed,
    /// The chain is not supported.
    UnsupportedChain,
    /// The scheme is not supported.
    UnsupportedScheme,
    /// The `x402Version` is not implemented by this facilitator.
    InvalidX402Version,
    /// The scheme identifier is malformed or unknown.
    InvalidScheme,
    /// The advertised payment requirements are internally inconsistent.
    InvalidPaymentRequirements,
    /// On-chain state precludes settlement (e.g. nonce already consumed).
    InvalidTransactionState,
    /// The facilitator could not be reached, or its response could not be parsed, during verify.
    UnexpectedVerifyError,
    /// The facilitator could not be reached, or its response could not be parsed, during settle.
    UnexpectedSettleError,
    /// Solana transaction confirmation passed `lastValidBlockHeight` before landing.
    SettleExactSvmBlockHeightExceeded,
    /// An unexpected error occurred.
    UnexpectedError,
}

/// Trait for converting errors into structured payment problems.
pub trait AsPaymentProblem {
    /// Converts this error into a [`PaymentProblem`].
    fn as_payment_problem(&self) -> PaymentProblem;
}

/// A structured payment error with reason code and details.
///
/// This type is used to return detailed error information to clients
/// when a payment fails verification or settlement.
pub struct PaymentProblem {
    /// The machine-readable error reason.
    reason: ErrorReason,
    /// Human-readable error details.
    details: String,
    /// Structured context (observed/expected values) for client self-diagnosis.
    context: Option<serde_json::Value>,
}

impl PaymentProblem {
    /// Creates a new payment problem with the given reason and details.
    pub fn new(reason: ErrorReason, details: String) -> Self {
        Self {
            reason,
            details,
            context: None,
        }
    }

    /// Attaches structured context to this problem.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns the error reason code.
    pub fn reason(&self) -> ErrorReason {
        self.reason
    }

    /// Returns the human-readable error details.
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Returns the structured context, if any was attached.
    pub fn context(&self) -> Option<&serde_json::Value> {
        self.context.as_ref()
    }
}

/// Protocol version marker for [`PaymentRequired`] responses.
pub struct PaymentRequiredV;

impl ProtocolV for PaymentRequiredV {
    type V1 = v1::PaymentRequired;
    type V2 = v2::PaymentRequired<OriginalJson>;
}

/// A payment required response that can be either V1 or V2.
///
/// This is returned with HTTP 402 status to indicate that payment is required.
pub type PaymentRequired = ProtocolVersioned<PaymentRequiredV>;

/// Verbatim JSON for PaymentRequirements and other places.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OriginalJson(pub Box<serde_json::value::RawValue>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_request_round_trips_raw_json() {
        let value = serde_json::json!({"x402Version": 2, "paymentPayload": {"accepted": {"network": "eip155:8453", "scheme": "exact"}}});
        let request = VerifyRequest::from_value(value.clone()).unwrap();
        assert_eq!(request.into_json(), value);
    }

    #[test]
    fn x402_version_raw_reads_known_versions() {
        let v1 = VerifyRequest::from_value(serde_json::json!({"x402Version": 1})).unwrap();
        assert_eq!(v1.x402_version_raw(), Some(1));
        let v2 = VerifyRequest::from_value(serde_json::json!({"x402Version": 2})).unwrap();
        assert_eq!(v2.x402_version_raw(), Some(2));
    }

    #[test]
    fn x402_version_raw_is_none_for_malformed_body() {
        let request = VerifyRequest::from_value(serde_json::json!({"nope": true})).unwrap();
        assert_eq!(request.x402_version_raw(), None);
    }

    #[test]
    fn scheme_handler_slug_resolves_v1_payload() {
        let request = VerifyRequest::from_value(serde_json::json!({
            "x402Version": 1,
            "paymentPayload": {"network": "base", "scheme": "exact"},
        }))
        .unwrap();
        let slug = request.scheme_handler_slug().unwrap();
        assert_eq!(slug.x402_version, 1);
        assert_eq!(slug.name, "exact");
        assert_eq!(slug.chain_id, "eip155:8453".parse().unwrap());
    }

    #[test]
    fn scheme_handler_slug_resolves_v2_payload() {
        let request = VerifyRequest::from_value(serde_json::json!({
            "x402Version": 2,
            "paymentPayload": {"accepted": {"network": "eip155:8453", "scheme": "exact"}},
        }))
        .unwrap();
        let slug = request.scheme_handler_slug().unwrap();
        assert_eq!(slug.x402_version, 2);
        assert_eq!(slug.chain_id, "eip155:8453".parse().unwrap());
    }

    #[test]
    fn scheme_handler_slug_is_none_for_unrecognized_shape() {
        let request = VerifyRequest::from_value(serde_json::json!({"nope": true})).unwrap();
        assert!(request.scheme_handler_slug().is_none());
    }

    #[test]
    fn payment_verification_error_maps_to_error_reason() {
        let error = PaymentVerificationError::RecipientMismatch {
            expected: "0xabc".to_string(),
            actual: "0xdef".to_string(),
        };
        let problem = error.as_payment_problem();
        assert_eq!(
            problem.reason(),
            ErrorReason::InvalidExactEvmPayloadRecipientMismatch
        );
        assert_eq!(problem.context().unwrap()["expected"], "0xabc");
    }

    #[test]
    fn payment_problem_carries_optional_context() {
        let problem = PaymentProblem::new(ErrorReason::InvalidPaymentAmount, "too low".to_string())
            .with_context(serde_json::json!({"expected": "1000000", "observed": "999999"}));
        assert_eq!(problem.details(), "too low");
        assert_eq!(problem.context().unwrap()["expected"], "1000000");
    }

    #[test]
    fn invalid_payment_amount_context_matches_value_mismatch_shape() {
        let error = PaymentVerificationError::InvalidExactEvmAuthorizationValue {
            required: "1000".to_string(),
            sent: "500".to_string(),
        };
        let problem = error.as_payment_problem();
        assert_eq!(
            problem.reason(),
            ErrorReason::InvalidExactEvmPayloadAuthorizationValue
        );
        let context = problem.context().unwrap();
        assert_eq!(context["available"], "500");
        assert_eq!(context["cost"], "1000");
        assert_eq!(context["unit"], "atomic");
    }

    #[test]
    fn error_reason_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorReason::InvalidExactEvmPayloadAuthorizationValue)
            .unwrap();
        assert_eq!(json, "\"invalid_exact_evm_payload_authorization_value\"");
        let json = serde_json::to_string(
            &ErrorReason::InvalidExactSvmPayloadTransactionTransferToIncorrectAta,
        )
        .unwrap();
        assert_eq!(
            json,
            "\"invalid_exact_svm_payload_transaction_transfer_to_incorrect_ata\""
        );
    }

    #[test]
    fn supported_response_skips_malformed_kinds() {
        let json = serde_json::json!({
            "kinds": [
                {"x402Version": 2, "scheme": "exact", "network": "eip155:8453"},
                {"notAKind": true},
            ],
        });
        let response: SupportedResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.kinds.len(), 1);
    }
}
