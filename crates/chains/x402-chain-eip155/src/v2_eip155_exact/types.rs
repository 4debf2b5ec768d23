//! Type definitions for the V2 EIP-155 "exact" payment scheme.
//!
//! This module re-exports types from V1 and defines V2-specific wire format
//! types for EIP-3009 and Permit2 based payments on EVM chains.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use x402_types::proto;
use x402_types::proto::v2;
use x402_types::proto::PaymentVerificationError;
use x402_types::scheme::X402SchemeFacilitatorError;
use x402_types::timestamp::UnixTimestamp;

use crate::chain::{AssetTransferMethod, ChecksummedAddress};
use crate::chain::permit2::Permit2Payload;

/// Re-export the "exact" scheme identifier from V1 (same for both versions).
pub use crate::v1_eip155_exact::types::{ExactEvmPayload as Eip3009Payload, ExactScheme};

/// Type alias for V2 verify requests using the exact EVM payment scheme.
pub type VerifyRequest = v2::VerifyRequest<PaymentPayload, PaymentRequirements>;

/// Type alias for V2 settle requests (same structure as verify requests).
pub type SettleRequest = VerifyRequest;

/// Type alias for V2 payment payloads with embedded requirements and EVM-specific data.
pub type PaymentPayload<TPaymentRequirements = PaymentRequirements> =
    v2::PaymentPayload<TPaymentRequirements, ExactEvmPayload>;

/// Type alias for V2 payment requirements with EVM-specific types.
///
/// V2 uses CAIP-2 chain IDs and embeds requirements directly in the payload,
/// unlike V1 which uses network names and separate requirement objects.
pub type PaymentRequirements =
    v2::PaymentRequirements<ExactScheme, U256, ChecksummedAddress, AssetTransferMethod>;

/// Payment requirements narrowed to the EIP-3009 sub-scheme.
pub type Eip3009PaymentRequirements = PaymentRequirements;

/// Payment requirements narrowed to the Permit2 sub-scheme.
pub type Permit2PaymentRequirements = PaymentRequirements;

/// Payment payload narrowed to the EIP-3009 sub-scheme.
pub type Eip3009PaymentPayload = v2::PaymentPayload<Eip3009PaymentRequirements, Eip3009Payload>;

/// Payment payload narrowed to the Permit2 sub-scheme.
pub type Permit2PaymentPayload = v2::PaymentPayload<Permit2PaymentRequirements, Permit2Payload>;

/// Payment requirements narrowed to the ERC-2612 `permit` sub-scheme.
pub type PermitPaymentRequirements = PaymentRequirements;

/// Payment payload narrowed to the ERC-2612 `permit` sub-scheme.
pub type PermitPaymentPayload = v2::PaymentPayload<PermitPaymentRequirements, PermitPayload>;

/// Full payload required to authorize an ERC-2612 `permit` + `transferFrom` transfer.
///
/// Unlike EIP-3009 and Permit2, the ERC-2612 `Permit` message only grants an
/// allowance to `spender` — it does not bind a recipient. The facilitator's own
/// signer address is always used as `spender`, and executes `transferFrom` to
/// `accepted.pay_to` once the allowance has been granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitPayload {
    /// The EOA signature over the EIP-712 `Permit` message.
    pub signature: Bytes,
    /// The structured data that was signed.
    pub authorization: PermitAuthorization,
}

/// EIP-712 structured data for an ERC-2612 `permit` call.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitAuthorization {
    /// The token owner granting the allowance.
    pub owner: Address,
    /// The address allowed to spend the tokens — the facilitator's signer.
    pub spender: Address,
    /// The authorized allowance amount, in the token's smallest unit.
    #[serde(with = "crate::chain::decimal_u256")]
    pub value: U256,
    /// The nonce from the token's `nonces(owner)` at the time of signing.
    #[serde(with = "crate::chain::decimal_u256")]
    pub nonce: U256,
    /// The permit's expiry.
    pub deadline: UnixTimestamp,
}

/// The scheme-specific wire payload, discriminated by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExactEvmPayload {
    Eip3009(Eip3009Payload),
    Permit2(Permit2Payload),
    Permit(PermitPayload),
}

/// A verify request dispatched to the sub-scheme its payload actually carries.
pub enum FacilitatorVerifyRequest {
    Eip3009 {
        payment_payload: Eip3009PaymentPayload,
        payment_requirements: Eip3009PaymentRequirements,
        x402_version: v2::X402Version2,
    },
    Permit2 {
        payment_payload: Permit2PaymentPayload,
        payment_requirements: Permit2PaymentRequirements,
        x402_version: v2::X402Version2,
    },
    Permit {
        payment_payload: PermitPaymentPayload,
        payment_requirements: PermitPaymentRequirements,
        x402_version: v2::X402Version2,
    },
}

/// A settle request dispatched to the sub-scheme its payload actually carries.
pub type FacilitatorSettleRequest = FacilitatorVerifyRequest;

impl TryFrom<proto::VerifyRequest> for FacilitatorVerifyRequest {
    type Error = X402SchemeFacilitatorError;

    fn try_from(request: proto::VerifyRequest) -> Result<Self, Self::Error> {
        let parsed: VerifyRequest = serde_json::from_str(request.as_str())
            .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
        let x402_version = parsed.x402_version;
        let payment_requirements = parsed.payment_requirements;
        let payment_payload = parsed.payment_payload;
        match payment_payload.payload {
            ExactEvmPayload::Eip3009(inner) => Ok(FacilitatorVerifyRequest::Eip3009 {
                payment_payload: v2::PaymentPayload {
                    accepted: payment_payload.accepted,
                    payload: inner,
                    resource: payment_payload.resource,
                    x402_version: payment_payload.x402_version,
                    extensions: payment_payload.extensions,
                },
                payment_requirements,
                x402_version,
            }),
            ExactEvmPayload::Permit2(inner) => Ok(FacilitatorVerifyRequest::Permit2 {
                payment_payload: v2::PaymentPayload {
                    accepted: payment_payload.accepted,
                    payload: inner,
                    resource: payment_payload.resource,
                    x402_version: payment_payload.x402_version,
                    extensions: payment_payload.extensions,
                },
                payment_requirements,
                x402_version,
            }),
            ExactEvmPayload::Permit(inner) => Ok(FacilitatorVerifyRequest::Permit {
                payment_payload: v2::PaymentPayload {
                    accepted: payment_payload.accepted,
                    payload: inner,
                    resource: payment_payload.resource,
                    x402_version: payment_payload.x402_version,
                    extensions: payment_payload.extensions,
                },
                payment_requirements,
                x402_version,
            }),
        }
    }
}

#[cfg(any(feature = "facilitator", feature = "client"))]
pub mod facilitator_client_only {
    use alloy_sol_types::sol;

    sol!(
        #[allow(missing_docs)]
        #[allow(clippy::too_many_arguments)]
        #[derive(Debug)]
        #[sol(rpc)]
        X402ExactPermit2Proxy,
        "abi/X402ExactPermit2Proxy.json"
    );

    sol!(
        /// Signature struct used to settle through [`X402ExactPermit2Proxy`].
        #[allow(clippy::too_many_arguments)]
        #[derive(Debug)]
        struct PermitWitnessTransferFrom {
            ISignatureTransfer.TokenPermissions permitted;
            address spender;
            uint256 nonce;
            uint256 deadline;
            x402BasePermit2Proxy.Witness witness;
        }
    );

    sol!(
        /// EIP-712 message signed for an ERC-2612 `permit` call.
        #[derive(Debug)]
        struct Permit {
            address owner;
            address spender;
            uint256 value;
            uint256 nonce;
            uint256 deadline;
        }
    );
}

#[cfg(any(feature = "facilitator", feature = "client"))]
pub use facilitator_client_only::*;
