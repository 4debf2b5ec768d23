#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Extension registry for the x402 payment protocol.
//!
//! An x402 extension is a named, JSON Schema-backed capability that plugs
//! into three points of the resource-server request lifecycle: declaring
//! itself in a 402 response (`declare`), enriching that declaration with
//! per-request data (`enrich_declaration`), and attaching data to the settle
//! response once a payment completes (`on_settle`). See
//! [`registry::ResourceServerExtension`] for the trait and
//! [`registry::ExtensionRegistry`] for the registry that holds them.
//!
//! # Bundled Extensions
//!
//! | Extension | Module | Purpose |
//! |-----------|--------|---------|
//! | `bazaar` | [`bazaar`] | Discovery: translates V1 `outputSchema` into V2 `extensions` |
//! | `payment-identifier` | [`payment_identifier`] | Idempotency key for correlating retried payments |
//! | `offer-receipt` | [`offer_receipt`] | RFC 8785 canonicalization for signed offers/receipts |
//! | `sign-in-with-x` | [`sign_in_with_x`] | CAIP-122 wallet authentication challenge |
//! | `erc20-approval-gas-sponsoring` | [`erc20_approval_gas_sponsoring`] | Facilitator-paid Permit2 max-approval |
//! | `8004-reputation` | [`reputation_8004`] | Agent identity and settlement attestation |
//!
//! # Example
//!
//! ```
//! use x402_extensions::registry::ExtensionRegistry;
//! use x402_extensions::{bazaar::BazaarExtension, payment_identifier::PaymentIdentifierExtension};
//!
//! let registry = ExtensionRegistry::new()
//!     .and_register(BazaarExtension)
//!     .and_register(PaymentIdentifierExtension);
//! ```

pub mod bazaar;
pub mod erc20_approval_gas_sponsoring;
pub mod jcs;
pub mod offer_receipt;
pub mod payment_identifier;
pub mod registry;
pub mod reputation_8004;
pub mod sign_in_with_x;

pub use registry::{ExtensionRegistry, ResourceServerExtension, RouteConfig, SettleContext, TransportContext};

/// Builds the registry of all six extensions described by the protocol's
/// extension registry, in the idiom of
/// `x402_types::scheme::SchemeBlueprints::new().and_register(...)`.
pub fn standard_extensions() -> ExtensionRegistry {
    ExtensionRegistry::new()
        .and_register(bazaar::BazaarExtension)
        .and_register(payment_identifier::PaymentIdentifierExtension)
        .and_register(offer_receipt::OfferReceiptExtension)
        .and_register(sign_in_with_x::SignInWithXExtension)
        .and_register(erc20_approval_gas_sponsoring::Erc20ApprovalGasSponsoringExtension)
        .and_register(reputation_8004::Reputation8004Extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_extensions_registers_all_six() {
        let registry = standard_extensions();
        for name in [
            "bazaar",
            "payment-identifier",
            "offer-receipt",
            "sign-in-with-x",
            "erc20-approval-gas-sponsoring",
            "8004-reputation",
        ] {
            assert!(registry.get(name).is_some(), "missing extension {name}");
        }
    }
}
