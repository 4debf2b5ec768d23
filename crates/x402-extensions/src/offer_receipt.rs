//! `offer-receipt`: signed offers and settlement receipts.
//!
//! Offers (seller-proposed `PaymentRequirements`, signed before the buyer
//! commits) and receipts (a canonical record of what actually settled) both
//! need a byte-stable representation before they can be signed, either as a
//! JWS compact payload or as EIP-712 typed data. This extension produces that
//! representation via [`crate::jcs::canonicalize`]; the actual signature is
//! applied by whichever `Signer` the caller holds (outside this crate, per
//! the chain-adapter layer), since the extension registry itself never has
//! access to private key material.

use std::sync::OnceLock;

use serde_json::json;

use crate::jcs;
use crate::registry::{ResourceServerExtension, RouteConfig, SettleContext};

/// The `offer-receipt` extension.
pub struct OfferReceiptExtension;

impl ResourceServerExtension for OfferReceiptExtension {
    fn name(&self) -> &'static str {
        "offer-receipt"
    }

    fn schema(&self) -> &serde_json::Value {
        static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "properties": {
                    "format": { "enum": ["jws", "eip712"] },
                    "signature": { "type": "string" },
                    "canonical": { "type": "string" }
                },
                "required": ["format", "signature", "canonical"],
                "additionalProperties": false
            })
        })
    }

    fn declare(&self, route: &RouteConfig) -> Option<serde_json::Value> {
        Some(json!({ "resource": route.resource, "canonicalization": "jcs" }))
    }

    fn on_settle(
        &self,
        ctx: &SettleContext,
        _declaration: Option<&serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let receipt = json!({
            "payer": ctx.payer,
            "network": ctx.network,
            "transaction": ctx.transaction,
            "success": ctx.success,
        });
        Some(json!({
            "canonical": jcs::canonicalize(&receipt),
            "canonicalization": "jcs",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_settlement_into_a_stable_string() {
        let extension = OfferReceiptExtension;
        let ctx = SettleContext {
            payer: "0xabc".to_string(),
            network: "eip155:8453".to_string(),
            transaction: "0xdeadbeef".to_string(),
            success: true,
        };
        let result = extension.on_settle(&ctx, None).unwrap();
        let canonical = result["canonical"].as_str().unwrap();
        assert!(canonical.starts_with('{'));
        assert!(canonical.contains(r#""network":"eip155:8453""#));
    }
}
