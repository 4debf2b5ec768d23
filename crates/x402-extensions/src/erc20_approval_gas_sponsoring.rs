//! `erc20-approval-gas-sponsoring`: facilitator-paid Permit2 approval.
//!
//! A payer can attach a pre-signed Permit2 max-approval alongside their
//! payment payload; the facilitator broadcasts it (paying its own gas) before
//! settling, so the payer never needs native gas on the destination chain.
//! This extension only validates the shape of that pre-signed payload and
//! advertises support - the actual broadcast is performed by the EIP-155
//! chain adapter, which has the RPC connection and signer this crate
//! deliberately doesn't depend on.

use std::sync::OnceLock;

use serde_json::json;

use crate::registry::{ResourceServerExtension, RouteConfig, SettleContext};

/// The `erc20-approval-gas-sponsoring` extension.
pub struct Erc20ApprovalGasSponsoringExtension;

impl ResourceServerExtension for Erc20ApprovalGasSponsoringExtension {
    fn name(&self) -> &'static str {
        "erc20-approval-gas-sponsoring"
    }

    fn schema(&self) -> &serde_json::Value {
        static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "properties": {
                    "token": { "type": "string" },
                    "spender": { "type": "string" },
                    "nonce": { "type": "string" },
                    "deadline": { "type": "string" },
                    "signature": { "type": "string" }
                },
                "required": ["token", "spender", "nonce", "deadline", "signature"],
                "additionalProperties": false
            })
        })
    }

    fn declare(&self, route: &RouteConfig) -> Option<serde_json::Value> {
        if !route.network.starts_with("eip155") {
            return None;
        }
        Some(json!({ "sponsored": true }))
    }

    fn on_settle(
        &self,
        ctx: &SettleContext,
        declaration: Option<&serde_json::Value>,
    ) -> Option<serde_json::Value> {
        declaration?;
        Some(json!({ "sponsored": ctx.success }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_declares_for_eip155_routes() {
        let extension = Erc20ApprovalGasSponsoringExtension;
        let solana_route = RouteConfig {
            resource: "https://example.com/x".to_string(),
            description: "x".to_string(),
            mime_type: "application/json".to_string(),
            network: "solana:mainnet".to_string(),
            output_schema: None,
        };
        assert!(extension.declare(&solana_route).is_none());

        let eip155_route = RouteConfig {
            network: "eip155:8453".to_string(),
            ..solana_route
        };
        assert!(extension.declare(&eip155_route).is_some());
    }
}
