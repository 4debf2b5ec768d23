//! `8004-reputation`: agent identity and settlement attestation.
//!
//! Lets a resource server declare that it recognizes payers registered in an
//! ERC-8004-style agent identity/reputation registry, and optionally attaches
//! a settlement attestation (a claim that a specific agent paid, suitable for
//! later reputation scoring) once payment completes.

use std::sync::OnceLock;

use serde_json::json;

use crate::registry::{ResourceServerExtension, RouteConfig, SettleContext};

/// The `8004-reputation` extension.
pub struct Reputation8004Extension;

impl ResourceServerExtension for Reputation8004Extension {
    fn name(&self) -> &'static str {
        "8004-reputation"
    }

    fn schema(&self) -> &serde_json::Value {
        static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "properties": {
                    "agentId": { "type": "string" },
                    "registry": { "type": "string" }
                },
                "required": ["agentId"],
                "additionalProperties": false
            })
        })
    }

    fn declare(&self, route: &RouteConfig) -> Option<serde_json::Value> {
        Some(json!({ "network": route.network, "attestationSupported": true }))
    }

    fn on_settle(
        &self,
        ctx: &SettleContext,
        declaration: Option<&serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let agent_id = declaration
            .and_then(|d| d.get("agentId"))
            .and_then(|v| v.as_str())?;
        Some(json!({
            "agentId": agent_id,
            "attestation": {
                "payer": ctx.payer,
                "network": ctx.network,
                "transaction": ctx.transaction,
                "success": ctx.success,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attests_only_when_agent_declared() {
        let extension = Reputation8004Extension;
        let ctx = SettleContext {
            payer: "0xabc".to_string(),
            network: "eip155:8453".to_string(),
            transaction: "0xdead".to_string(),
            success: true,
        };
        assert!(extension.on_settle(&ctx, None).is_none());

        let declaration = json!({ "agentId": "agent-123" });
        let result = extension.on_settle(&ctx, Some(&declaration)).unwrap();
        assert_eq!(result["agentId"], "agent-123");
        assert_eq!(result["attestation"]["payer"], "0xabc");
    }
}
