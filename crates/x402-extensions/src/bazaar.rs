//! `bazaar`: discovery metadata for a paid resource.
//!
//! V1 advertises a resource's response shape inline, in
//! `PaymentRequirements.outputSchema`. V2 moves discovery data into the
//! generic `extensions` map instead of a dedicated field, so this extension's
//! job is to auto-translate whatever `outputSchema` the route declared into a
//! `bazaar` entry, giving V1 and V2 clients the same discovery information.

use std::sync::OnceLock;

use serde_json::json;

use crate::registry::{ResourceServerExtension, RouteConfig};

/// The `bazaar` extension.
pub struct BazaarExtension;

impl ResourceServerExtension for BazaarExtension {
    fn name(&self) -> &'static str {
        "bazaar"
    }

    fn schema(&self) -> &serde_json::Value {
        static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "properties": {
                    "resource": { "type": "string" },
                    "description": { "type": "string" },
                    "mimeType": { "type": "string" },
                    "outputSchema": {}
                },
                "required": ["resource"],
                "additionalProperties": false
            })
        })
    }

    fn declare(&self, route: &RouteConfig) -> Option<serde_json::Value> {
        let mut entry = json!({
            "resource": route.resource,
            "description": route.description,
            "mimeType": route.mime_type,
        });
        if let Some(output_schema) = &route.output_schema {
            entry["outputSchema"] = output_schema.clone();
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_output_schema_into_bazaar_entry() {
        let extension = BazaarExtension;
        let route = RouteConfig {
            resource: "https://example.com/weather".to_string(),
            description: "weather forecast".to_string(),
            mime_type: "application/json".to_string(),
            network: "eip155:8453".to_string(),
            output_schema: Some(json!({"type": "object", "properties": {"temp": {"type": "number"}}})),
        };
        let declared = extension.declare(&route).unwrap();
        assert_eq!(declared["resource"], "https://example.com/weather");
        assert_eq!(declared["outputSchema"]["type"], "object");
    }

    #[test]
    fn omits_output_schema_when_route_has_none() {
        let extension = BazaarExtension;
        let route = RouteConfig {
            resource: "https://example.com/weather".to_string(),
            description: "weather forecast".to_string(),
            mime_type: "application/json".to_string(),
            network: "eip155:8453".to_string(),
            output_schema: None,
        };
        let declared = extension.declare(&route).unwrap();
        assert!(declared.get("outputSchema").is_none());
    }
}
