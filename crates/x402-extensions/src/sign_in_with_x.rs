//! `sign-in-with-x`: CAIP-122 ("Sign-In with X") wallet authentication.
//!
//! Lets a resource server require proof of wallet control alongside payment,
//! by attaching a CAIP-122 challenge to the 402 response. The nonce is
//! generated per request and bound to the resource URI so a challenge can't
//! be replayed against a different resource.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::registry::{ResourceServerExtension, RouteConfig, TransportContext};

/// The `sign-in-with-x` extension.
pub struct SignInWithXExtension;

impl ResourceServerExtension for SignInWithXExtension {
    fn name(&self) -> &'static str {
        "sign-in-with-x"
    }

    fn schema(&self) -> &serde_json::Value {
        static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "properties": {
                    "domain": { "type": "string" },
                    "address": { "type": "string" },
                    "uri": { "type": "string" },
                    "version": { "const": "1" },
                    "nonce": { "type": "string" },
                    "issuedAt": { "type": "integer" },
                    "signature": { "type": "string" }
                },
                "required": ["domain", "address", "uri", "nonce", "signature"],
                "additionalProperties": false
            })
        })
    }

    fn declare(&self, route: &RouteConfig) -> Option<serde_json::Value> {
        Some(json!({
            "version": "1",
            "uri": route.resource,
        }))
    }

    fn enrich_declaration(&self, declaration: &mut serde_json::Value, ctx: &TransportContext) {
        let nonce = generate_nonce();
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if let Some(obj) = declaration.as_object_mut() {
            obj.insert("uri".to_string(), json!(ctx.resource_url));
            obj.insert("nonce".to_string(), json!(nonce));
            obj.insert("issuedAt".to_string(), json!(issued_at));
        }
    }
}

/// Generates a CAIP-122 nonce: 16 random alphanumeric bytes, per the minimum
/// entropy CAIP-122 recommends.
fn generate_nonce() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..16)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn binds_nonce_and_uri_to_the_request() {
        let extension = SignInWithXExtension;
        let route = RouteConfig {
            resource: "https://example.com/secret".to_string(),
            description: "secret".to_string(),
            mime_type: "application/json".to_string(),
            network: "eip155:8453".to_string(),
            output_schema: None,
        };
        let mut declared = extension.declare(&route).unwrap();
        let ctx = TransportContext {
            headers: HashMap::new(),
            resource_url: "https://example.com/secret?id=42".to_string(),
        };
        extension.enrich_declaration(&mut declared, &ctx);
        assert_eq!(declared["uri"], "https://example.com/secret?id=42");
        assert_eq!(declared["nonce"].as_str().unwrap().len(), 16);
    }
}
