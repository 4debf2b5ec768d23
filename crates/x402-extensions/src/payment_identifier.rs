//! `payment-identifier`: an idempotency key the client attaches to a payment
//! so a retried request settles at most once and the receipt can be looked up
//! later.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::registry::{ResourceServerExtension, RouteConfig, SettleContext};

/// Idempotency keys must match `^[A-Za-z0-9_-]{16,128}$`.
fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{16,128}$").expect("valid regex"))
}

/// Checks whether `key` is a syntactically valid payment identifier.
pub fn is_valid_identifier(key: &str) -> bool {
    key_pattern().is_match(key)
}

/// The `payment-identifier` extension.
///
/// Always declared: every route accepts an optional client-supplied
/// idempotency key. The key itself travels in the payment payload's
/// `extensions["payment-identifier"]` block, not in the 402 declaration;
/// [`ResourceServerExtension::on_settle`] echoes it back (or mints one, if
/// the client didn't supply one) so the caller can correlate the settle
/// response with their original request.
pub struct PaymentIdentifierExtension;

impl ResourceServerExtension for PaymentIdentifierExtension {
    fn name(&self) -> &'static str {
        "payment-identifier"
    }

    fn schema(&self) -> &serde_json::Value {
        static SCHEMA: OnceLock<serde_json::Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "properties": {
                    "identifier": {
                        "type": "string",
                        "pattern": "^[A-Za-z0-9_-]{16,128}$"
                    }
                },
                "required": ["identifier"],
                "additionalProperties": false
            })
        })
    }

    fn declare(&self, _route: &RouteConfig) -> Option<serde_json::Value> {
        Some(json!({ "supported": true }))
    }

    fn on_settle(
        &self,
        _ctx: &SettleContext,
        declaration: Option<&serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let identifier = declaration
            .and_then(|d| d.get("identifier"))
            .and_then(|v| v.as_str())
            .filter(|s| is_valid_identifier(s))
            .map(str::to_string)
            .unwrap_or_else(mint_identifier);
        Some(json!({ "identifier": identifier }))
    }
}

/// Mints a fresh identifier when the client didn't supply one.
fn mint_identifier() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..32)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifiers() {
        assert!(is_valid_identifier("abcdefghijklmnop"));
        assert!(is_valid_identifier(&"a".repeat(128)));
    }

    #[test]
    fn rejects_short_or_invalid_identifiers() {
        assert!(!is_valid_identifier("short"));
        assert!(!is_valid_identifier(&"a".repeat(129)));
        assert!(!is_valid_identifier("has a space aaaaaaaaaa"));
    }

    #[test]
    fn mints_identifier_when_absent() {
        let extension = PaymentIdentifierExtension;
        let ctx = SettleContext {
            payer: "0xabc".to_string(),
            network: "eip155:8453".to_string(),
            transaction: "0xdead".to_string(),
            success: true,
        };
        let result = extension.on_settle(&ctx, None).unwrap();
        let identifier = result["identifier"].as_str().unwrap();
        assert!(is_valid_identifier(identifier));
    }
}
