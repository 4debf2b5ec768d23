//! RFC 8785 JSON Canonicalization Scheme (JCS).
//!
//! Used by the `offer-receipt` extension to produce a byte-stable representation
//! of an offer or receipt before it is signed (JWS compact) or hashed (EIP-712).
//! No crate in the surrounding corpus implements JCS, so this is a direct,
//! minimal reading of the RFC: sort object members by UTF-16 code unit order,
//! drop insignificant whitespace, and print numbers per the ECMAScript
//! `Number::toString` algorithm referenced by the spec.

use serde_json::Value;
use std::cmp::Ordering;

/// Serializes `value` as RFC 8785 canonical JSON.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| compare_utf16(a, b));
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Compares two strings by UTF-16 code unit order, per RFC 8785 section 3.2.3.
fn compare_utf16(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Formats a JSON number per the ECMAScript `Number::toString` algorithm
/// that RFC 8785 mandates, with integers printed without a decimal point.
fn canonical_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(0.0);
    if f == 0.0 {
        return if f.is_sign_negative() {
            "-0".to_string()
        } else {
            "0".to_string()
        };
    }
    if f.fract() == 0.0 && f.abs() < 1e21 {
        return format!("{f:.0}");
    }
    let mut s = format!("{f}");
    if s.contains('e') && !s.contains("e-") {
        s = s.replace('e', "e+");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let value = json!({"b": 1, "a": 2, "c": 3});
        assert_eq!(canonicalize(&value), r#"{"a":2,"b":1,"c":3}"#);
    }

    #[test]
    fn drops_whitespace_and_nests() {
        let value = json!({"arr": [1, 2, {"z": true, "a": null}]});
        assert_eq!(canonicalize(&value), r#"{"arr":[1,2,{"a":null,"z":true}]}"#);
    }

    #[test]
    fn escapes_control_characters() {
        let value = json!("line\nbreak\ttab");
        assert_eq!(canonicalize(&value), r#""line\nbreak\ttab""#);
    }

    #[test]
    fn is_stable_across_key_insertion_order() {
        let a = json!({"x": 1, "y": 2});
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }
}
