//! # RFC 8785 JSON Canonicalization Scheme (JCS)
//!
//! Canonical JSON makes semantically identical payloads produce identical
//! bytes, which is what lets a block hash be recomputed by any auditor, in
//! any language, from the block's logical content.
//!
//! ## Integrity Model
//!
//! Canonicalization guards the hash chain against:
//!
//! - **Key Reordering**: JSON objects have no inherent key order.
//! - **Whitespace Differences**: insignificant whitespace is never emitted.
//! - **Number Representation**: `1.0` and `1` serialize identically; floats use
//!   the ECMAScript shortest round-trip form.
//! - **Unicode Escaping**: only the escapes the RFC requires are produced.
//!
//! Non-finite numbers have no JSON representation and are rejected with
//! [`LedgerError::Encoding`] instead of being silently rewritten.
//!
//! ## References
//!
//! - **RFC 8785** - "JSON Canonicalization Scheme (JCS)"
//!   <https://www.rfc-editor.org/rfc/rfc8785>
//! - **ECMA-262** - Number::toString, section 6.1.6.1.20
//!
//! ## Example
//!
//! ```rust
//! use concord_ledger::canonicalize::canonicalize;
//! use serde_json::json;
//!
//! let a = canonicalize(&json!({"b": 1, "a": 2})).unwrap();
//! let b = canonicalize(&json!({"a": 2, "b": 1})).unwrap();
//!
//! assert_eq!(a, b);
//! assert_eq!(a, r#"{"a":2,"b":1}"#);
//! ```

use crate::models::{BlockHash, LedgerError, Payload, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonicalizes a JSON value according to RFC 8785.
///
/// # Errors
///
/// Returns [`LedgerError::Encoding`] if the value contains a number that has
/// no finite representation.
///
/// # Example
///
/// ```rust
/// use concord_ledger::canonicalize::canonicalize;
/// use serde_json::json;
///
/// let value = json!({
///     "zulu": true,
///     "alpha": [3, 2, 1],
///     "bravo": 0.5
/// });
///
/// let canonical = canonicalize(&value).unwrap();
/// assert_eq!(canonical, r#"{"alpha":[3,2,1],"bravo":0.5,"zulu":true}"#);
/// ```
pub fn canonicalize(value: &serde_json::Value) -> Result<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Computes the SHA-256 digest of arbitrary bytes.
pub fn hash_bytes(bytes: &[u8]) -> BlockHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    BlockHash::from_bytes(hasher.finalize().into())
}

/// Computes the SHA-256 hash of a canonicalized JSON value.
///
/// # Example
///
/// ```rust
/// use concord_ledger::canonicalize::hash_canonical;
/// use serde_json::json;
///
/// let h1 = hash_canonical(&json!({"model": "a", "score": 1})).unwrap();
/// let h2 = hash_canonical(&json!({"score": 1, "model": "a"})).unwrap();
/// assert_eq!(h1, h2);
/// ```
pub fn hash_canonical(value: &serde_json::Value) -> Result<BlockHash> {
    let canonical = canonicalize(value)?;
    Ok(hash_bytes(canonical.as_bytes()))
}

/// Converts any serializable value into a ledger [`Payload`].
///
/// # Errors
///
/// Returns [`LedgerError::Encoding`] if serialization fails or the value does
/// not serialize to a JSON object.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(LedgerError::Encoding(format!(
            "payload must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(LedgerError::Encoding(e.to_string())),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn write_value(value: &serde_json::Value, out: &mut String) -> Result<()> {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(true) => out.push_str("true"),
        serde_json::Value::Bool(false) => out.push_str("false"),
        serde_json::Value::Number(n) => out.push_str(&canonicalize_number(n)?),
        serde_json::Value::String(s) => write_string(s, out),
        serde_json::Value::Array(arr) => {
            out.push('[');
            for (i, element) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(element, out)?;
            }
            out.push(']');
        }
        serde_json::Value::Object(obj) => {
            // RFC 8785 sorts by UTF-16 code units, not by UTF-8 bytes
            let mut entries: Vec<(&String, &serde_json::Value)> = obj.iter().collect();
            entries.sort_by(|(a, _), (b, _)| compare_utf16(a, b));

            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(val, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn canonicalize_number(n: &serde_json::Number) -> Result<String> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
                return Ok((f as i64).to_string());
            }
            Ok(format_float(f))
        }
        _ => Err(LedgerError::Encoding(format!(
            "number {} has no canonical representation",
            n
        ))),
    }
}

/// Formats a finite float the way ECMAScript `Number.prototype.toString` does.
///
/// `{:e}` yields the shortest round-trip digits; only the layout differs
/// from ECMAScript, so the digits are re-placed around the decimal point.
fn format_float(f: f64) -> String {
    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let k = digits.len() as i32;
    let n = exponent + 1;

    let body = if k <= n && n <= 21 {
        format!("{}{}", digits, "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int_part, frac_part) = digits.split_at(n as usize);
        format!("{}.{}", int_part, frac_part)
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let e = n - 1;
        let sign = if e >= 0 { '+' } else { '-' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{}e{}{}", first, sign, e.abs())
        } else {
            format!("{}.{}e{}{}", first, rest, sign, e.abs())
        }
    };

    if f.is_sign_negative() {
        format!("-{}", body)
    } else {
        body
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\x20' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn compare_utf16(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}
