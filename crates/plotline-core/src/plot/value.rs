//! Loose value semantics shared by steps: number coercion, strict equality,
//! property-key conversion and literal parsing.
//!
//! Plots are authored as JSON/YAML by people used to dynamic-language rules
//! (`"5" > 3` is true, `"abc" > 3` is false). These helpers pin those rules
//! down in one place.

use serde_json::{Number, Value};

/// Coerce a value to a number: strings are parsed, booleans map to 0/1,
/// `null` is 0, absent values, arrays and objects are NaN.
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_number(s),
        Some(Value::Array(_)) | Some(Value::Object(_)) => f64::NAN,
    }
}

/// Parse a numeric string. Surrounding whitespace is ignored, the empty
/// string is 0, `0x` prefixes are hexadecimal and `Infinity` is accepted.
pub fn parse_number(raw: &str) -> f64 {
    let text = raw.trim();
    if text.is_empty() {
        return 0.0;
    }
    match text {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust's float parser also accepts "inf" and "nan" spellings.
    if text
        .chars()
        .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return f64::NAN;
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

/// Strict equality between a context value (possibly absent) and a literal.
///
/// Numbers compare by value, so `1` equals `1.0`. Arrays and objects are
/// never equal to anything: they would be distinct instances.
pub fn strict_equals(left: Option<&Value>, right: &Value) -> bool {
    match (left, right) {
        (Some(Value::Null), Value::Null) => true,
        (Some(Value::Bool(a)), Value::Bool(b)) => a == b,
        (Some(Value::Number(a)), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Some(Value::String(a)), Value::String(b)) => a == b,
        _ => false,
    }
}

/// Convert a value to the key used for an object-property lookup.
/// Absent values map to `"undefined"`.
pub fn property_key(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() => format_number(f),
            _ => n.to_string(),
        },
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => property_key(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
    }
}

/// Shortest decimal form of a number, integral values without a fraction.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n + 0.0)
    } else {
        n.to_string()
    }
}

/// JSON value for a computed number. Integral results become integers.
/// Returns `None` for non-finite numbers, which JSON cannot carry.
pub fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Some(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(Value::Number)
}

/// Interpret a bare literal from a condition string: quoted strings,
/// `true`/`false`, numbers, otherwise the trimmed text itself.
pub fn parse_literal(raw: &str) -> Value {
    let text = raw.trim();
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted {
        return Value::String(text[1..text.len() - 1].to_string());
    }
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    let n = parse_number(text);
    if !n.is_nan() {
        if let Some(v) = number_value(n) {
            return v;
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(Some(&json!(3))), 3.0);
        assert_eq!(to_number(Some(&json!(" 2.5 "))), 2.5);
        assert_eq!(to_number(Some(&json!(""))), 0.0);
        assert_eq!(to_number(Some(&json!("0x1A"))), 26.0);
        assert_eq!(to_number(Some(&json!(true))), 1.0);
        assert_eq!(to_number(Some(&json!(null))), 0.0);
        assert!(to_number(Some(&json!("abc"))).is_nan());
        assert!(to_number(Some(&json!("inf"))).is_nan());
        assert!(to_number(Some(&json!([1]))).is_nan());
        assert!(to_number(None).is_nan());
        assert_eq!(to_number(Some(&json!("Infinity"))), f64::INFINITY);
    }

    #[test]
    fn test_strict_equals() {
        assert!(strict_equals(Some(&json!(1)), &json!(1.0)));
        assert!(strict_equals(Some(&json!("a")), &json!("a")));
        assert!(strict_equals(Some(&json!(null)), &json!(null)));
        assert!(!strict_equals(Some(&json!("1")), &json!(1)));
        assert!(!strict_equals(None, &json!(null)));
        assert!(!strict_equals(Some(&json!({})), &json!({})));
    }

    #[test]
    fn test_property_key() {
        assert_eq!(property_key(Some(&json!("a"))), "a");
        assert_eq!(property_key(Some(&json!(2))), "2");
        assert_eq!(property_key(Some(&json!(2.0))), "2");
        assert_eq!(property_key(Some(&json!(1.5))), "1.5");
        assert_eq!(property_key(Some(&json!(true))), "true");
        assert_eq!(property_key(Some(&json!(null))), "null");
        assert_eq!(property_key(None), "undefined");
        assert_eq!(property_key(Some(&json!([1, null, "x"]))), "1,,x");
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(14.0), Some(json!(14)));
        assert_eq!(number_value(-0.0), Some(json!(0)));
        assert_eq!(number_value(0.5), Some(json!(0.5)));
        assert_eq!(number_value(f64::NAN), None);
        assert_eq!(number_value(f64::INFINITY), None);
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("\"ok\""), json!("ok"));
        assert_eq!(parse_literal("'ok'"), json!("ok"));
        assert_eq!(parse_literal("true"), json!(true));
        assert_eq!(parse_literal(" 0.6 "), json!(0.6));
        assert_eq!(parse_literal("10"), json!(10));
        assert_eq!(parse_literal("pending"), json!("pending"));
    }
}
