//! Payload matching and diffs.

use serde_json::Value;

use systest_core::model::{Matcher, payload_text};

/// Diff lines kept per mismatch.
const MAX_DIFF_LINES: usize = 20;

/// Whether `payload` satisfies `matcher`.
pub fn is_match(matcher: &Matcher, payload: &Value) -> bool {
    match matcher {
        Matcher::Equals(expected) => expected == payload,
        Matcher::Contains(expected) => contains(expected, payload),
        Matcher::Matches(pattern) => pattern.is_match(&payload_text(payload)),
    }
}

/// Structural subset: objects may carry extra keys, arrays must have the same
/// length and match elementwise, scalars must be equal.
pub fn contains(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => exp
            .iter()
            .all(|(key, value)| act.get(key).is_some_and(|a| contains(value, a))),
        (Value::Array(exp), Value::Array(act)) => {
            exp.len() == act.len() && exp.iter().zip(act).all(|(e, a)| contains(e, a))
        }
        _ => expected == actual,
    }
}

/// Explains why `payload` does not satisfy `matcher`, one line per difference.
pub fn diff(matcher: &Matcher, payload: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    match matcher {
        Matcher::Equals(expected) => diff_value("$", expected, payload, true, &mut lines),
        Matcher::Contains(expected) => diff_value("$", expected, payload, false, &mut lines),
        Matcher::Matches(pattern) => lines.push(format!(
            "$: {} does not match /{}/",
            Value::String(payload_text(payload)),
            pattern.as_str()
        )),
    }
    if lines.len() > MAX_DIFF_LINES {
        let extra = lines.len() - MAX_DIFF_LINES;
        lines.truncate(MAX_DIFF_LINES);
        lines.push(format!("... {extra} more"));
    }
    lines
}

fn diff_value(path: &str, expected: &Value, actual: &Value, exact: bool, out: &mut Vec<String>) {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            for (key, value) in exp {
                let child = format!("{path}.{key}");
                match act.get(key) {
                    Some(a) => diff_value(&child, value, a, exact, out),
                    None => out.push(format!("{child}: missing, expected {value}")),
                }
            }
            if exact {
                for (key, value) in act {
                    if !exp.contains_key(key) {
                        out.push(format!("{path}.{key}: unexpected {value}"));
                    }
                }
            }
        }
        (Value::Array(exp), Value::Array(act)) if exp.len() == act.len() => {
            for (i, (e, a)) in exp.iter().zip(act).enumerate() {
                diff_value(&format!("{path}[{i}]"), e, a, exact, out);
            }
        }
        (Value::Array(exp), Value::Array(act)) => out.push(format!(
            "{path}: expected {} items, got {}",
            exp.len(),
            act.len()
        )),
        _ if expected != actual => out.push(format!("{path}: expected {expected}, got {actual}")),
        _ => {}
    }
}
