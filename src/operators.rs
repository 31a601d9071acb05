// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(clippy::pattern_type_mismatch)]

//! Value-level operators.
//!
//! Every operator short-circuits on the first error operand through
//! [`propagate_error`] and merges the metadata of all operands into its result.

use alloc::format;
use alloc::string::String;

use crate::number::Number;
use crate::value::{Metadata, Value, ValueKind};

/// First error among `operands`, carrying the metadata of every operand.
pub fn propagate_error(operands: &[&Value]) -> Option<Value> {
    let error = operands.iter().find(|v| v.is_error())?;
    Some((*error).clone().merge_metadata(&merged(operands)))
}

fn merged(operands: &[&Value]) -> Metadata {
    Metadata::merge_all(operands.iter().copied())
}

fn binary(left: &Value, right: &Value, op: impl FnOnce(&Value, &Value) -> Value) -> Value {
    if let Some(e) = propagate_error(&[left, right]) {
        return e;
    }
    op(left, right).with_metadata(merged(&[left, right]))
}

fn numeric(
    left: &Value,
    right: &Value,
    op: impl FnOnce(&Number, &Number) -> anyhow::Result<Number>,
) -> Value {
    binary(left, right, |l, r| match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => match op(a, b) {
            Ok(n) => Value::from(n),
            Err(e) => Value::error(e.to_string()),
        },
        (None, _) => number_required(l),
        (_, None) => number_required(r),
    })
}

fn number_required(v: &Value) -> Value {
    Value::error(format!(
        "Arithmetic operation requires number operands, got: {}.",
        v.type_name()
    ))
}

/// `+`. Text on the left concatenates the textual form of the right operand.
pub fn add(left: &Value, right: &Value) -> Value {
    if let Some(text) = left.as_text() {
        return binary(left, right, |_, r| {
            let mut s = String::from(text);
            match r.as_text() {
                Some(t) => s.push_str(t),
                None => s.push_str(&r.to_string()),
            }
            Value::text(s)
        });
    }
    numeric(left, right, |a, b| Ok(a.add(b)))
}

pub fn subtract(left: &Value, right: &Value) -> Value {
    numeric(left, right, |a, b| Ok(a.sub(b)))
}

pub fn multiply(left: &Value, right: &Value) -> Value {
    numeric(left, right, Number::mul)
}

pub fn divide(left: &Value, right: &Value) -> Value {
    numeric(left, right, Number::divide)
}

pub fn modulo(left: &Value, right: &Value) -> Value {
    numeric(left, right, Number::modulo)
}

fn compare(left: &Value, right: &Value, accept: fn(core::cmp::Ordering) -> bool) -> Value {
    binary(left, right, |l, r| match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => Value::bool(accept(a.cmp(b))),
        (None, _) => comparison_required(l),
        (_, None) => comparison_required(r),
    })
}

fn comparison_required(v: &Value) -> Value {
    Value::error(format!(
        "Comparison requires number operands, got: {}.",
        v.type_name()
    ))
}

pub fn less(left: &Value, right: &Value) -> Value {
    compare(left, right, |o| o.is_lt())
}

pub fn less_or_equal(left: &Value, right: &Value) -> Value {
    compare(left, right, |o| o.is_le())
}

pub fn greater(left: &Value, right: &Value) -> Value {
    compare(left, right, |o| o.is_gt())
}

pub fn greater_or_equal(left: &Value, right: &Value) -> Value {
    compare(left, right, |o| o.is_ge())
}

/// `needle in haystack` for arrays (elements), objects (values) and text
/// (substrings).
pub fn contains(needle: &Value, haystack: &Value) -> Value {
    binary(needle, haystack, |n, h| match h.kind() {
        ValueKind::Array(items) => Value::bool(items.iter().any(|v| v == n)),
        ValueKind::Object(fields) => Value::bool(fields.values().any(|v| v == n)),
        ValueKind::Text(s) => match n.as_text() {
            Some(t) => Value::bool(s.contains(t)),
            None => Value::bool(false),
        },
        _ => Value::error(format!(
            "'in' requires an array, object or text right operand, got: {}.",
            h.type_name()
        )),
    })
}

pub fn equal(left: &Value, right: &Value) -> Value {
    binary(left, right, |l, r| Value::bool(l == r))
}

pub fn not_equal(left: &Value, right: &Value) -> Value {
    binary(left, right, |l, r| Value::bool(l != r))
}

#[cfg(feature = "regex")]
pub use pattern::*;

#[cfg(feature = "regex")]
mod pattern {
    use super::*;
    use regex::Regex;

    /// Compiles `pattern`, anchored so that it has to match the whole input.
    pub fn compile_pattern(pattern: &Value) -> Result<Regex, Value> {
        let Some(p) = pattern.as_text() else {
            return Err(Value::error(format!(
                "Regular expression must be text, got: {}.",
                pattern.type_name()
            )));
        };
        Regex::new(&format!("^(?:{p})$"))
            .map_err(|e| Value::error(format!("Invalid regular expression: {p}. {e}")))
    }

    pub fn regex_match_compiled(left: &Value, regex: &Regex, pattern: &Value) -> Value {
        binary(left, pattern, |l, _| match l.as_text() {
            Some(s) => Value::bool(regex.is_match(s)),
            None => Value::bool(false),
        })
    }

    /// `left =~ pattern`. Non-text input never matches.
    pub fn regex_match(left: &Value, pattern: &Value) -> Value {
        if let Some(e) = propagate_error(&[left, pattern]) {
            return e;
        }
        match compile_pattern(pattern) {
            Ok(regex) => regex_match_compiled(left, &regex, pattern),
            Err(e) => e.with_metadata(merged(&[left, pattern])),
        }
    }
}

#[cfg(not(feature = "regex"))]
pub fn regex_match(left: &Value, pattern: &Value) -> Value {
    binary(left, pattern, |_, _| {
        Value::error("Regular expression support is not enabled.")
    })
}

/// Scans operands for an eager boolean operator. Returns the booleans or the
/// first offending operand turned into an error.
fn booleans(values: &[Value], operator: &str) -> Result<alloc::vec::Vec<bool>, Value> {
    let metadata = Metadata::merge_all(values);
    let mut result = alloc::vec::Vec::with_capacity(values.len());
    for v in values {
        if v.is_error() {
            return Err(v.clone().merge_metadata(&metadata));
        }
        match v.as_bool() {
            Some(b) => result.push(b),
            None => {
                return Err(Value::error(format!(
                    "{operator} requires boolean operands, got: {}.",
                    v.type_name()
                ))
                .with_metadata(metadata))
            }
        }
    }
    Ok(result)
}

fn eager(values: &[Value], operator: &str, fold: fn(&[bool]) -> bool) -> Value {
    match booleans(values, operator) {
        Ok(b) => Value::bool(fold(&b)).with_metadata(Metadata::merge_all(values)),
        Err(e) => e,
    }
}

pub fn eager_and(values: &[Value]) -> Value {
    eager(values, "Eager AND", |b| b.iter().all(|x| *x))
}

pub fn eager_or(values: &[Value]) -> Value {
    eager(values, "Eager OR", |b| b.iter().any(|x| *x))
}

pub fn exclusive_or(values: &[Value]) -> Value {
    eager(values, "XOR", |b| b.iter().fold(false, |acc, x| acc ^ *x))
}

/// Checks one operand of a lazy boolean chain. `Ok(b)` is the boolean value,
/// `Err` the error the whole chain evaluates to.
pub fn lazy_operand(v: &Value) -> Result<bool, Value> {
    if v.is_error() {
        return Err(v.clone());
    }
    v.as_bool().ok_or_else(|| {
        Value::error(format!(
            "Boolean operation requires boolean operands, got: {}.",
            v.type_name()
        ))
        .with_metadata(v.meta().clone())
    })
}

pub fn not(v: &Value) -> Value {
    if v.is_error() {
        return v.clone();
    }
    match v.as_bool() {
        Some(b) => Value::bool(!b).with_metadata(v.meta().clone()),
        None => Value::error(format!(
            "Logical negation requires a boolean operand, got: {}.",
            v.type_name()
        ))
        .with_metadata(v.meta().clone()),
    }
}

pub fn negate(v: &Value) -> Value {
    if v.is_error() {
        return v.clone();
    }
    match v.as_number() {
        Some(n) => Value::from(n.neg()).with_metadata(v.meta().clone()),
        None => Value::error(format!(
            "Arithmetic negation requires a number operand, got: {}.",
            v.type_name()
        ))
        .with_metadata(v.meta().clone()),
    }
}

pub fn unary_plus(v: &Value) -> Value {
    if v.is_error() || v.as_number().is_some() {
        return v.clone();
    }
    Value::error(format!(
        "Unary plus requires a number operand, got: {}.",
        v.type_name()
    ))
    .with_metadata(v.meta().clone())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::location::SourceLocation;
    use core::str::FromStr;

    fn n(s: &str) -> Value {
        Value::from(Number::from_str(s).unwrap())
    }

    fn message(v: &Value) -> &str {
        &v.as_error().unwrap().message
    }

    #[test]
    fn arithmetic() {
        assert_eq!(add(&n("2"), &n("3")), n("5"));
        assert_eq!(subtract(&n("2"), &n("3.5")), n("-1.5"));
        assert_eq!(multiply(&n("1.5"), &n("4")), n("6"));
        assert_eq!(divide(&n("1"), &n("8")), n("0.125"));
        assert_eq!(modulo(&n("-7"), &n("3")), n("2"));
        assert_eq!(add(&Value::text("a"), &n("1")), Value::text("a1"));
    }

    #[test]
    fn division_by_zero_is_an_error_value() {
        let r = divide(&n("1"), &n("0"));
        assert!(message(&r).contains("Division by zero"));
        assert!(modulo(&n("1"), &n("0")).is_error());
    }

    #[test]
    fn type_errors() {
        let r = subtract(&Value::text("x"), &n("1"));
        assert_eq!(message(&r), "Arithmetic operation requires number operands, got: Text.");
        let r = less(&n("1"), &Value::undefined());
        assert_eq!(message(&r), "Comparison requires number operands, got: Undefined.");
        let r = eager_and(&[Value::bool(true), n("1")]);
        assert_eq!(message(&r), "Eager AND requires boolean operands, got: Number.");
        let r = exclusive_or(&[Value::null()]);
        assert_eq!(message(&r), "XOR requires boolean operands, got: Null.");
    }

    #[test]
    fn errors_absorb_and_merge_metadata() {
        let a = SourceLocation::new(1, 0, 1, 1);
        let b = SourceLocation::new(2, 0, 2, 1);
        let err = Value::error("boom").with_location(a);
        let other = n("1").with_location(b);
        for r in [
            add(&err, &other),
            less(&other, &err),
            equal(&err, &other),
            contains(&other, &err),
        ] {
            assert_eq!(message(&r), "boom");
            assert_eq!(r.meta().locations().count(), 2);
        }
    }

    #[test]
    fn eager_boolean_operators() {
        let t = Value::bool(true);
        let f = Value::bool(false);
        assert_eq!(eager_and(&[t.clone(), f.clone()]), f);
        assert_eq!(eager_or(&[f.clone(), t.clone()]), t);
        assert_eq!(exclusive_or(&[t.clone(), t.clone()]), f);
        assert_eq!(exclusive_or(&[t.clone(), f.clone()]), t);
        // The first offending operand stops the scan.
        let r = eager_or(&[t, Value::error("first"), n("1")]);
        assert_eq!(message(&r), "first");
    }

    #[test]
    fn containment_and_equality() {
        let arr = Value::from_json_str("[1,2,3]").unwrap();
        let obj = Value::from_json_str(r#"{"a":"x"}"#).unwrap();
        assert_eq!(contains(&n("2"), &arr), Value::bool(true));
        assert_eq!(contains(&Value::text("x"), &obj), Value::bool(true));
        assert_eq!(contains(&Value::text("ell"), &Value::text("hello")), Value::bool(true));
        assert!(contains(&n("1"), &n("1")).is_error());
        assert_eq!(equal(&n("1.0"), &n("1")), Value::bool(true));
        assert_eq!(not_equal(&arr, &obj), Value::bool(true));
    }

    #[cfg(feature = "regex")]
    #[test]
    fn regex_requires_full_match() {
        assert_eq!(
            regex_match(&Value::text("abc"), &Value::text("a.c")),
            Value::bool(true)
        );
        assert_eq!(
            regex_match(&Value::text("xabc"), &Value::text("a.c")),
            Value::bool(false)
        );
        assert_eq!(regex_match(&n("1"), &Value::text(".*")), Value::bool(false));
        assert!(regex_match(&Value::text("a"), &Value::text("(")).is_error());
    }

    #[test]
    fn unary_operators() {
        assert_eq!(not(&Value::bool(true)), Value::bool(false));
        assert_eq!(negate(&n("2")), n("-2"));
        assert_eq!(unary_plus(&n("2")), n("2"));
        assert!(not(&n("1")).is_error());
        assert!(negate(&Value::text("a")).is_error());
    }

    #[test]
    fn lazy_operand_checks() {
        assert_eq!(lazy_operand(&Value::bool(true)), Ok(true));
        let err = lazy_operand(&n("1")).unwrap_err();
        assert_eq!(message(&err), "Boolean operation requires boolean operands, got: Number.");
    }
}
