// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(
    clippy::pattern_type_mismatch,
    clippy::arithmetic_side_effects,
    clippy::as_conversions
)]

//! Path step operators on values.
//!
//! `Undefined` and `Error` bases pass through every step unchanged. Results
//! carry the metadata of their base.

use alloc::format;
use alloc::vec::Vec;

use crate::context::EvaluationContext;
use crate::expression::CompiledExpression;
use crate::value::{Metadata, Object, Value, ValueKind};

pub const MAX_RECURSION_DEPTH: usize = 500;

const DEPTH_EXCEEDED: &str =
    "Maximum nesting depth exceeded during recursive key/index/wildcard step.";

fn passes_through(base: &Value) -> bool {
    base.is_error() || base.is_undefined()
}

fn derived(result: Value, base: &Value) -> Value {
    result.merge_metadata(base.meta())
}

/// Position of `index` in an array of `len` elements. Negative indices count
/// from the end.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    if (0..len).contains(&i) {
        Some(i as usize)
    } else {
        None
    }
}

pub fn key(base: &Value, name: &str) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    match base.kind() {
        ValueKind::Object(fields) => match fields.get(name) {
            Some(v) => derived(v.clone(), base),
            None => derived(Value::undefined(), base),
        },
        _ => derived(
            Value::error(format!(
                "Key step '{name}' can only be applied to objects but got {}.",
                base.type_name()
            )),
            base,
        ),
    }
}

pub fn wildcard(base: &Value) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    match base.kind() {
        ValueKind::Array(_) => base.clone(),
        ValueKind::Object(fields) => {
            derived(Value::array(fields.values().cloned().collect()), base)
        }
        _ => derived(
            Value::error(format!(
                "Wildcard steps '.*' can only be applied to arrays or objects but got {}.",
                base.type_name()
            )),
            base,
        ),
    }
}

pub fn index(base: &Value, index: i64) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    let Some(items) = base.as_array() else {
        return derived(
            Value::error(format!(
                "Index steps can only be applied to arrays but got {}.",
                base.type_name()
            )),
            base,
        );
    };
    match normalize_index(index, items.len()) {
        Some(i) => derived(items[i].clone(), base),
        None => derived(
            Value::error(format!(
                "Index {index} out of bounds for array of size {}.",
                items.len()
            )),
            base,
        ),
    }
}

/// `[from:to:step]` with the bounds of Python slices. Non-array bases yield
/// `Undefined`.
pub fn slice(base: &Value, from: Option<i64>, to: Option<i64>, step: Option<i64>) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    let Some(items) = base.as_array() else {
        return derived(Value::undefined(), base);
    };
    let step = step.unwrap_or(1);
    if step == 0 {
        return derived(Value::error("Step must not be zero."), base);
    }

    let len = items.len() as i64;
    let bound = |value: Option<i64>, default: i64, lowest: i64, highest: i64| match value {
        None => default,
        Some(v) if v < 0 => (v + len).clamp(lowest, highest),
        Some(v) => v.clamp(lowest, highest),
    };

    let mut selected = Vec::new();
    if step > 0 {
        let mut i = bound(from, 0, 0, len);
        let stop = bound(to, len, 0, len);
        while i < stop {
            selected.push(items[i as usize].clone());
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let mut i = bound(from, len - 1, -1, len - 1);
        let stop = bound(to, -1, -1, len - 1);
        while i > stop {
            selected.push(items[i as usize].clone());
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    derived(Value::array(selected), base)
}

pub fn index_union(base: &Value, indices: &[i64]) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    let Some(items) = base.as_array() else {
        return derived(
            Value::error(format!(
                "Index union steps can only be applied to arrays but got {}.",
                base.type_name()
            )),
            base,
        );
    };
    let mut selected = Vec::with_capacity(indices.len());
    for index in indices {
        match normalize_index(*index, items.len()) {
            Some(i) => selected.push(items[i].clone()),
            None => {
                return derived(
                    Value::error(format!(
                        "Index {index} out of bounds for array of size {}.",
                        items.len()
                    )),
                    base,
                )
            }
        }
    }
    derived(Value::array(selected), base)
}

pub fn attribute_union(base: &Value, keys: &[alloc::string::String]) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    let Some(fields) = base.as_object() else {
        return derived(
            Value::error(format!(
                "Key union steps can only be applied to objects but got {}.",
                base.type_name()
            )),
            base,
        );
    };
    let selected = keys.iter().filter_map(|k| fields.get(k).cloned()).collect();
    derived(Value::array(selected), base)
}

/// Visits every value nested in `value` depth first, parents before children.
/// `visit` sees each container; it returns `Err` once the depth limit is hit.
fn walk(
    value: &Value,
    depth: usize,
    visit: &mut dyn FnMut(&Value, &mut Vec<Value>),
    out: &mut Vec<Value>,
) -> Result<(), ()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(());
    }
    match value.kind() {
        ValueKind::Array(items) => {
            visit(value, out);
            for item in items.iter() {
                walk(item, depth + 1, visit, out)?;
            }
        }
        ValueKind::Object(fields) => {
            visit(value, out);
            for item in fields.values() {
                walk(item, depth + 1, visit, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn recursive(base: &Value, mut visit: impl FnMut(&Value, &mut Vec<Value>)) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    let mut out = Vec::new();
    match walk(base, 0, &mut visit, &mut out) {
        Ok(()) => derived(Value::array(out), base),
        Err(()) => derived(Value::error(DEPTH_EXCEEDED), base),
    }
}

pub fn recursive_key(base: &Value, name: &str) -> Value {
    recursive(base, |container, out| {
        if let Some(v) = container.as_object().and_then(|o| o.get(name)) {
            out.push(v.clone());
        }
    })
}

pub fn recursive_wildcard(base: &Value) -> Value {
    // Children are emitted right before their own subtrees are visited.
    fn collect(value: &Value, depth: usize, out: &mut Vec<Value>) -> Result<(), ()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(());
        }
        let children: Vec<&Value> = match value.kind() {
            ValueKind::Array(items) => items.iter().collect(),
            ValueKind::Object(fields) => fields.values().collect(),
            _ => return Ok(()),
        };
        for child in children {
            out.push(child.clone());
            collect(child, depth + 1, out)?;
        }
        Ok(())
    }

    if passes_through(base) {
        return base.clone();
    }
    let mut out = Vec::new();
    match collect(base, 0, &mut out) {
        Ok(()) => derived(Value::array(out), base),
        Err(()) => derived(Value::error(DEPTH_EXCEEDED), base),
    }
}

pub fn recursive_index(base: &Value, index: i64) -> Value {
    recursive(base, |container, out| {
        if let Some(items) = container.as_array() {
            if let Some(i) = normalize_index(index, items.len()) {
                out.push(items[i].clone());
            }
        }
    })
}

/// `[(expr)]`: a number selects an index, a text selects a key.
pub fn expression_step(base: &Value, selector: &Value) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    if selector.is_error() {
        return selector.clone().merge_metadata(base.meta());
    }
    match selector.kind() {
        ValueKind::Number(n) => match n.as_i64() {
            Some(i) => index(base, i),
            None => derived(Value::error(format!("Invalid array index: {n}.")), base),
        },
        ValueKind::Text(name) => key(base, name),
        _ => derived(
            Value::error(format!(
                "Expression in expression step must return a number or text, but got {}.",
                selector.type_name()
            )),
            base,
        ),
    }
}

enum Verdict {
    Keep(Metadata),
    Drop(Metadata),
}

fn judge(condition: &CompiledExpression, ctx: &EvaluationContext) -> Result<Verdict, Value> {
    let result = condition.evaluate(ctx);
    if result.is_error() {
        return Err(result);
    }
    match result.as_bool() {
        Some(true) => Ok(Verdict::Keep(result.meta().clone())),
        Some(false) => Ok(Verdict::Drop(result.meta().clone())),
        None => Err(Value::error(format!(
            "Condition step requires boolean result, got: {}.",
            result.type_name()
        ))
        .with_metadata(result.meta().clone())),
    }
}

/// `[?(condition)]`. The condition sees each element as `@` and its index or
/// key as `#`. An error for any element is the result of the whole step.
pub fn condition(ctx: &EvaluationContext, base: &Value, condition: &CompiledExpression) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    let mut meta = base.meta().clone();
    match base.kind() {
        ValueKind::Array(items) => {
            let mut kept = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match judge(condition, &ctx.with_relative(item.clone(), Value::from(i))) {
                    Ok(Verdict::Keep(m)) => {
                        meta = meta.merge(&m);
                        kept.push(item.clone());
                    }
                    Ok(Verdict::Drop(m)) => meta = meta.merge(&m),
                    Err(e) => return e.merge_metadata(&meta),
                }
            }
            Value::array(kept).with_metadata(meta)
        }
        ValueKind::Object(fields) => {
            let mut kept = Object::new();
            for (k, v) in fields.iter() {
                match judge(condition, &ctx.with_relative(v.clone(), Value::text(k))) {
                    Ok(Verdict::Keep(m)) => {
                        meta = meta.merge(&m);
                        kept.insert(k.clone(), v.clone());
                    }
                    Ok(Verdict::Drop(m)) => meta = meta.merge(&m),
                    Err(e) => return e.merge_metadata(&meta),
                }
            }
            Value::object(kept).with_metadata(meta)
        }
        _ => match judge(condition, &ctx.with_relative(base.clone(), Value::undefined())) {
            Ok(Verdict::Keep(m)) => base.clone().merge_metadata(&m),
            Ok(Verdict::Drop(m)) => Value::undefined().with_metadata(meta.merge(&m)),
            Err(e) => e.merge_metadata(&meta),
        },
    }
}

/// `base :: template`. Arrays map every element through the template, any
/// other base is the template's `@` directly.
pub fn subtemplate(ctx: &EvaluationContext, base: &Value, template: &CompiledExpression) -> Value {
    if passes_through(base) {
        return base.clone();
    }
    match base.as_array() {
        Some(items) => {
            let mut mapped = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let v = template.evaluate(&ctx.with_relative(item.clone(), Value::from(i)));
                if v.is_error() {
                    return v.merge_metadata(base.meta());
                }
                if !v.is_undefined() {
                    mapped.push(v);
                }
            }
            derived(Value::array(mapped), base)
        }
        None => derived(
            template.evaluate(&ctx.with_relative(base.clone(), Value::undefined())),
            base,
        ),
    }
}
