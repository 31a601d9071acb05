// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(clippy::pattern_type_mismatch)]

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::time::Duration;

use anyhow::{bail, Result};
use lazy_static::lazy_static;

use crate::stream::ValueStream;
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInvocation {
    pub name: String,
    pub arguments: Vec<Value>,
}

/// Executes named pure functions.
pub trait FunctionBroker: Send + Sync {
    fn evaluate_function(&self, invocation: &FunctionInvocation) -> Value;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFinderInvocation {
    pub attribute_name: String,
    /// Left-hand value of the step, `Null` for environment attributes.
    pub entity: Value,
    pub arguments: Vec<Value>,
    pub initial_timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: Duration,
    pub retries: u64,
    pub fresh: bool,
}

/// Supplies live attribute values (policy information points).
pub trait AttributeBroker: Send + Sync {
    fn attribute_stream(&self, invocation: AttributeFinderInvocation) -> ValueStream;
}

pub type FunctionFn = fn(&str, &[Value]) -> Result<Value>;

fn ensure_args_count(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        if expected == 1 {
            bail!("`{name}` expects 1 argument");
        } else {
            bail!("`{name}` expects {expected} arguments");
        }
    }
    Ok(())
}

fn length(name: &str, args: &[Value]) -> Result<Value> {
    ensure_args_count(name, args, 1)?;
    Ok(match args[0].kind() {
        ValueKind::Array(a) => Value::from(a.len()),
        ValueKind::Object(o) => Value::from(o.len()),
        ValueKind::Text(s) => Value::from(s.chars().count()),
        _ => bail!("`{name}` requires array/object/text argument. Got `{}`.", args[0].type_name()),
    })
}

fn extremum(name: &str, args: &[Value], want_max: bool) -> Result<Value> {
    let mut best: Option<(&Value, &crate::number::Number)> = None;
    for arg in args {
        let Some(n) = arg.as_number() else {
            bail!("`{name}` requires number arguments. Got `{}`.", arg.type_name());
        };
        let better = match best {
            None => true,
            Some((_, b)) if want_max => n > b,
            Some((_, b)) => n < b,
        };
        if better {
            best = Some((arg, n));
        }
    }
    Ok(best.map_or_else(Value::undefined, |(v, _)| v.clone()))
}

fn max(name: &str, args: &[Value]) -> Result<Value> {
    extremum(name, args, true)
}

fn min(name: &str, args: &[Value]) -> Result<Value> {
    extremum(name, args, false)
}

fn to_string(name: &str, args: &[Value]) -> Result<Value> {
    ensure_args_count(name, args, 1)?;
    Ok(match args[0].as_text() {
        Some(s) => Value::text(s),
        None => Value::text(args[0].to_string()),
    })
}

fn lower(name: &str, args: &[Value]) -> Result<Value> {
    ensure_args_count(name, args, 1)?;
    match args[0].as_text() {
        Some(s) => Ok(Value::text(s.to_lowercase())),
        None => bail!("`{name}` requires text argument. Got `{}`.", args[0].type_name()),
    }
}

fn upper(name: &str, args: &[Value]) -> Result<Value> {
    ensure_args_count(name, args, 1)?;
    match args[0].as_text() {
        Some(s) => Ok(Value::text(s.to_uppercase())),
        None => bail!("`{name}` requires text argument. Got `{}`.", args[0].type_name()),
    }
}

lazy_static! {
    pub static ref STANDARD_FUNCTIONS: BTreeMap<&'static str, FunctionFn> = {
        let mut m: BTreeMap<&'static str, FunctionFn> = BTreeMap::new();
        m.insert("standard.length", length);
        m.insert("standard.toString", to_string);
        m.insert("math.max", max);
        m.insert("math.min", min);
        m.insert("string.toLowerCase", lower);
        m.insert("string.toUpperCase", upper);
        m
    };
}

/// Function broker backed by a table of native functions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standard_functions() -> Self {
        let mut registry = Self::new();
        for (name, f) in STANDARD_FUNCTIONS.iter() {
            registry.functions.insert(String::from(*name), *f);
        }
        registry
    }

    pub fn register(&mut self, name: &str, f: FunctionFn) {
        self.functions.insert(name.into(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn into_broker(self) -> Arc<dyn FunctionBroker> {
        Arc::new(self)
    }
}

impl FunctionBroker for FunctionRegistry {
    fn evaluate_function(&self, invocation: &FunctionInvocation) -> Value {
        let Some(f) = self.functions.get(&invocation.name) else {
            return Value::error(format!("Unknown function: '{}'.", invocation.name));
        };
        log::debug!("evaluating function {}", invocation.name);
        match f(&invocation.name, &invocation.arguments) {
            Ok(v) => v,
            Err(e) => Value::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn call(name: &str, arguments: Vec<Value>) -> Value {
        FunctionRegistry::with_standard_functions().evaluate_function(&FunctionInvocation {
            name: name.into(),
            arguments,
        })
    }

    #[test]
    fn standard_functions() {
        assert_eq!(
            call("math.max", vec![Value::from(1i64), Value::from(7i64), Value::from(3i64)]),
            Value::from(7i64)
        );
        assert_eq!(
            call("math.min", vec![Value::from(4i64), Value::from(-2i64)]),
            Value::from(-2i64)
        );
        assert_eq!(
            call("standard.length", vec![Value::from_json_str("[1,2,3]").unwrap()]),
            Value::from(3usize)
        );
        assert_eq!(call("string.toUpperCase", vec![Value::text("ab")]), Value::text("AB"));
    }

    #[test]
    fn failures_become_error_values() {
        assert!(call("math.max", vec![Value::text("x")]).is_error());
        assert!(call("standard.length", vec![]).is_error());
        let unknown = call("no.such", vec![]);
        assert_eq!(unknown.as_error().unwrap().message, "Unknown function: 'no.such'.");
    }
}
