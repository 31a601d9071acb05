// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use anyhow::Result;
use futures::executor::block_on;
use futures::StreamExt;
use policy_compiler::ast::Expression;
use policy_compiler::stream;
use policy_compiler::*;

fn parse(json: &str) -> Result<Expression> {
    Ok(serde_json::from_str(json)?)
}

fn request(subject: Value) -> EvaluationContext {
    EvaluationContext::new(subject, Value::null(), Value::null(), Value::null())
}

/// Attribute broker that counts subscriptions per attribute.
#[derive(Default)]
struct CountingBroker {
    subscriptions: Mutex<Vec<AttributeFinderInvocation>>,
    values: Vec<(String, Vec<Value>)>,
}

impl CountingBroker {
    fn subscriptions_to(&self, name: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.attribute_name == name)
            .count()
    }
}

impl AttributeBroker for CountingBroker {
    fn attribute_stream(&self, invocation: AttributeFinderInvocation) -> ValueStream {
        let values = self
            .values
            .iter()
            .find(|(name, _)| *name == invocation.attribute_name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        self.subscriptions.lock().unwrap().push(invocation);
        stream::iter(values)
    }
}

const FLAG_AND_AUDIT: &str = r#"{
    "type": "LazyAnd",
    "operands": [
        {"type": "Basic", "base": {"type": "EnvironmentAttribute", "name": "flag.enabled"}},
        {"type": "Basic", "base": {"type": "EnvironmentAttribute", "name": "audit.log"}}
    ]
}"#;

#[test]
fn lazy_and_never_subscribes_past_false() -> Result<()> {
    let broker = Arc::new(CountingBroker {
        values: vec![
            ("flag.enabled".into(), vec![Value::bool(false)]),
            ("audit.log".into(), vec![Value::bool(true)]),
        ],
        ..CountingBroker::default()
    });
    let compiled = compile(&parse(FLAG_AND_AUDIT)?, &CompilationContext::new())?;
    let ctx = EvaluationContext::default().with_attribute_broker(broker.clone());

    let values: Vec<Value> = block_on(compiled.to_stream(&ctx).collect());
    assert_eq!(values, vec![Value::bool(false)]);
    assert_eq!(broker.subscriptions_to("flag.enabled"), 1);
    assert_eq!(broker.subscriptions_to("audit.log"), 0);
    Ok(())
}

#[test]
fn nature_is_promoted_by_operands() -> Result<()> {
    let ctx = CompilationContext::new();
    let constant = parse(r#"{"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "1"}}}"#)?;
    let pure = parse(r#"{"type": "Basic", "base": {"type": "Identifier", "name": "subject"}}"#)?;
    let streaming = parse(r#"{"type": "Basic", "base": {"type": "EnvironmentAttribute", "name": "time.now"}}"#)?;

    let sum = |left: &Expression, right: &Expression| Expression::Addition {
        location: SourceLocation::default(),
        operands: vec![left.clone(), right.clone()],
        operators: vec![ast::AdditiveOperator::Plus],
    };
    assert_eq!(compile(&sum(&constant, &constant), &ctx)?.nature(), Nature::Constant);
    assert_eq!(compile(&sum(&constant, &pure), &ctx)?.nature(), Nature::Pure);
    assert_eq!(compile(&sum(&pure, &streaming), &ctx)?.nature(), Nature::Stream);
    assert_eq!(compile(&sum(&streaming, &constant), &ctx)?.nature(), Nature::Stream);
    Ok(())
}

#[test]
fn dropping_a_subscription_cancels_the_attribute_stream() -> Result<()> {
    struct Endless(Arc<AtomicBool>);

    impl AttributeBroker for Endless {
        fn attribute_stream(&self, _: AttributeFinderInvocation) -> ValueStream {
            struct Guard(Arc<AtomicBool>);
            impl Drop for Guard {
                fn drop(&mut self) {
                    self.0.store(true, Ordering::SeqCst);
                }
            }
            let guard = Guard(self.0.clone());
            let ticks = AtomicUsize::new(0);
            futures::stream::poll_fn(move |_| {
                let _guard = &guard;
                Poll::Ready(Some(Value::from(ticks.fetch_add(1, Ordering::SeqCst))))
            })
            .boxed()
        }
    }

    let dropped = Arc::new(AtomicBool::new(false));
    let compiled = compile(
        &parse(r#"{"type": "Basic", "base": {"type": "EnvironmentAttribute", "name": "clock.ticks"}}"#)?,
        &CompilationContext::new(),
    )?;
    let ctx = EvaluationContext::default().with_attribute_broker(Arc::new(Endless(dropped.clone())));

    let mut subscription = compiled.to_stream(&ctx);
    assert_eq!(block_on(subscription.next()), Some(Value::from(0i64)));
    assert_eq!(block_on(subscription.next()), Some(Value::from(1i64)));
    assert!(!dropped.load(Ordering::SeqCst));

    drop(subscription);
    assert!(dropped.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn secret_attribute_values_stay_secret_through_operators() -> Result<()> {
    struct Secrets;

    impl AttributeBroker for Secrets {
        fn attribute_stream(&self, _: AttributeFinderInvocation) -> ValueStream {
            stream::once(Value::from(41i64).as_secret())
        }
    }

    let expression = parse(
        r#"{
            "type": "Addition",
            "operators": ["+"],
            "operands": [
                {"type": "Basic", "base": {"type": "EnvironmentAttribute", "name": "vault.pin"}},
                {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "1"}}}
            ]
        }"#,
    )?;
    let compiled = compile(&expression, &CompilationContext::new())?;
    let ctx = EvaluationContext::default().with_attribute_broker(Arc::new(Secrets));

    let values: Vec<Value> = block_on(compiled.to_stream(&ctx).collect());
    assert_eq!(values, vec![Value::from(42i64)]);
    assert!(values[0].is_secret());
    Ok(())
}

#[test]
fn attribute_values_remember_where_they_came_from() -> Result<()> {
    let location = SourceLocation::new(2, 8, 2, 20);
    let expression = parse(
        r#"{
            "type": "Basic",
            "location": {"startLine": 2, "startChar": 8, "endLine": 2, "endChar": 20},
            "base": {"type": "EnvironmentAttribute", "name": "time.now"}
        }"#,
    )?;
    let broker = Arc::new(CountingBroker {
        values: vec![("time.now".into(), vec![Value::from(7i64)])],
        ..CountingBroker::default()
    });
    let compiled = compile(&expression, &CompilationContext::new())?;
    let ctx = EvaluationContext::default().with_attribute_broker(broker);

    let values: Vec<Value> = block_on(compiled.to_stream(&ctx).collect());
    let locations: Vec<SourceLocation> = values[0].meta().locations().copied().collect();
    assert_eq!(locations, vec![location]);
    Ok(())
}

#[test]
fn attribute_names_and_options_resolve() -> Result<()> {
    let expression = parse(
        r#"{
            "type": "Basic",
            "base": {"type": "Identifier", "name": "subject"},
            "steps": [{
                "type": "AttributeFinder",
                "name": "roles",
                "options": {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Object", "members": [
                    {"key": "retries", "value": {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "1"}}}},
                    {"key": "fresh", "value": {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Boolean", "value": true}}}}
                ]}}}
            }]
        }"#,
    )?;
    let imports = ImportTable::new(vec![Import::new(&["user"], "roles")]);
    let compiled = compile(&expression, &CompilationContext::new().with_imports(imports))?;

    let broker = Arc::new(CountingBroker::default());
    let defaults = Value::from_json_str(r#"{"attributeFinderOptions": {"retries": 9, "pollIntervalMs": 10}}"#)?;
    let ctx = request(Value::text("alice"))
        .with_variable(ATTRIBUTE_FINDER_OPTIONS_VARIABLE, defaults)
        .with_attribute_broker(broker.clone());
    let _: Vec<Value> = block_on(compiled.to_stream(&ctx).collect());

    let subscriptions = broker.subscriptions.lock().unwrap();
    let [invocation] = subscriptions.as_slice() else {
        panic!("expected one subscription, got {}", subscriptions.len());
    };
    assert_eq!(invocation.attribute_name, "user.roles");
    assert_eq!(invocation.entity, Value::text("alice"));
    assert_eq!(invocation.retries, 1);
    assert!(invocation.fresh);
    assert_eq!(invocation.poll_interval.as_millis(), 10);
    assert_eq!(invocation.initial_timeout.as_millis(), 3000);
    Ok(())
}

#[test]
fn coverage_round_trip() -> Result<()> {
    let recorder = Arc::new(CoverageRecorder::new());
    let ctx = CompilationContext::new().with_coverage(recorder.clone());
    let condition = parse(
        r#"{"type": "Basic", "location": {"startLine": 4, "startChar": 2, "endLine": 4, "endChar": 9},
            "base": {"type": "Identifier", "name": "subject"}}"#,
    )?;
    let compiled = Compiler::new(&ctx).compile_condition(0, &condition)?;

    assert_eq!(compiled.evaluate(&request(Value::bool(true))), Value::bool(true));
    let summary = CoverageSummary::from_hits(&recorder.collect_and_clear());
    assert_eq!(summary.branch_coverage(), 0.5);

    compiled.evaluate(&request(Value::bool(true)));
    compiled.evaluate(&request(Value::bool(false)));
    // Non-boolean outcomes are not recorded.
    compiled.evaluate(&request(Value::text("x")));

    let hits = recorder.collect_and_clear();
    assert_eq!(hits.len(), 2);
    let json = serde_json::to_string(&hits)?;
    let restored: Vec<CoverageHit> = serde_json::from_str(&json)?;
    assert_eq!(restored, hits);

    let summary = CoverageSummary::from_hits(&restored);
    assert_eq!(summary.branch_coverage(), 1.0);
    let condition = summary.conditions.values().next().unwrap();
    assert_eq!(condition.location, SourceLocation::new(4, 2, 4, 9));
    assert!(condition.is_fully_covered());
    Ok(())
}
