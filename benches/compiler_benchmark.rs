// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hint::black_box;

use policy_compiler::ast::Expression;
use policy_compiler::{compile, CompilationContext, EvaluationContext, FunctionRegistry, Value};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn parse(json: &str) -> Expression {
    serde_json::from_str(json).unwrap()
}

fn compilation_context() -> CompilationContext {
    CompilationContext::new()
        .with_function_broker(FunctionRegistry::with_standard_functions().into_broker())
}

const ROLE_CHECK: &str = r#"{
    "type": "LazyAnd",
    "operands": [
        {
            "type": "Equality", "operator": "==",
            "left": {"type": "Basic", "base": {"type": "Identifier", "name": "action"}},
            "right": {"type": "Basic", "base": {"type": "Value", "value": {"kind": "String", "value": "read"}}}
        },
        {
            "type": "Comparison", "operator": "in",
            "left": {"type": "Basic", "base": {"type": "Value", "value": {"kind": "String", "value": "admin"}}},
            "right": {"type": "Basic", "base": {"type": "Identifier", "name": "subject"}, "steps": [{"type": "Key", "name": "roles"}]}
        }
    ]
}"#;

fn role_check(c: &mut Criterion) {
    let expression = parse(ROLE_CHECK);
    let ctx = compilation_context();

    c.bench_function("compile role check", |b| {
        b.iter(|| compile(black_box(&expression), &ctx).unwrap())
    });

    let compiled = compile(&expression, &ctx).unwrap();
    let request = EvaluationContext::new(
        Value::from_json_str(r#"{"roles": ["user", "admin"]}"#).unwrap(),
        Value::text("read"),
        Value::null(),
        Value::null(),
    );
    c.bench_function("evaluate role check", |b| {
        b.iter(|| assert_eq!(compiled.evaluate(black_box(&request)), Value::bool(true)))
    });
}

fn condition_filter(c: &mut Criterion) {
    let expression = parse(
        r#"{
            "type": "Basic",
            "base": {"type": "Identifier", "name": "resource"},
            "steps": [{"type": "Condition", "condition": {
                "type": "Comparison", "operator": ">",
                "left": {"type": "Basic", "base": {"type": "Relative"}},
                "right": {"type": "Basic", "base": {"type": "Identifier", "name": "subject"}}
            }}]
        }"#,
    );
    let compiled = compile(&expression, &compilation_context()).unwrap();

    let mut group = c.benchmark_group("condition step");
    for n in [10usize, 100, 1000] {
        let items: Vec<Value> = (0..n).map(Value::from).collect();
        let request = EvaluationContext::new(
            Value::from(n / 2),
            Value::null(),
            Value::array(items),
            Value::null(),
        );
        group.bench_with_input(BenchmarkId::from_parameter(n), &request, |b, request| {
            b.iter(|| compiled.evaluate(black_box(request)))
        });
    }
    group.finish();
}

fn constant_folding(c: &mut Criterion) {
    let expression = parse(
        r#"{
            "type": "Addition", "operators": ["+", "+"],
            "operands": [
                {"type": "Basic", "base": {"type": "Function", "name": "math.max", "arguments": [
                    {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "3"}}},
                    {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "8"}}}
                ]}},
                {"type": "Multiplication", "operators": ["*"], "operands": [
                    {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "2.5"}}},
                    {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "4"}}}
                ]},
                {"type": "Basic", "base": {"type": "Value", "value": {"kind": "Number", "raw": "1"}}}
            ]
        }"#,
    );
    let ctx = compilation_context();
    c.bench_function("fold constant arithmetic", |b| {
        b.iter(|| compile(black_box(&expression), &ctx).unwrap())
    });
}

criterion_group!(benches, role_check, condition_filter, constant_folding);
criterion_main!(benches);
