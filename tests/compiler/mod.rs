// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::Arc;

use policy_compiler::ast::Expression;
use policy_compiler::stream;
use policy_compiler::*;

use anyhow::{bail, Result};
use futures::executor::block_on;
use futures::StreamExt;
use test_generator::test_resources;

#[derive(serde::Deserialize)]
struct TestCase {
    note: String,
    expression: Expression,
    subject: Option<Value>,
    action: Option<Value>,
    resource: Option<Value>,
    environment: Option<Value>,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
    #[serde(default)]
    imports: Vec<Import>,
    #[serde(default)]
    attributes: BTreeMap<String, Vec<Value>>,
    nature: Option<String>,
    want_result: Option<Value>,
    want_results: Option<Vec<Value>>,
    want_undefined: Option<bool>,
    want_value_error: Option<String>,
    want_error: Option<String>,
    skip: Option<bool>,
}

#[derive(serde::Deserialize)]
struct YamlTest {
    cases: Vec<TestCase>,
}

/// Serves the sequences listed under `attributes` in a test case.
struct FixedAttributes(BTreeMap<String, Vec<Value>>);

impl AttributeBroker for FixedAttributes {
    fn attribute_stream(&self, invocation: AttributeFinderInvocation) -> ValueStream {
        match self.0.get(&invocation.attribute_name) {
            Some(values) => stream::iter(values.clone()),
            None => stream::once(Value::error(format!(
                "Unknown attribute {}.",
                invocation.attribute_name
            ))),
        }
    }
}

fn binding(value: Option<Value>) -> Value {
    value.unwrap_or_else(Value::undefined)
}

fn yaml_test_impl(file: &str) -> Result<()> {
    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    println!("running {file}");

    for case in test.cases.into_iter() {
        print!("case {} ", case.note);
        if case.skip == Some(true) {
            println!("skipped");
            continue;
        }

        let ctx = CompilationContext::new()
            .with_function_broker(FunctionRegistry::with_standard_functions().into_broker())
            .with_imports(ImportTable::new(case.imports));

        let compiled = match (compile(&case.expression, &ctx), &case.want_error) {
            (Ok(compiled), None) => compiled,
            (Ok(_), Some(msg)) => bail!("{}: expected compile error `{msg}`", case.note),
            (Err(e), Some(msg)) => {
                assert!(
                    e.to_string().contains(msg.as_str()),
                    "{}: `{e}` does not contain `{msg}`",
                    case.note
                );
                println!("passed");
                continue;
            }
            (Err(e), None) => return Err(e.into()),
        };

        if let Some(nature) = &case.nature {
            assert_eq!(&format!("{:?}", compiled.nature()), nature, "{}", case.note);
        }

        let eval = EvaluationContext::new(
            binding(case.subject),
            binding(case.action),
            binding(case.resource),
            binding(case.environment),
        )
        .with_variables(case.variables)
        .with_attribute_broker(Arc::new(FixedAttributes(case.attributes)));
        let results: Vec<Value> = block_on(compiled.to_stream(&eval).collect());

        if let Some(expected) = case.want_result {
            assert_eq!(results, vec![expected], "{}", case.note);
        }
        if let Some(expected) = case.want_results {
            assert_eq!(results, expected, "{}", case.note);
        }
        if case.want_undefined == Some(true) {
            assert!(
                matches!(results.as_slice(), [v] if v.is_undefined()),
                "{}: got {results:?}",
                case.note
            );
        }
        if let Some(msg) = case.want_value_error {
            match results.as_slice() {
                [v] if v.as_error().is_some_and(|e| e.message == msg) => {}
                _ => bail!("{}: expected error value `{msg}`, got {results:?}", case.note),
            }
        }

        println!("passed");
    }

    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // If Err is returned, it doesn't always get printed by cargo test.
            // Therefore, panic with the error.
            panic!("{}", e);
        }
    }
}

#[test_resources("tests/compiler/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}
