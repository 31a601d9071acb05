// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::broker::{AttributeBroker, FunctionBroker};
use crate::coverage::CoverageRecorder;
use crate::expression::CompiledExpression;
use crate::imports::ImportTable;
use crate::value::Value;

pub type Variables = BTreeMap<String, Value>;

pub const SUBJECT: &str = "subject";
pub const ACTION: &str = "action";
pub const RESOURCE: &str = "resource";
pub const ENVIRONMENT: &str = "environment";

/// Bindings of one authorization request.
///
/// Every field is reference counted, so contexts are cloned freely when a step
/// rebinds the relative value.
#[derive(Clone)]
pub struct EvaluationContext {
    subject: Value,
    action: Value,
    resource: Value,
    environment: Value,
    variables: Arc<Variables>,
    relative_value: Option<Value>,
    relative_location: Option<Value>,
    function_broker: Option<Arc<dyn FunctionBroker>>,
    attribute_broker: Option<Arc<dyn AttributeBroker>>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            subject: Value::undefined(),
            action: Value::undefined(),
            resource: Value::undefined(),
            environment: Value::undefined(),
            variables: Arc::default(),
            relative_value: None,
            relative_location: None,
            function_broker: None,
            attribute_broker: None,
        }
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("subject", &self.subject)
            .field("action", &self.action)
            .field("resource", &self.resource)
            .field("environment", &self.environment)
            .field("variables", &self.variables)
            .field("relative_value", &self.relative_value)
            .field("relative_location", &self.relative_location)
            .finish_non_exhaustive()
    }
}

impl EvaluationContext {
    pub fn new(subject: Value, action: Value, resource: Value, environment: Value) -> Self {
        Self {
            subject,
            action,
            resource,
            environment,
            ..Self::default()
        }
    }

    pub fn with_variable(mut self, name: &str, value: Value) -> Self {
        Arc::make_mut(&mut self.variables).insert(name.into(), value);
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    pub fn with_function_broker(mut self, broker: Arc<dyn FunctionBroker>) -> Self {
        self.function_broker = Some(broker);
        self
    }

    pub fn with_attribute_broker(mut self, broker: Arc<dyn AttributeBroker>) -> Self {
        self.attribute_broker = Some(broker);
        self
    }

    /// Copy of this context with `@` bound to `value` and `#` to `location`.
    pub fn with_relative(&self, value: Value, location: Value) -> Self {
        let mut ctx = self.clone();
        ctx.relative_value = Some(value);
        ctx.relative_location = Some(location);
        ctx
    }

    pub fn subject(&self) -> &Value {
        &self.subject
    }

    pub fn action(&self) -> &Value {
        &self.action
    }

    pub fn resource(&self) -> &Value {
        &self.resource
    }

    pub fn environment(&self) -> &Value {
        &self.environment
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Value bound to an identifier; `Undefined` when nothing is bound.
    pub fn get(&self, name: &str) -> Value {
        match name {
            SUBJECT => self.subject.clone(),
            ACTION => self.action.clone(),
            RESOURCE => self.resource.clone(),
            ENVIRONMENT => self.environment.clone(),
            _ => self
                .variables
                .get(name)
                .cloned()
                .unwrap_or_else(Value::undefined),
        }
    }

    pub fn relative_value(&self) -> Value {
        self.relative_value.clone().unwrap_or_else(Value::undefined)
    }

    pub fn relative_location(&self) -> Value {
        self.relative_location
            .clone()
            .unwrap_or_else(Value::undefined)
    }

    pub fn function_broker(&self) -> Option<&Arc<dyn FunctionBroker>> {
        self.function_broker.as_ref()
    }

    pub fn attribute_broker(&self) -> Option<&Arc<dyn AttributeBroker>> {
        self.attribute_broker.as_ref()
    }
}

/// Per-policy compile-time state.
#[derive(Clone, Default)]
pub struct CompilationContext {
    variables: BTreeMap<String, CompiledExpression>,
    function_broker: Option<Arc<dyn FunctionBroker>>,
    imports: ImportTable,
    coverage: Option<Arc<CoverageRecorder>>,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function_broker(mut self, broker: Arc<dyn FunctionBroker>) -> Self {
        self.function_broker = Some(broker);
        self
    }

    pub fn with_imports(mut self, imports: ImportTable) -> Self {
        self.imports = imports;
        self
    }

    pub fn with_coverage(mut self, recorder: Arc<CoverageRecorder>) -> Self {
        self.coverage = Some(recorder);
        self
    }

    /// Binds an already compiled local definition.
    pub fn with_variable(mut self, name: &str, expression: CompiledExpression) -> Self {
        self.variables.insert(name.into(), expression);
        self
    }

    pub fn bind_variable(&mut self, name: &str, expression: CompiledExpression) {
        self.variables.insert(name.into(), expression);
    }

    pub fn variable(&self, name: &str) -> Option<&CompiledExpression> {
        self.variables.get(name)
    }

    pub fn function_broker(&self) -> Option<&Arc<dyn FunctionBroker>> {
        self.function_broker.as_ref()
    }

    pub fn imports(&self) -> &ImportTable {
        &self.imports
    }

    pub fn coverage(&self) -> Option<&Arc<CoverageRecorder>> {
        self.coverage.as_ref()
    }

    /// Context used to fold expressions at compile time. Only the function
    /// broker is available; every request binding is `Undefined`.
    pub fn folding_context(&self) -> EvaluationContext {
        let ctx = EvaluationContext::default();
        match &self.function_broker {
            Some(broker) => ctx.with_function_broker(broker.clone()),
            None => ctx,
        }
    }
}
