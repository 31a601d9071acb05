// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compiles syntax trees into [`CompiledExpression`]s.
//!
//! Each precedence level compiles its operands and hands them to the nature
//! combinator together with the matching value-level operator. The combinator
//! folds constant operands, so constant sub-trees never reach evaluation.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::str::FromStr;
use core::time::Duration;

use futures::StreamExt;

use crate::ast::{
    AdditiveOperator, Base, BasicExpression, ComparisonOperator, EqualityOperator, Expression,
    Literal, Member, MultiplicativeOperator, Step, UnaryOperator,
};
use crate::broker::{AttributeFinderInvocation, FunctionBroker, FunctionInvocation};
use crate::context::{CompilationContext, EvaluationContext};
#[cfg(feature = "coverage")]
use crate::coverage::CoverageRecorder;
use crate::error::{CompileError, Result};
use crate::expression::{combine, combine_in_context, CompiledExpression, Nature};
use crate::location::SourceLocation;
use crate::number::Number;
use crate::operators;
use crate::steps;
use crate::stream::{self, ValueStream};
use crate::value::{Metadata, Object, Value};

/// Variable holding the default options of attribute finders.
pub const ATTRIBUTE_FINDER_OPTIONS_VARIABLE: &str = "SAPL";
const ATTRIBUTE_FINDER_OPTIONS_KEY: &str = "attributeFinderOptions";

const DEFAULT_INITIAL_TIMEOUT_MS: u64 = 3000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 30000;
const DEFAULT_BACKOFF_MS: u64 = 1000;
const DEFAULT_RETRIES: u64 = 3;

pub fn compile(expression: &Expression, ctx: &CompilationContext) -> Result<CompiledExpression> {
    Compiler::new(ctx).compile(expression)
}

pub struct Compiler<'a> {
    ctx: &'a CompilationContext,
    folding: EvaluationContext,
}

impl<'a> Compiler<'a> {
    pub fn new(ctx: &'a CompilationContext) -> Self {
        Self {
            ctx,
            folding: ctx.folding_context(),
        }
    }

    pub fn compile(&self, expression: &Expression) -> Result<CompiledExpression> {
        match expression {
            Expression::LazyOr { location, operands } => {
                self.compile_lazy(operands, location, true)
            }
            Expression::LazyAnd { location, operands } => {
                self.compile_lazy(operands, location, false)
            }
            Expression::EagerOr { location, operands } => {
                self.compile_eager(operands, location, "Eager OR", operators::eager_or)
            }
            Expression::ExclusiveOr { location, operands } => {
                self.compile_eager(operands, location, "XOR", operators::exclusive_or)
            }
            Expression::EagerAnd { location, operands } => {
                self.compile_eager(operands, location, "Eager AND", operators::eager_and)
            }
            Expression::Equality {
                location,
                operator,
                left,
                right,
            } => self.compile_equality(*operator, left, right, location),
            Expression::Comparison {
                location,
                operator,
                left,
                right,
            } => {
                let op: fn(&Value, &Value) -> Value = match operator {
                    ComparisonOperator::Less => operators::less,
                    ComparisonOperator::LessOrEqual => operators::less_or_equal,
                    ComparisonOperator::Greater => operators::greater,
                    ComparisonOperator::GreaterOrEqual => operators::greater_or_equal,
                    ComparisonOperator::In => operators::contains,
                };
                self.compile_binary(left, right, op, location)
            }
            Expression::Addition {
                location,
                operands,
                operators: ops,
            } => {
                let ops: Vec<BinaryOp> = ops
                    .iter()
                    .map(|o| match o {
                        AdditiveOperator::Plus => operators::add as BinaryOp,
                        AdditiveOperator::Minus => operators::subtract,
                    })
                    .collect();
                self.compile_arithmetic("Addition", operands, ops, location)
            }
            Expression::Multiplication {
                location,
                operands,
                operators: ops,
            } => {
                let ops: Vec<BinaryOp> = ops
                    .iter()
                    .map(|o| match o {
                        MultiplicativeOperator::Times => operators::multiply as BinaryOp,
                        MultiplicativeOperator::Divide => operators::divide,
                        MultiplicativeOperator::Modulo => operators::modulo,
                    })
                    .collect();
                self.compile_arithmetic("Multiplication", operands, ops, location)
            }
            Expression::Unary {
                location,
                operator,
                operand,
            } => {
                let operand = self.compile(operand)?;
                let op: fn(&Value) -> Value = match operator {
                    UnaryOperator::Not => operators::not,
                    UnaryOperator::Negate => operators::negate,
                    UnaryOperator::Plus => operators::unary_plus,
                };
                Ok(located(vec![operand], location, move |v| op(&v[0])))
            }
            Expression::Basic(basic) => self.compile_basic(basic),
        }
    }

    /// Compiles a boolean condition of a policy body. With a coverage recorder
    /// configured, every boolean outcome is recorded against `statement_index`.
    pub fn compile_condition(
        &self,
        statement_index: usize,
        expression: &Expression,
    ) -> Result<CompiledExpression> {
        let compiled = self.compile(expression)?;
        log::debug!(
            "condition {statement_index} compiled as {:?}",
            compiled.nature()
        );
        #[cfg(feature = "coverage")]
        {
            if let Some(recorder) = self.ctx.coverage() {
                let hits = HitRecorder {
                    recorder: recorder.clone(),
                    statement_index,
                    location: expression.location(),
                };
                return Ok(hits.instrument(compiled));
            }
        }
        Ok(compiled)
    }

    fn compile_all(&self, expressions: &[Expression]) -> Result<Vec<CompiledExpression>> {
        expressions.iter().map(|e| self.compile(e)).collect()
    }

    fn compile_binary(
        &self,
        left: &Expression,
        right: &Expression,
        op: BinaryOp,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        let operands = vec![self.compile(left)?, self.compile(right)?];
        Ok(located(operands, location, move |v| op(&v[0], &v[1])))
    }

    fn compile_equality(
        &self,
        operator: EqualityOperator,
        left: &Expression,
        right: &Expression,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        match operator {
            EqualityOperator::Equal => self.compile_binary(left, right, operators::equal, location),
            EqualityOperator::NotEqual => {
                self.compile_binary(left, right, operators::not_equal, location)
            }
            EqualityOperator::Regex => {
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                #[cfg(feature = "regex")]
                {
                    if let CompiledExpression::Constant(pattern) = &right {
                        if let Ok(regex) = operators::compile_pattern(pattern) {
                            let pattern = pattern.clone();
                            return Ok(located(vec![left], location, move |v| {
                                operators::regex_match_compiled(&v[0], &regex, &pattern)
                            }));
                        }
                    }
                }
                Ok(located(vec![left, right], location, |v| {
                    operators::regex_match(&v[0], &v[1])
                }))
            }
        }
    }

    fn compile_eager(
        &self,
        operands: &[Expression],
        location: &SourceLocation,
        production: &'static str,
        op: fn(&[Value]) -> Value,
    ) -> Result<CompiledExpression> {
        match operands {
            [] => Err(CompileError::EmptyOperands { production }.at(location)),
            [single] => self.compile(single),
            _ => Ok(located(self.compile_all(operands)?, location, op)),
        }
    }

    fn compile_arithmetic(
        &self,
        production: &'static str,
        operands: &[Expression],
        ops: Vec<BinaryOp>,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        if operands.is_empty() {
            return Err(CompileError::EmptyOperands { production }.at(location));
        }
        if ops.len() + 1 != operands.len() {
            return Err(CompileError::OperatorCountMismatch {
                production,
                operands: operands.len(),
                operators: ops.len(),
            }
            .at(location));
        }
        if let [single] = operands {
            return self.compile(single);
        }
        let compiled = self.compile_all(operands)?;
        Ok(located(compiled, location, move |values| {
            let mut acc = values[0].clone();
            for (op, v) in ops.iter().zip(&values[1..]) {
                acc = op(&acc, v);
            }
            acc
        }))
    }

    /// `||` and `&&`. Stops at the first operand equal to `short_circuit`.
    fn compile_lazy(
        &self,
        operands: &[Expression],
        location: &SourceLocation,
        short_circuit: bool,
    ) -> Result<CompiledExpression> {
        let production = if short_circuit { "Lazy OR" } else { "Lazy AND" };
        match operands {
            [] => return Err(CompileError::EmptyOperands { production }.at(location)),
            [single] => return self.compile(single),
            _ => {}
        }

        let mut meta = Metadata::empty();
        let mut remaining = Vec::new();
        let mut compiled = self.compile_all(operands)?.into_iter();
        while let Some(operand) = compiled.next() {
            let Some(value) = operand.as_constant() else {
                remaining.push(operand);
                remaining.extend(compiled);
                break;
            };
            match LazyStep::of(value, short_circuit, &meta, location) {
                LazyStep::Done(v) => return Ok(CompiledExpression::Constant(v)),
                LazyStep::Continue(m) => meta = m,
            }
        }
        if remaining.is_empty() {
            return Ok(CompiledExpression::Constant(
                Value::bool(!short_circuit).with_metadata(meta),
            ));
        }

        let remaining = Arc::new(remaining);
        let location = *location;
        if remaining.iter().any(|o| o.nature() == Nature::Stream) {
            return Ok(CompiledExpression::stream(move |ctx| {
                let chain = LazyChain {
                    operands: remaining.clone(),
                    short_circuit,
                    location,
                };
                chain.subscribe(ctx.clone(), 0, meta.clone())
            }));
        }

        let scoped = remaining.iter().any(CompiledExpression::is_subscription_scoped);
        Ok(CompiledExpression::pure(scoped, move |ctx| {
            let mut meta = meta.clone();
            for operand in remaining.iter() {
                match LazyStep::of(&operand.evaluate(ctx), short_circuit, &meta, &location) {
                    LazyStep::Done(v) => return v,
                    LazyStep::Continue(m) => meta = m,
                }
            }
            Value::bool(!short_circuit).with_metadata(meta)
        }))
    }

    fn compile_basic(&self, basic: &BasicExpression) -> Result<CompiledExpression> {
        let mut current = self.compile_base(&basic.base, &basic.location)?;
        for step in &basic.steps {
            current = self.compile_step(current, step, &basic.location)?;
        }
        if let Some(template) = &basic.subtemplate {
            let template = self.compile(template)?;
            current = self.compile_subtemplate(current, template, &basic.location);
        }
        Ok(current)
    }

    fn compile_base(&self, base: &Base, location: &SourceLocation) -> Result<CompiledExpression> {
        match base {
            Base::Group { expression } => self.compile(expression),
            Base::Value { value } => self.compile_literal(value, location),
            Base::Function { name, arguments } => self.compile_function(name, arguments, location),
            Base::Identifier { name } => self.compile_identifier(name, location),
            Base::Relative => Ok(CompiledExpression::pure(false, |ctx| ctx.relative_value())),
            Base::RelativeLocation => {
                Ok(CompiledExpression::pure(false, |ctx| ctx.relative_location()))
            }
            Base::EnvironmentAttribute {
                name,
                arguments,
                options,
                head,
            } => self.compile_attribute(
                CompiledExpression::Constant(Value::null()),
                name,
                arguments,
                options.as_deref(),
                *head,
                location,
            ),
        }
    }

    fn compile_identifier(
        &self,
        name: &str,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        if name.is_empty() {
            return Err(CompileError::MissingIdentifier.at(location));
        }
        if let Some(local) = self.ctx.variable(name) {
            return Ok(local.clone());
        }
        let name = String::from(name);
        Ok(CompiledExpression::pure(true, move |ctx| ctx.get(&name)))
    }

    fn compile_literal(
        &self,
        literal: &Literal,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        Ok(match literal {
            Literal::Number { raw } => match Number::from_str(raw) {
                Ok(n) => CompiledExpression::Constant(Value::from(n)),
                Err(_) => invalid(format!("Invalid number format: {raw}."), location),
            },
            Literal::String { value } => CompiledExpression::Constant(Value::text(value)),
            Literal::Boolean { value } => CompiledExpression::Constant(Value::bool(*value)),
            Literal::Null => CompiledExpression::Constant(Value::null()),
            Literal::Undefined => CompiledExpression::Constant(Value::undefined()),
            Literal::Array { items } => combine(self.compile_all(items)?, build_array),
            Literal::Object { members } => self.compile_object(members)?,
        })
    }

    fn compile_object(&self, members: &[Member]) -> Result<CompiledExpression> {
        let keys: Vec<String> = members.iter().map(|m| m.key.clone()).collect();
        let values = members
            .iter()
            .map(|m| self.compile(&m.value))
            .collect::<Result<Vec<_>>>()?;
        Ok(combine(values, move |vals| {
            if let Some(e) = first_error(vals) {
                return e;
            }
            let mut fields = Object::new();
            for (k, v) in keys.iter().zip(vals) {
                if !v.is_undefined() {
                    fields.insert(k.clone(), v.clone());
                }
            }
            Value::object(fields).with_metadata(Metadata::merge_all(vals))
        }))
    }

    fn compile_function(
        &self,
        name: &str,
        arguments: &[Expression],
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        if name.is_empty() {
            return Err(CompileError::MissingFunctionIdentifier.at(location));
        }
        let Some(broker) = self.ctx.function_broker() else {
            return Err(CompileError::NoFunctionBroker.at(location));
        };
        let name = self.ctx.imports().resolve(name);
        let arguments = self.compile_all(arguments)?;
        log::debug!("function call {name} with {} arguments", arguments.len());

        let compile_broker: Arc<dyn FunctionBroker> = broker.clone();
        let location = *location;
        Ok(combine_in_context(
            arguments,
            false,
            &self.folding,
            move |ctx, values| {
                if let Some(e) = first_error(values) {
                    return e;
                }
                let broker = ctx.function_broker().unwrap_or(&compile_broker);
                let invocation = FunctionInvocation {
                    name: name.clone(),
                    arguments: values.to_vec(),
                };
                locate_error(broker.evaluate_function(&invocation), location)
                    .merge_metadata(&Metadata::merge_all(values))
            },
        ))
    }

    fn compile_step(
        &self,
        base: CompiledExpression,
        step: &Step,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        Ok(match step {
            Step::Key { name } => {
                let name = name.clone();
                located(vec![base], location, move |v| steps::key(&v[0], &name))
            }
            Step::Wildcard => located(vec![base], location, |v| steps::wildcard(&v[0])),
            Step::Index { index } => match parse_integer(index) {
                Some(i) => located(vec![base], location, move |v| steps::index(&v[0], i)),
                None => invalid(format!("Invalid array index: {index}."), location),
            },
            Step::Expression { expression } => {
                let selector = self.compile(expression)?;
                self.compile_relative_step(
                    base,
                    selector,
                    "expression step",
                    location,
                    |ctx, base, selector| {
                        let ctx = ctx.with_relative(base.clone(), Value::undefined());
                        steps::expression_step(base, &selector.evaluate(&ctx))
                    },
                )
            }
            Step::Slice { from, to, step } => {
                let parse = |raw: &Option<String>| match raw {
                    None => Ok(None),
                    Some(r) => parse_integer(r).map(Some).ok_or_else(|| r.clone()),
                };
                match (parse(from), parse(to), parse(step)) {
                    (Ok(from), Ok(to), Ok(step)) => located(vec![base], location, move |v| {
                        steps::slice(&v[0], from, to, step)
                    }),
                    (Err(r), _, _) | (_, Err(r), _) | (_, _, Err(r)) => {
                        invalid(format!("Invalid array index: {r}."), location)
                    }
                }
            }
            Step::Condition { condition } => {
                let condition = self.compile(condition)?;
                self.compile_relative_step(
                    base,
                    condition,
                    "condition step",
                    location,
                    steps::condition,
                )
            }
            Step::IndexUnion { indices } => {
                let parsed = indices
                    .iter()
                    .map(|i| parse_integer(i).ok_or(i))
                    .collect::<core::result::Result<Vec<_>, _>>();
                match parsed {
                    Ok(indices) => located(vec![base], location, move |v| {
                        steps::index_union(&v[0], &indices)
                    }),
                    Err(raw) => invalid(format!("Invalid array index: {raw}."), location),
                }
            }
            Step::AttributeUnion { keys } => {
                let keys = keys.clone();
                located(vec![base], location, move |v| {
                    steps::attribute_union(&v[0], &keys)
                })
            }
            Step::RecursiveKey { name } => {
                let name = name.clone();
                located(vec![base], location, move |v| steps::recursive_key(&v[0], &name))
            }
            Step::RecursiveWildcard => {
                located(vec![base], location, |v| steps::recursive_wildcard(&v[0]))
            }
            Step::RecursiveIndex { index } => match parse_integer(index) {
                Some(i) => located(vec![base], location, move |v| {
                    steps::recursive_index(&v[0], i)
                }),
                None => invalid(format!("Invalid recursive index: {index}."), location),
            },
            Step::AttributeFinder {
                location,
                name,
                arguments,
                options,
                head,
            } => {
                let options = options.as_deref();
                self.compile_attribute(base, name, arguments, options, *head, location)?
            }
        })
    }

    /// Step whose inner expression runs with `@` bound inside the base. The step
    /// folds when the base is constant and the inner expression reads only `@`
    /// and `#`.
    fn compile_relative_step(
        &self,
        base: CompiledExpression,
        inner: CompiledExpression,
        kind: &str,
        location: &SourceLocation,
        apply: fn(&EvaluationContext, &Value, &CompiledExpression) -> Value,
    ) -> CompiledExpression {
        if inner.nature() == Nature::Stream {
            return invalid(format!("Stream expressions not supported in {kind}."), location);
        }
        let scoped = inner.is_subscription_scoped();
        let location = *location;
        combine_in_context(vec![base], scoped, &self.folding, move |ctx, v| {
            locate_error(apply(ctx, &v[0], &inner), location)
        })
    }

    fn compile_subtemplate(
        &self,
        base: CompiledExpression,
        template: CompiledExpression,
        location: &SourceLocation,
    ) -> CompiledExpression {
        self.compile_relative_step(base, template, "subtemplate", location, steps::subtemplate)
    }

    fn compile_attribute(
        &self,
        entity: CompiledExpression,
        name: &str,
        arguments: &[Expression],
        options: Option<&Expression>,
        head: bool,
        location: &SourceLocation,
    ) -> Result<CompiledExpression> {
        if name.is_empty() {
            return Err(CompileError::MissingAttributeIdentifier.at(location));
        }
        let attribute_name = self.ctx.imports().resolve(name);
        let options = match options {
            Some(o) => self.compile(o)?,
            None => CompiledExpression::Constant(Value::undefined()),
        };

        let mut operands = vec![entity, options];
        operands.extend(self.compile_all(arguments)?);
        let operands = Arc::new(operands);
        let location = *location;
        log::debug!("attribute finder {attribute_name} (head: {head})");

        Ok(CompiledExpression::stream(move |ctx| {
            let sources = operands.iter().map(|o| o.to_stream(ctx)).collect();
            let parameters = stream::combine_latest(
                sources,
                Arc::new(|values: &[Value]| Value::array(values.to_vec())),
            );
            let ctx = ctx.clone();
            let attribute_name = attribute_name.clone();
            let values = stream::switch_map(
                parameters,
                Box::new(move |parameters| {
                    attribute_stream(&ctx, &attribute_name, &parameters, location)
                }),
            );
            if head {
                values.take(1).boxed()
            } else {
                values
            }
        }))
    }
}

/// Outcome of one operand of a lazy boolean chain.
enum LazyStep {
    /// The chain's value is known.
    Done(Value),
    /// Move on, with the metadata gathered so far.
    Continue(Metadata),
}

impl LazyStep {
    fn of(value: &Value, short_circuit: bool, meta: &Metadata, location: &SourceLocation) -> Self {
        match operators::lazy_operand(value) {
            Err(e) => LazyStep::Done(locate_error(e.merge_metadata(meta), *location)),
            Ok(b) if b == short_circuit => {
                LazyStep::Done(Value::bool(b).with_metadata(meta.merge(value.meta())))
            }
            Ok(_) => LazyStep::Continue(meta.merge(value.meta())),
        }
    }
}

/// Non-constant tail of a lazy boolean chain with at least one stream operand.
#[derive(Clone)]
struct LazyChain {
    operands: Arc<Vec<CompiledExpression>>,
    short_circuit: bool,
    location: SourceLocation,
}

impl LazyChain {
    /// Subscribes to `operands[index]` and only moves on to the next operand
    /// when the current one emitted the non short-circuiting value.
    fn subscribe(self, ctx: EvaluationContext, index: usize, meta: Metadata) -> ValueStream {
        let source = self.operands[index].to_stream(&ctx);
        stream::switch_map(
            source,
            Box::new(move |v| {
                match LazyStep::of(&v, self.short_circuit, &meta, &self.location) {
                    LazyStep::Continue(m) if index + 1 < self.operands.len() => {
                        self.clone().subscribe(ctx.clone(), index + 1, m)
                    }
                    LazyStep::Continue(m) => {
                        stream::once(Value::bool(!self.short_circuit).with_metadata(m))
                    }
                    LazyStep::Done(v) => stream::once(v),
                }
            }),
        )
    }
}

fn attribute_stream(
    ctx: &EvaluationContext,
    attribute_name: &str,
    parameters: &Value,
    location: SourceLocation,
) -> ValueStream {
    let parameters = parameters.as_array().map(Vec::as_slice).unwrap_or_default();
    let [entity, options, arguments @ ..] = parameters else {
        return stream::once(Value::error_at("Missing attribute parameters.", location));
    };
    if let Some(e) = first_error(parameters) {
        return stream::once(locate_error(e, location));
    }
    if entity.is_undefined() {
        return stream::once(Value::error_at(
            "Undefined value handed over as left-hand parameter to policy information point.",
            location,
        ));
    }
    let Some(broker) = ctx.attribute_broker() else {
        log::warn!("attribute {attribute_name} requested without an attribute broker");
        return stream::once(Value::error_at(
            "Internal PDP Error. AttributeBroker not configured in evaluation context.",
            location,
        ));
    };

    let defaults = steps::key(
        &ctx.get(ATTRIBUTE_FINDER_OPTIONS_VARIABLE),
        ATTRIBUTE_FINDER_OPTIONS_KEY,
    );
    let option = |name: &str| -> Option<Value> {
        [options, &defaults]
            .into_iter()
            .find_map(|o| o.as_object()?.get(name).cloned())
    };
    let millis = |name: &str, default: u64| {
        let ms = option(name)
            .and_then(|v| v.as_number()?.as_i64())
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default);
        Duration::from_millis(ms)
    };
    let invocation = AttributeFinderInvocation {
        attribute_name: attribute_name.into(),
        entity: entity.clone(),
        arguments: arguments.to_vec(),
        initial_timeout: millis("initialTimeOutMs", DEFAULT_INITIAL_TIMEOUT_MS),
        poll_interval: millis("pollIntervalMs", DEFAULT_POLL_INTERVAL_MS),
        backoff: millis("backoffMs", DEFAULT_BACKOFF_MS),
        retries: option("retries")
            .and_then(|v| v.as_number()?.as_i64())
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_RETRIES),
        fresh: option("fresh").and_then(|v| v.as_bool()).unwrap_or(false),
    };

    let secret = entity.is_secret();
    broker
        .attribute_stream(invocation)
        .map(move |v| {
            let v = locate_error(v, location).with_location(location);
            if secret {
                v.as_secret()
            } else {
                v
            }
        })
        .boxed()
}

/// Coverage instrumentation of one condition.
#[cfg(feature = "coverage")]
#[derive(Clone)]
struct HitRecorder {
    recorder: Arc<CoverageRecorder>,
    statement_index: usize,
    location: SourceLocation,
}

#[cfg(feature = "coverage")]
impl HitRecorder {
    fn observe(&self, value: &Value) {
        if let Some(result) = value.as_bool() {
            self.recorder
                .record_hit(self.statement_index, result, &self.location);
        }
    }

    /// Constant conditions become pure ones so that every evaluation records.
    fn instrument(self, compiled: CompiledExpression) -> CompiledExpression {
        match compiled {
            CompiledExpression::Constant(v) => CompiledExpression::pure(false, move |_| {
                self.observe(&v);
                v.clone()
            }),
            CompiledExpression::Pure(p) => {
                CompiledExpression::pure(p.is_subscription_scoped(), move |ctx| {
                    let v = p.evaluate(ctx);
                    self.observe(&v);
                    v
                })
            }
            CompiledExpression::Stream(s) => CompiledExpression::stream(move |ctx| {
                let hits = self.clone();
                s.subscribe(ctx)
                    .inspect(move |v| hits.observe(v))
                    .boxed()
            }),
        }
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    Number::from_str(raw).ok()?.as_i64()
}

fn invalid(message: String, location: &SourceLocation) -> CompiledExpression {
    CompiledExpression::Constant(Value::error_at(message, *location))
}

type BinaryOp = fn(&Value, &Value) -> Value;

/// [`combine`] whose error results point at `location` unless an operand
/// already located them.
fn located<F>(
    operands: Vec<CompiledExpression>,
    location: &SourceLocation,
    op: F,
) -> CompiledExpression
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    let location = *location;
    combine(operands, move |values| locate_error(op(values), location))
}

fn first_error(values: &[Value]) -> Option<Value> {
    let refs: Vec<&Value> = values.iter().collect();
    operators::propagate_error(&refs)
}

/// Attaches `location` to an error that has none yet.
fn locate_error(value: Value, location: SourceLocation) -> Value {
    match value.as_error() {
        Some(e) if e.location.is_none() => {
            Value::error_at(e.message.clone(), location).with_metadata(value.meta().clone())
        }
        _ => value,
    }
}

fn build_array(values: &[Value]) -> Value {
    if let Some(e) = first_error(values) {
        return e;
    }
    let items = values.iter().filter(|v| !v.is_undefined()).cloned().collect();
    Value::array(items).with_metadata(Metadata::merge_all(values))
}
