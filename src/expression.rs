// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compiled expressions and the nature combinator.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::context::EvaluationContext;
use crate::stream::{self, ValueStream};
use crate::value::Value;

pub type PureFn = Arc<dyn Fn(&EvaluationContext) -> Value + Send + Sync>;
pub type StreamFactory = Arc<dyn Fn(&EvaluationContext) -> ValueStream + Send + Sync>;

/// How an expression depends on its evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Nature {
    Constant,
    Pure,
    Stream,
}

#[derive(Clone)]
pub struct PureExpression {
    evaluator: PureFn,
    subscription_scoped: bool,
}

impl PureExpression {
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Value {
        (self.evaluator)(ctx)
    }

    /// True when the result depends on request or variable bindings rather
    /// than only on the relative value of a step.
    pub fn is_subscription_scoped(&self) -> bool {
        self.subscription_scoped
    }
}

#[derive(Clone)]
pub struct StreamExpression {
    factory: StreamFactory,
}

impl StreamExpression {
    /// Starts a fresh subscription.
    pub fn subscribe(&self, ctx: &EvaluationContext) -> ValueStream {
        (self.factory)(ctx)
    }
}

#[derive(Clone)]
pub enum CompiledExpression {
    Constant(Value),
    Pure(PureExpression),
    Stream(StreamExpression),
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledExpression::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            CompiledExpression::Pure(p) => f
                .debug_struct("Pure")
                .field("subscription_scoped", &p.subscription_scoped)
                .finish_non_exhaustive(),
            CompiledExpression::Stream(_) => f.debug_struct("Stream").finish_non_exhaustive(),
        }
    }
}

impl From<Value> for CompiledExpression {
    fn from(value: Value) -> Self {
        CompiledExpression::Constant(value)
    }
}

impl CompiledExpression {
    pub fn constant(value: Value) -> Self {
        CompiledExpression::Constant(value)
    }

    pub fn pure<F>(subscription_scoped: bool, evaluator: F) -> Self
    where
        F: Fn(&EvaluationContext) -> Value + Send + Sync + 'static,
    {
        CompiledExpression::Pure(PureExpression {
            evaluator: Arc::new(evaluator),
            subscription_scoped,
        })
    }

    pub fn stream<F>(factory: F) -> Self
    where
        F: Fn(&EvaluationContext) -> ValueStream + Send + Sync + 'static,
    {
        CompiledExpression::Stream(StreamExpression {
            factory: Arc::new(factory),
        })
    }

    pub fn nature(&self) -> Nature {
        match self {
            CompiledExpression::Constant(_) => Nature::Constant,
            CompiledExpression::Pure(_) => Nature::Pure,
            CompiledExpression::Stream(_) => Nature::Stream,
        }
    }

    pub fn is_subscription_scoped(&self) -> bool {
        match self {
            CompiledExpression::Constant(_) => false,
            CompiledExpression::Pure(p) => p.subscription_scoped,
            CompiledExpression::Stream(_) => true,
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            CompiledExpression::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a constant or pure expression. A stream cannot be evaluated
    /// synchronously and yields an error value.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Value {
        match self {
            CompiledExpression::Constant(v) => v.clone(),
            CompiledExpression::Pure(p) => p.evaluate(ctx),
            CompiledExpression::Stream(_) => {
                Value::error("Stream expressions cannot be evaluated synchronously.")
            }
        }
    }

    /// Push sequence of this expression's values under `ctx`.
    ///
    /// A pure expression emits once per subscription. Inside a stream join that
    /// single value equals what re-evaluating it on every upstream value would
    /// give, because `ctx` is fixed for the lifetime of the subscription.
    pub fn to_stream(&self, ctx: &EvaluationContext) -> ValueStream {
        match self {
            CompiledExpression::Constant(v) => stream::once(v.clone()),
            CompiledExpression::Pure(p) => stream::once(p.evaluate(ctx)),
            CompiledExpression::Stream(s) => s.subscribe(ctx),
        }
    }
}

/// Combined nature of a set of operands.
pub fn nature_of(operands: &[CompiledExpression]) -> Nature {
    operands
        .iter()
        .map(CompiledExpression::nature)
        .max()
        .unwrap_or(Nature::Constant)
}

/// Applies a value-level operator under the nature of its operands.
pub fn combine<F>(operands: Vec<CompiledExpression>, op: F) -> CompiledExpression
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    combine_in_context(
        operands,
        false,
        &EvaluationContext::default(),
        move |_, values| op(values),
    )
}

/// Like [`combine`] for operators that need the evaluation context.
///
/// When `reads_subscription` is set the operator itself depends on request
/// bindings: the result is never folded and is subscription scoped. Folding
/// of all-constant operands evaluates `op` against `folding`.
pub fn combine_in_context<F>(
    operands: Vec<CompiledExpression>,
    reads_subscription: bool,
    folding: &EvaluationContext,
    op: F,
) -> CompiledExpression
where
    F: Fn(&EvaluationContext, &[Value]) -> Value + Send + Sync + 'static,
{
    let nature = nature_of(&operands);
    if nature == Nature::Constant && !reads_subscription {
        let values: Vec<Value> = operands.iter().map(|o| o.evaluate(folding)).collect();
        return CompiledExpression::Constant(op(folding, &values));
    }

    let op = Arc::new(op);
    if nature == Nature::Stream {
        let operands = Arc::new(operands);
        return CompiledExpression::stream(move |ctx| {
            let sources = operands.iter().map(|o| o.to_stream(ctx)).collect();
            let op = op.clone();
            let ctx = ctx.clone();
            stream::combine_latest(sources, Arc::new(move |values: &[Value]| op(&ctx, values)))
        });
    }

    let scoped = reads_subscription || operands.iter().any(|o| o.is_subscription_scoped());
    CompiledExpression::pure(scoped, move |ctx| {
        let values: Vec<Value> = operands.iter().map(|o| o.evaluate(ctx)).collect();
        op(ctx, &values)
    })
}
