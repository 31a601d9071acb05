// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![deny(clippy::unwrap_used, clippy::expect_used)]

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

extern crate alloc;

pub mod ast;
mod broker;
mod compiler;
mod context;
mod coverage;
mod error;
mod expression;
mod imports;
mod location;
mod number;
pub mod operators;
pub mod steps;
pub mod stream;
mod value;

pub use broker::{
    AttributeBroker, AttributeFinderInvocation, FunctionBroker, FunctionFn, FunctionInvocation,
    FunctionRegistry,
};
pub use compiler::{compile, Compiler, ATTRIBUTE_FINDER_OPTIONS_VARIABLE};
pub use context::{
    CompilationContext, EvaluationContext, Variables, ACTION, ENVIRONMENT, RESOURCE, SUBJECT,
};
pub use coverage::{ConditionCoverage, CoverageHit, CoverageRecorder, CoverageSummary};
pub use error::{CompileError, Result, SpannedCompileError};
pub use expression::{
    combine, combine_in_context, nature_of, CompiledExpression, Nature, PureExpression,
    StreamExpression,
};
pub use imports::{Import, ImportTable};
pub use location::SourceLocation;
pub use number::Number;
pub use stream::ValueStream;
pub use value::{ErrorValue, Metadata, Object, Value, ValueKind};
