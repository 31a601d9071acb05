// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(clippy::missing_const_for_fn)]

//! Syntax tree handed over by the policy parser.
//!
//! Every node is serde-deserializable so that trees can be loaded from JSON or
//! YAML produced by an external front end.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::location::SourceLocation;

/// Expression node, one variant per precedence level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    LazyOr {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
    },
    LazyAnd {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
    },
    EagerOr {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
    },
    ExclusiveOr {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
    },
    EagerAnd {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
    },
    Equality {
        #[serde(default)]
        location: SourceLocation,
        operator: EqualityOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Comparison {
        #[serde(default)]
        location: SourceLocation,
        operator: ComparisonOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `operands[0] op[0] operands[1] op[1] ...`, evaluated left to right.
    Addition {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
        operators: Vec<AdditiveOperator>,
    },
    Multiplication {
        #[serde(default)]
        location: SourceLocation,
        operands: Vec<Expression>,
        operators: Vec<MultiplicativeOperator>,
    },
    Unary {
        #[serde(default)]
        location: SourceLocation,
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Basic(BasicExpression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EqualityOperator {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "=~")]
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "in")]
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdditiveOperator {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiplicativeOperator {
    #[serde(rename = "*")]
    Times,
    #[serde(rename = "/")]
    Divide,
    #[serde(rename = "%")]
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    #[serde(rename = "!")]
    Not,
    #[serde(rename = "-")]
    Negate,
    #[serde(rename = "+")]
    Plus,
}

/// A base followed by a chain of steps and an optional `:: template`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicExpression {
    #[serde(default)]
    pub location: SourceLocation,
    pub base: Base,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtemplate: Option<Box<Expression>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Base {
    Group {
        expression: Box<Expression>,
    },
    Value {
        value: Literal,
    },
    Function {
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
    },
    Identifier {
        name: String,
    },
    /// `@`
    Relative,
    /// `#`
    RelativeLocation,
    /// `<name(args)[options]>` or `|<...>` when `head` is set.
    EnvironmentAttribute {
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default)]
        options: Option<Box<Expression>>,
        #[serde(default)]
        head: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Literal {
    Object {
        #[serde(default)]
        members: Vec<Member>,
    },
    Array {
        #[serde(default)]
        items: Vec<Expression>,
    },
    /// Raw literal text, parsed at compile time.
    Number {
        raw: String,
    },
    String {
        value: String,
    },
    Boolean {
        value: bool,
    },
    Null,
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub key: String,
    pub value: Expression,
}

/// Path step. Numeric components are kept as raw text and validated when
/// compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    Key {
        name: String,
    },
    Wildcard,
    Index {
        index: String,
    },
    Expression {
        expression: Box<Expression>,
    },
    Slice {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        step: Option<String>,
    },
    Condition {
        condition: Box<Expression>,
    },
    IndexUnion {
        indices: Vec<String>,
    },
    AttributeUnion {
        keys: Vec<String>,
    },
    RecursiveKey {
        name: String,
    },
    RecursiveWildcard,
    RecursiveIndex {
        index: String,
    },
    AttributeFinder {
        #[serde(default)]
        location: SourceLocation,
        name: String,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default)]
        options: Option<Box<Expression>>,
        #[serde(default)]
        head: bool,
    },
}

impl Expression {
    pub fn location(&self) -> SourceLocation {
        match self {
            Expression::LazyOr { location, .. }
            | Expression::LazyAnd { location, .. }
            | Expression::EagerOr { location, .. }
            | Expression::ExclusiveOr { location, .. }
            | Expression::EagerAnd { location, .. }
            | Expression::Equality { location, .. }
            | Expression::Comparison { location, .. }
            | Expression::Addition { location, .. }
            | Expression::Multiplication { location, .. }
            | Expression::Unary { location, .. } => *location,
            Expression::Basic(basic) => basic.location,
        }
    }

    pub fn basic(base: Base, steps: Vec<Step>) -> Self {
        Expression::Basic(BasicExpression {
            location: SourceLocation::default(),
            base,
            steps,
            subtemplate: None,
        })
    }

    pub fn literal(value: Literal) -> Self {
        Self::basic(Base::Value { value }, Vec::new())
    }

    pub fn number(raw: &str) -> Self {
        Self::literal(Literal::Number { raw: raw.into() })
    }

    pub fn string(value: &str) -> Self {
        Self::literal(Literal::String {
            value: value.into(),
        })
    }

    pub fn boolean(value: bool) -> Self {
        Self::literal(Literal::Boolean { value })
    }

    pub fn identifier(name: &str) -> Self {
        Self::basic(Base::Identifier { name: name.into() }, Vec::new())
    }

    /// Attaches a location to the node.
    pub fn at(mut self, at: SourceLocation) -> Self {
        match &mut self {
            Expression::LazyOr { location, .. }
            | Expression::LazyAnd { location, .. }
            | Expression::EagerOr { location, .. }
            | Expression::ExclusiveOr { location, .. }
            | Expression::EagerAnd { location, .. }
            | Expression::Equality { location, .. }
            | Expression::Comparison { location, .. }
            | Expression::Addition { location, .. }
            | Expression::Multiplication { location, .. }
            | Expression::Unary { location, .. } => *location = at,
            Expression::Basic(basic) => basic.location = at,
        }
        self
    }
}
