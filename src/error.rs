// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(clippy::pattern_type_mismatch)]

use alloc::format;

use crate::location::SourceLocation;
use core::fmt;

/// Defects that abort compilation of a whole policy.
///
/// Runtime failures never show up here; they are `Value::Error` data.
#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("No function broker available.")]
    NoFunctionBroker,

    #[error("Missing identifier.")]
    MissingIdentifier,

    #[error("Missing function identifier.")]
    MissingFunctionIdentifier,

    #[error("Missing attribute identifier.")]
    MissingAttributeIdentifier,

    #[error("{production} requires at least one operand.")]
    EmptyOperands { production: &'static str },

    #[error("{production} has {operands} operands but {operators} operators.")]
    OperatorCountMismatch {
        production: &'static str,
        operands: usize,
        operators: usize,
    },
}

#[derive(Debug)]
pub struct SpannedCompileError {
    pub error: CompileError,
    pub location: Option<SourceLocation>,
}

impl SpannedCompileError {
    pub fn new(error: CompileError) -> Self {
        Self {
            error,
            location: None,
        }
    }

    pub fn with_location(mut self, location: &SourceLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(*location);
        }
        self
    }
}

impl fmt::Display for SpannedCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            let msg = format!("{}", self.error);
            write!(f, "{}", location.message("error", &msg))
        } else {
            write!(f, "{}", self.error)
        }
    }
}

impl From<CompileError> for SpannedCompileError {
    fn from(error: CompileError) -> Self {
        Self::new(error)
    }
}

impl core::error::Error for SpannedCompileError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl CompileError {
    pub fn at(self, location: &SourceLocation) -> SpannedCompileError {
        SpannedCompileError::from(self).with_location(location)
    }
}

pub type Result<T> = ::core::result::Result<T, SpannedCompileError>;
