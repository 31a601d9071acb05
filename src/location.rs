// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Position of a syntax element in the policy document.
///
/// Lines and characters are those reported by the parser. Ordering is by start
/// position first so that sets of locations iterate in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub start_line: u32,
    pub start_char: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub end_char: u32,
}

impl SourceLocation {
    pub const fn new(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Self {
        Self {
            start_line,
            start_char,
            end_line,
            end_char,
        }
    }

    /// Key identifying the position a condition starts at.
    pub const fn position_key(&self) -> u64 {
        (self.start_line as u64) * 100_000 + self.start_char as u64
    }

    pub fn message(&self, kind: &str, msg: &str) -> String {
        format!("{}:{}: {kind}: {msg}", self.start_line, self.start_char)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_line, self.start_char, self.end_line, self.end_char
        )
    }
}
