// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// One import declaration of a policy document: `import lib.steps.name [as alias]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Import {
    pub lib_steps: Vec<String>,
    pub function_name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl Import {
    pub fn new(lib_steps: &[&str], function_name: &str) -> Self {
        Self {
            lib_steps: lib_steps.iter().map(|s| String::from(*s)).collect(),
            function_name: function_name.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn fully_qualified_name(&self) -> String {
        let mut name = self.lib_steps.join(".");
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&self.function_name);
        name
    }
}

/// Import declarations of a single policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTable {
    imports: Vec<Import>,
}

impl ImportTable {
    pub fn new(imports: Vec<Import>) -> Self {
        Self { imports }
    }

    pub fn push(&mut self, import: Import) {
        self.imports.push(import);
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// Fully qualified name for `name`.
    ///
    /// Names containing a `.` are already qualified and are returned as is. A
    /// short name matches an alias first, then the function name of an import
    /// declared without alias. Unmatched names are returned unchanged.
    pub fn resolve(&self, name: &str) -> String {
        if name.contains('.') {
            return name.into();
        }
        let by_alias = self
            .imports
            .iter()
            .find(|i| i.alias.as_deref() == Some(name));
        let by_name = || {
            self.imports
                .iter()
                .find(|i| i.alias.is_none() && i.function_name == name)
        };
        match by_alias.or_else(by_name) {
            Some(import) => import.fully_qualified_name(),
            None => name.into(),
        }
    }
}
