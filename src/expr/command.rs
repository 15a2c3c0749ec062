use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::{SqlType, ValueKind};

/// A parameter slot of a compiled command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value_kind: ValueKind,
    pub sql_type: SqlType,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, value_kind: ValueKind, sql_type: SqlType) -> Self {
        Self { name: name.into(), value_kind, sql_type }
    }
}

/// SQL text plus its ordered parameter list; what gets handed to the
/// executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCommand {
    pub text: String,
    pub parameters: Vec<QueryParameter>,
}

impl QueryCommand {
    pub fn new(text: impl Into<String>, parameters: Vec<QueryParameter>) -> Self {
        Self { text: text.into(), parameters }
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }
}

impl fmt::Display for QueryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
