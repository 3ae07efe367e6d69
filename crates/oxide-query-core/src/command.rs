//! Formatted SQL text plus the parameter values it expects.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Type;
use crate::value::SqlValue;

/// A named parameter of a [`QueryCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    /// Name without the dialect's prefix.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Bound value.
    pub value: SqlValue,
}

/// One executable SQL command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCommand {
    /// SQL text.
    pub text: String,
    /// Parameters in order of first appearance in `text`.
    pub parameters: Vec<QueryParameter>,
}

impl QueryCommand {
    /// Creates a command.
    #[must_use]
    pub fn new(text: impl Into<String>, parameters: Vec<QueryParameter>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Parameter values in order.
    #[must_use]
    pub fn values(&self) -> Vec<SqlValue> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }

    /// The same command with values replaced by name. Names not in
    /// `values` keep their bound value.
    #[must_use]
    pub fn rebind(&self, values: &HashMap<String, SqlValue>) -> Self {
        let parameters = self
            .parameters
            .iter()
            .map(|p| QueryParameter {
                value: values.get(&p.name).cloned().unwrap_or_else(|| p.value.clone()),
                ..p.clone()
            })
            .collect();
        Self {
            text: self.text.clone(),
            parameters,
        }
    }
}

impl fmt::Display for QueryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        for p in &self.parameters {
            write!(f, "\n-- @{} ({}) = {}", p.name, p.ty, p.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebind_replaces_named_values_only() {
        let cmd = QueryCommand::new(
            "SELECT 1 WHERE a = @c0 AND b = @p0",
            vec![
                QueryParameter {
                    name: "c0".into(),
                    ty: Type::Text,
                    value: SqlValue::Text("old".into()),
                },
                QueryParameter {
                    name: "p0".into(),
                    ty: Type::Int,
                    value: SqlValue::Int(1),
                },
            ],
        );
        let values = HashMap::from([("c0".to_string(), SqlValue::Text("new".into()))]);
        let rebound = cmd.rebind(&values);
        assert_eq!(
            rebound.values(),
            vec![SqlValue::Text("new".into()), SqlValue::Int(1)]
        );
        assert_eq!(rebound.text, cmd.text);
    }
}
