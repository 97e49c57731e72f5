//! Named parameter binding.
//!
//! The driver binds by position only, so scripts using `:name`, `@name`
//! or `$name` are rewritten to `?N`, numbering parameters in order of
//! first appearance. Names inside string literals, quoted identifiers and
//! comments are left alone.

use oxide_lifecycle::value::{ParameterCollection, SqlValue};
use regex::Regex;

use crate::error::{Result, SqliteError};

/// A script rewritten for positional binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundScript {
    /// Script text with numbered placeholders.
    pub sql: String,
    /// Values in placeholder order.
    pub values: Vec<SqlValue>,
}

/// Rewrites named parameters to numbered ones.
#[derive(Debug, Clone)]
pub struct ParameterBinder {
    pattern: Regex,
}

impl Default for ParameterBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterBinder {
    /// Creates a binder.
    #[must_use]
    pub fn new() -> Self {
        let pattern = Regex::new(
            r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|--[^\n]*|/\*(?s:.*?)\*/|[:@$]([A-Za-z_][A-Za-z0-9_]*)"#,
        )
        .expect("Invalid parameter regex");
        Self { pattern }
    }

    /// Rewrites `script`, looking up each referenced name in `parameters`.
    ///
    /// Parameters the script does not reference are not bound.
    pub fn bind(&self, script: &str, parameters: &ParameterCollection) -> Result<BoundScript> {
        let mut names: Vec<&str> = Vec::new();
        let mut sql = String::with_capacity(script.len());
        let mut last = 0;

        for caps in self.pattern.captures_iter(script) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            let index = match names.iter().position(|known| *known == name.as_str()) {
                Some(position) => position + 1,
                None => {
                    names.push(name.as_str());
                    names.len()
                }
            };
            // The sigil is the single byte before the name.
            sql.push_str(&script[last..name.start() - 1]);
            sql.push('?');
            sql.push_str(&index.to_string());
            last = name.end();
        }
        sql.push_str(&script[last..]);

        let values = names
            .into_iter()
            .map(|name| {
                parameters
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SqliteError::MissingParameter(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BoundScript { sql, values })
    }
}
