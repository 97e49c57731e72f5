//! Script text to commands.
//!
//! A script is split on lines that contain nothing but the separator
//! keyword (`GO` by default, any case). Each chunk becomes one command.
//! Directive comments inside a chunk configure that command and are
//! stripped from its text:
//!
//! ```sql
//! -- @transaction: disallowed
//! -- @execute: nonquery
//! VACUUM
//! GO
//! -- @isolation: serializable
//! SELECT COUNT(*) FROM users
//! ```

use regex::Regex;

use crate::batch::{Batch, Command, ExecutionType, IsolationLevel, TransactionRequirement};
use crate::connection::Connection;
use crate::error::{LifecycleError, Result};

/// Settings for one command parsed from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    /// Command text without directive lines.
    pub text: String,
    /// Transaction requirement from `@transaction`.
    pub transaction: TransactionRequirement,
    /// Isolation level from `@isolation`.
    pub isolation_level: Option<IsolationLevel>,
    /// Execution type from `@execute`.
    pub execution_type: ExecutionType,
}

impl ScriptCommand {
    /// Turns the parsed settings into a batch command.
    #[must_use]
    pub fn into_command<C: Connection>(self) -> Command<C> {
        let command = Command::script(self.text)
            .transaction(self.transaction)
            .execution(self.execution_type);
        match self.isolation_level {
            Some(level) => command.isolation(level),
            None => command,
        }
    }
}

/// Splits scripts into commands.
#[derive(Debug, Clone)]
pub struct ScriptParser {
    separator: Regex,
    directive: Regex,
}

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new("GO")
    }
}

impl ScriptParser {
    /// Creates a parser splitting on lines made of `separator` alone.
    #[must_use]
    pub fn new(separator: &str) -> Self {
        let separator = Regex::new(&format!(
            r"(?im)^[ \t]*{}[ \t]*;?[ \t]*\r?$",
            regex::escape(separator)
        ))
        .expect("Invalid script separator regex");
        let directive = Regex::new(r"^\s*--\s*@([A-Za-z_]+)\s*[:=]\s*(.+?)\s*$")
            .expect("Invalid directive regex");
        Self {
            separator,
            directive,
        }
    }

    /// Parses `script` into command settings. `name` is used in errors.
    pub fn parse(&self, name: &str, script: &str) -> Result<Vec<ScriptCommand>> {
        self.separator
            .split(script)
            .filter_map(|chunk| self.parse_chunk(name, chunk).transpose())
            .collect()
    }

    /// Parses `script` straight into a batch.
    pub fn parse_batch<C: Connection>(&self, name: &str, script: &str) -> Result<Batch<C>> {
        let mut batch = Batch::new();
        batch.extend(
            self.parse(name, script)?
                .into_iter()
                .map(ScriptCommand::into_command),
        );
        Ok(batch)
    }

    fn parse_chunk(&self, name: &str, chunk: &str) -> Result<Option<ScriptCommand>> {
        let mut command = ScriptCommand {
            text: String::new(),
            transaction: TransactionRequirement::DontCare,
            isolation_level: None,
            execution_type: ExecutionType::Scalar,
        };
        let mut lines = Vec::new();

        for line in chunk.lines() {
            let Some(caps) = self.directive.captures(line) else {
                lines.push(line);
                continue;
            };
            let value = &caps[2];
            let invalid = |err: LifecycleError| LifecycleError::InvalidScript {
                name: name.to_owned(),
                message: err.to_string(),
            };
            match caps[1].to_ascii_lowercase().as_str() {
                "transaction" => command.transaction = value.parse().map_err(invalid)?,
                "isolation" => command.isolation_level = Some(value.parse().map_err(invalid)?),
                "execute" => command.execution_type = value.parse().map_err(invalid)?,
                other => {
                    return Err(LifecycleError::InvalidScript {
                        name: name.to_owned(),
                        message: format!("unknown directive '@{other}'"),
                    });
                }
            }
        }

        let text = lines.join("\n");
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        command.text = text.to_owned();
        Ok(Some(command))
    }
}
