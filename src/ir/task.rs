//! Task definitions.

use super::io::{Input, Output};
use super::runtime::Runtime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches `~{name}` and `${name}` placeholders that hold a bare identifier.
pub(crate) static INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[~$]\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

/// A single command-line executable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    /// Command template with `~{x}` / `${x}` placeholders
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<Runtime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            command: command.into(),
            runtime: None,
            description: None,
        }
    }

    pub fn with_input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Names interpolated into the command, in first-occurrence order.
    pub fn command_references(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in INTERPOLATION.captures_iter(&self.command) {
            if let Some(name) = caps.get(1) {
                if !names.iter().any(|n| n == name.as_str()) {
                    names.push(name.as_str().to_string());
                }
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSpec;

    #[test]
    fn test_command_references() {
        let task = Task::new(
            "hello",
            "echo \"Hello, ~{name}!\"\ncat ${input_file} > ~{ name }.txt",
        );
        assert_eq!(task.command_references(), vec!["name", "input_file"]);
    }

    #[test]
    fn test_command_references_skip_expressions() {
        let task = Task::new("t", "echo ~{sep=' ' files} ~{if flag then 'a' else 'b'}");
        assert!(task.command_references().is_empty());
    }

    #[test]
    fn test_lookup() {
        let task = Task::new("t", "true")
            .with_input(Input::new("a", TypeSpec::int()))
            .with_output(Output::new("b", TypeSpec::file()));
        assert!(task.input("a").is_some());
        assert!(task.input("b").is_none());
        assert!(task.output("b").is_some());
    }
}
