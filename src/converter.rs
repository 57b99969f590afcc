//! File and directory conversion between WDL and CWL
//!
//! A conversion is always parse → IR → render. The converter owns the writer
//! settings; parsers are created per document since they collect type
//! fallbacks as they go.

use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::ir::{Task, Workflow, WorkflowKind};
use crate::parser::{CwlParser, Parse, WdlParser};
use crate::writer::{CwlWriter, WdlWriter, Write};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Which way a conversion goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[default]
    WdlToCwl,
    CwlToWdl,
}

impl Direction {
    pub fn source_extension(&self) -> &'static str {
        match self {
            Direction::WdlToCwl => "wdl",
            Direction::CwlToWdl => "cwl",
        }
    }

    pub fn target_extension(&self) -> &'static str {
        match self {
            Direction::WdlToCwl => "cwl",
            Direction::CwlToWdl => "wdl",
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            Direction::WdlToCwl => Direction::CwlToWdl,
            Direction::CwlToWdl => Direction::WdlToCwl,
        }
    }

    /// The direction implied by a source file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "wdl" => Some(Direction::WdlToCwl),
            "cwl" => Some(Direction::CwlToWdl),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::WdlToCwl => write!(f, "WDL -> CWL"),
            Direction::CwlToWdl => write!(f, "CWL -> WDL"),
        }
    }
}

/// A file that failed during directory conversion.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: ConvertError,
}

/// Outcome of [`Converter::convert_directory`].
#[derive(Debug, Default)]
pub struct DirectoryReport {
    /// `(source, destination)` of every converted file
    pub converted: Vec<(PathBuf, PathBuf)>,
    pub failed: Vec<FileFailure>,
}

impl DirectoryReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.converted.len() + self.failed.len()
    }
}

#[derive(Debug, Clone)]
pub struct Converter {
    direction: Direction,
    wdl: WdlWriter,
    cwl: CwlWriter,
}

impl Converter {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            wdl: WdlWriter::default(),
            cwl: CwlWriter::default(),
        }
    }

    /// A converter stamping the configured language versions.
    pub fn from_config(config: &Config, direction: Direction) -> Self {
        Self {
            direction,
            wdl: WdlWriter::with_version(config.wdl_version.clone()),
            cwl: CwlWriter::with_version(config.cwl_version.clone()),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Parse source text of this converter's source language.
    pub fn parse_str(&self, source: &str, name: &str) -> Result<Workflow> {
        let (workflow, fallbacks) = match self.direction {
            Direction::WdlToCwl => {
                let mut parser = WdlParser::new();
                let workflow = parser.parse_named(source, name)?;
                (workflow, parser.fallbacks().len())
            }
            Direction::CwlToWdl => {
                let mut parser = CwlParser::new();
                let workflow = parser.parse_named(source, name)?;
                (workflow, parser.fallbacks().len())
            }
        };
        if fallbacks > 0 {
            debug!(document = %workflow.name, fallbacks, "types mapped to String");
        }
        Ok(workflow)
    }

    /// Render the IR in this converter's target language.
    pub fn render(&self, workflow: &Workflow) -> Result<String> {
        match self.direction {
            Direction::WdlToCwl => self.cwl.write_workflow(workflow),
            Direction::CwlToWdl => self.wdl.write_workflow(workflow),
        }
    }

    pub fn convert_str(&self, source: &str) -> Result<String> {
        let workflow = self.parse_str(source, "")?;
        self.render(&workflow)
    }

    /// Convert one file. Without `dst` the output lands next to the source
    /// with the target extension. Returns the intermediate representation.
    pub fn convert_file(&self, src: &Path, dst: Option<&Path>) -> Result<Workflow> {
        let source = fs::read_to_string(src).map_err(|e| ConvertError::io(src, e))?;
        let name = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let workflow = self.parse_str(&source, &name)?;
        let rendered = self.render(&workflow)?;

        let dst = match dst {
            Some(dst) => dst.to_path_buf(),
            None => src.with_extension(self.direction.target_extension()),
        };
        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConvertError::io(parent, e))?;
        }
        fs::write(&dst, rendered).map_err(|e| ConvertError::io(&dst, e))?;
        info!(src = %src.display(), dst = %dst.display(), "converted {}", self.direction);
        Ok(workflow)
    }

    /// Convert every source file under `src_dir` into the same relative
    /// location under `dst_dir`. A failing file is logged and reported, and
    /// the remaining files are still converted.
    pub fn convert_directory(&self, src_dir: &Path, dst_dir: &Path, recursive: bool) -> Result<DirectoryReport> {
        if !src_dir.is_dir() {
            return Err(ConvertError::io(
                src_dir,
                io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
            ));
        }

        let escaped = glob::Pattern::escape(&src_dir.to_string_lossy());
        let extension = self.direction.source_extension();
        let pattern = if recursive {
            format!("{}/**/*.{}", escaped, extension)
        } else {
            format!("{}/*.{}", escaped, extension)
        };
        let paths = glob::glob(&pattern).map_err(|e| {
            ConvertError::io(src_dir, io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
        })?;

        let mut report = DirectoryReport::default();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    let path = e.path().to_path_buf();
                    error!(path = %path.display(), error = %e, "cannot read directory entry");
                    report.failed.push(FileFailure {
                        error: ConvertError::io(&path, io::Error::from(e)),
                        path,
                    });
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let relative = path.strip_prefix(src_dir).unwrap_or(&path);
            let dst = dst_dir
                .join(relative)
                .with_extension(self.direction.target_extension());
            match self.convert_file(&path, Some(&dst)) {
                Ok(_) => report.converted.push((path, dst)),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "conversion failed");
                    report.failed.push(FileFailure { path, error: e });
                }
            }
        }

        info!(
            converted = report.converted.len(),
            failed = report.failed.len(),
            "directory conversion finished"
        );
        Ok(report)
    }
}

/// Structural check of a converted document: it has a name and every call
/// resolves within its own task set. A task-only document checks each task.
pub fn validate_conversion(workflow: &Workflow) -> bool {
    if workflow.name.trim().is_empty() {
        warn!("converted workflow has no name");
        return false;
    }
    if workflow.kind == WorkflowKind::Task {
        return workflow.tasks.values().all(validate_task);
    }
    if let Some(call) = workflow.unresolved_calls().first() {
        warn!(call = %call.call_id, task = %call.task_name, "call target is not defined in the document");
        return false;
    }
    true
}

/// A task needs a name and a command.
pub fn validate_task(task: &Task) -> bool {
    if task.name.trim().is_empty() {
        warn!("task has no name");
        return false;
    }
    if task.command.trim().is_empty() {
        warn!(task = %task.name, "task has an empty command");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::WorkflowCall;

    const TASK: &str = r#"
version 1.0

task hello {
    input {
        String name
    }
    command <<<
        echo "Hello, ~{name}!"
    >>>
    output {
        File greeting = stdout()
    }
    runtime {
        docker: "ubuntu:20.04"
    }
}
"#;

    #[test]
    fn test_direction() {
        assert_eq!(Direction::WdlToCwl.source_extension(), "wdl");
        assert_eq!(Direction::WdlToCwl.target_extension(), "cwl");
        assert_eq!(Direction::CwlToWdl.reverse(), Direction::WdlToCwl);
        assert_eq!(Direction::from_path(Path::new("a/b.cwl")), Some(Direction::CwlToWdl));
        assert_eq!(Direction::from_path(Path::new("b.txt")), None);
    }

    #[test]
    fn test_convert_str_both_ways() {
        let cwl = Converter::new(Direction::WdlToCwl).convert_str(TASK).unwrap();
        assert!(cwl.contains("class: CommandLineTool"));
        let doc: serde_yaml::Value = serde_yaml::from_str(&cwl).unwrap();
        assert_eq!(doc["requirements"][1]["dockerPull"].as_str(), Some("ubuntu:20.04"));

        let wdl = Converter::new(Direction::CwlToWdl).convert_str(&cwl).unwrap();
        assert!(wdl.starts_with("version 1.0"));
        assert!(wdl.contains("task hello {"));
        assert!(wdl.contains("docker: \"ubuntu:20.04\""));
    }

    #[test]
    fn test_configured_versions() {
        let config = Config::new().with_cwl_version("v1.0").with_wdl_version("1.1");
        let cwl = Converter::from_config(&config, Direction::WdlToCwl).convert_str(TASK).unwrap();
        assert!(cwl.starts_with("cwlVersion: v1.0"));
        let wdl = Converter::from_config(&config, Direction::CwlToWdl).convert_str(&cwl).unwrap();
        assert!(wdl.starts_with("version 1.1"));
    }

    #[test]
    fn test_validate_conversion() {
        let mut workflow = Workflow::new("wf");
        workflow.add_task(Task::new("a", "echo a"));
        workflow.add_call(WorkflowCall::new("a", "a"));
        assert!(validate_conversion(&workflow));

        workflow.add_call(WorkflowCall::new("b", "missing"));
        assert!(!validate_conversion(&workflow));

        assert!(!validate_conversion(&Workflow::new("")));
        assert!(!validate_conversion(&Workflow::from_task(Task::new("t", "  "))));
        assert!(validate_conversion(&Workflow::from_task(Task::new("t", "true"))));
    }
}
