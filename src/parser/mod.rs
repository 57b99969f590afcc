//! Source parsers producing the intermediate representation

pub mod cwl;
pub(crate) mod scanner;
pub mod wdl;

pub use cwl::CwlParser;
pub use wdl::WdlParser;

use crate::error::{ConvertError, Result};
use crate::ir::Workflow;
use crate::types::TypeFallback;
use std::path::Path;

/// A parser from one workflow language into a [`Workflow`].
pub trait Parse {
    /// Parse `source`; `name` identifies it in error positions and names
    /// task-only documents. It may be empty.
    fn parse_named(&mut self, source: &str, name: &str) -> Result<Workflow>;

    /// Type tokens that had no mapping during the last parse.
    fn fallbacks(&self) -> &[TypeFallback];

    fn parse(&mut self, source: &str) -> Result<Workflow> {
        self.parse_named(source, "")
    }

    /// Read and parse a file; the file stem names task-only documents.
    fn parse_file(&mut self, path: &Path) -> Result<Workflow> {
        let source =
            std::fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.parse_named(&source, &name)
    }
}
