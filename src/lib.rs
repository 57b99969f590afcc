//! # flowconv
//!
//! Conversion of workflow definitions between WDL and CWL.
//!
//! Both languages are parsed into one intermediate representation ([`ir`]):
//! tasks, typed inputs and outputs, runtime requirements, and the calls of a
//! workflow with their scatter and conditional context. Writers render the
//! IR back out, so a conversion is parse → IR → render.
//!
//! ```no_run
//! use flowconv::{Converter, Direction};
//! use std::path::Path;
//!
//! let converter = Converter::new(Direction::WdlToCwl);
//! let workflow = converter.convert_file(Path::new("hello.wdl"), None)?;
//! assert!(flowconv::validate_conversion(&workflow));
//! # Ok::<(), flowconv::ConvertError>(())
//! ```

pub mod config;
pub mod converter;
pub mod error;
pub mod ir;
pub mod parser;
pub mod types;
pub mod writer;

pub use config::{load_config, Config, ConfigBuilder};
pub use converter::{validate_conversion, validate_task, Converter, DirectoryReport, Direction, FileFailure};
pub use error::{ConvertError, Result, SourcePosition};
pub use ir::{Binding, Input, Output, Runtime, Task, Workflow, WorkflowCall, WorkflowKind};
pub use parser::{CwlParser, Parse, WdlParser};
pub use types::{DataType, TypeSpec};
pub use writer::{CwlWriter, WdlWriter, Write};
