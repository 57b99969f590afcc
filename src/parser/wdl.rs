//! WDL structural parser
//!
//! Extracts the document skeleton (version, imports, tasks, the workflow and
//! its calls) without parsing expressions. Expressions are kept as source
//! text; literals are recognized where the IR stores them as values.
//!
//! Task sections understood: `input`, `output`, `command` (`<<< >>>` or
//! `{ }`), `runtime`/`requirements`, `meta`, `parameter_meta`. Workflow
//! bodies understand `input`, `output`, `meta`, `parameter_meta`, `call`,
//! `scatter` and `if`, nested to any depth. Declarations with no value
//! outside an `input` section are read as inputs, as in draft-2 documents.

use super::scanner::{Mode, Scanner};
use super::Parse;
use crate::error::{ConvertError, Result};
use crate::ir::io::unquote;
use crate::ir::{parse_size_mb, Binding, Import, Input, Output, Runtime, Task, Workflow, WorkflowCall, WorkflowKind};
use crate::types::{TypeFallback, TypeSpec};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

static LOCAL_DISK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*local-disk\s+(\d+(?:\.\d+)?)\b").unwrap());

static META_DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"description\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// A `<type> <name> [= <expr>]` declaration.
#[derive(Debug)]
struct Declaration<'a> {
    type_spec: TypeSpec,
    name: &'a str,
    expression: Option<&'a str>,
}

/// An enclosing `scatter` or `if` block of a call.
#[derive(Debug, Clone, Copy)]
enum Frame<'a> {
    Scatter { variable: &'a str, items: &'a str },
    Conditional(&'a str),
}

/// Parser for WDL source text.
#[derive(Debug, Default)]
pub struct WdlParser {
    fallbacks: Vec<TypeFallback>,
}

impl WdlParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_document(&mut self, source: &str, name: &str) -> Result<Workflow> {
        let mut scanner = Scanner::new(source, name);
        let mut version = None;
        let mut imports = Vec::new();
        let mut tasks: IndexMap<String, Task> = IndexMap::new();
        let mut workflow: Option<Workflow> = None;

        while !scanner.is_eof() {
            match scanner.peek_identifier() {
                Some("version") => {
                    scanner.try_keyword("version");
                    scanner.skip_inline_space();
                    let line = scanner.rest().lines().next().unwrap_or("");
                    let text = line.split('#').next().unwrap_or("").trim();
                    if text.is_empty() {
                        return Err(scanner.error("Expected a version number"));
                    }
                    version = Some(text.to_string());
                    scanner.skip_line();
                }
                Some("import") => imports.push(self.parse_import(&mut scanner)?),
                Some("task") => {
                    let pos = scanner.current_position();
                    let task = self.parse_task(&mut scanner)?;
                    if tasks.contains_key(&task.name) {
                        return Err(ConvertError::syntax_error(
                            pos,
                            format!("Duplicate task '{}'", task.name),
                        ));
                    }
                    tasks.insert(task.name.clone(), task);
                }
                Some("workflow") => {
                    if workflow.is_some() {
                        return Err(scanner.error("Only one workflow block is allowed"));
                    }
                    workflow = Some(self.parse_workflow(&mut scanner)?);
                }
                Some("struct") => {
                    scanner.try_keyword("struct");
                    let struct_name = scanner.identifier("struct name", false)?;
                    scanner.block('{', '}', Mode::Code)?;
                    debug!(name = struct_name, "skipping struct definition");
                }
                Some(other) => {
                    return Err(scanner.error(format!("Unexpected '{}' at document level", other)));
                }
                None => {
                    return Err(scanner.error("Expected 'version', 'import', 'task' or 'workflow'"));
                }
            }
        }

        let mut document = match workflow {
            Some(workflow) => workflow,
            None => {
                let Some(first) = tasks.keys().next() else {
                    return Err(ConvertError::syntax_error(
                        scanner.position_at(0),
                        "No task or workflow definition found",
                    ));
                };
                let doc_name = if name.is_empty() { first.clone() } else { name.to_string() };
                let mut doc = Workflow::new(doc_name);
                doc.kind = WorkflowKind::Task;
                doc
            }
        };
        for (_, task) in tasks {
            document.add_task(task);
        }
        document.version = version;
        document.imports = imports;
        Ok(document)
    }

    fn parse_import(&mut self, scanner: &mut Scanner<'_>) -> Result<Import> {
        scanner.try_keyword("import");
        let uri = scanner.string_literal()?;
        let mut import = Import::new(uri);
        if scanner.try_keyword("as") {
            import.alias = Some(scanner.identifier("import alias", false)?.to_string());
        }
        // struct member aliases
        while scanner.try_keyword("alias") {
            scanner.identifier("struct name", false)?;
            if !scanner.try_keyword("as") {
                return Err(scanner.error("Expected 'as'"));
            }
            scanner.identifier("struct alias", false)?;
        }
        Ok(import)
    }

    fn parse_task(&mut self, scanner: &mut Scanner<'_>) -> Result<Task> {
        scanner.try_keyword("task");
        let pos = scanner.current_position();
        let name = scanner.identifier("task name", false)?;
        let (start, end) = scanner.block('{', '}', Mode::Code)?;
        let mut body = scanner.sub(start, end);

        let mut task = Task::new(name, "");
        let mut command = None;
        let mut runtime = Runtime::new();
        let mut descriptions: IndexMap<String, String> = IndexMap::new();

        while !body.is_eof() {
            match body.peek_identifier() {
                Some("input") => {
                    body.try_keyword("input");
                    for decl in self.declaration_section(&mut body)? {
                        task.inputs.push(input_from(decl));
                    }
                }
                Some("output") => {
                    body.try_keyword("output");
                    for decl in self.declaration_section(&mut body)? {
                        task.outputs.push(output_from(decl));
                    }
                }
                Some("command") => {
                    body.try_keyword("command");
                    let (s, e) = if body.peek() == Some('<') {
                        body.heredoc()?
                    } else {
                        body.block('{', '}', Mode::Raw)?
                    };
                    command = Some(dedent(body.slice(s, e)));
                }
                Some(section @ ("runtime" | "requirements")) => {
                    body.try_keyword(section);
                    for (key, value) in key_values(&mut body)? {
                        apply_runtime_attribute(&mut runtime, key, value);
                    }
                }
                Some("hints") => {
                    body.try_keyword("hints");
                    body.block('{', '}', Mode::Code)?;
                    debug!(task = name, "skipping hints section");
                }
                Some("meta") => {
                    body.try_keyword("meta");
                    for (key, value) in key_values(&mut body)? {
                        if key == "description" {
                            task.description = Some(meta_text(value));
                        }
                    }
                }
                Some("parameter_meta") => {
                    body.try_keyword("parameter_meta");
                    for (key, value) in key_values(&mut body)? {
                        if let Some(text) = parameter_description(value) {
                            descriptions.insert(key.to_string(), text);
                        }
                    }
                }
                Some(_) => {
                    let decl = self.declaration(&mut body)?;
                    if decl.expression.is_none() {
                        task.inputs.push(input_from(decl));
                    } else {
                        debug!(task = name, name = decl.name, "skipping private declaration");
                    }
                }
                None => return Err(body.error("Expected task section or declaration")),
            }
        }

        task.command = command.ok_or_else(|| {
            ConvertError::syntax_error(pos, format!("Task '{}' has no command section", name))
        })?;
        if !runtime.is_empty() {
            task.runtime = Some(runtime);
        }
        for input in task.inputs.iter_mut() {
            if let Some(text) = descriptions.get(&input.name) {
                input.description.get_or_insert_with(|| text.clone());
            }
        }
        for output in task.outputs.iter_mut() {
            if let Some(text) = descriptions.get(&output.name) {
                output.description.get_or_insert_with(|| text.clone());
            }
        }
        Ok(task)
    }

    fn parse_workflow(&mut self, scanner: &mut Scanner<'_>) -> Result<Workflow> {
        scanner.try_keyword("workflow");
        let name = scanner.identifier("workflow name", false)?;
        let (start, end) = scanner.block('{', '}', Mode::Code)?;
        let mut body = scanner.sub(start, end);

        let mut workflow = Workflow::new(name);
        let mut descriptions: IndexMap<String, String> = IndexMap::new();
        let mut frames = Vec::new();
        self.parse_workflow_body(&mut body, &mut workflow, &mut frames, &mut descriptions)?;

        for input in workflow.inputs.iter_mut() {
            if let Some(text) = descriptions.get(&input.name) {
                input.description.get_or_insert_with(|| text.clone());
            }
        }
        for output in workflow.outputs.iter_mut() {
            if let Some(text) = descriptions.get(&output.name) {
                output.description.get_or_insert_with(|| text.clone());
            }
        }
        Ok(workflow)
    }

    fn parse_workflow_body<'a>(
        &mut self,
        body: &mut Scanner<'a>,
        workflow: &mut Workflow,
        frames: &mut Vec<Frame<'a>>,
        descriptions: &mut IndexMap<String, String>,
    ) -> Result<()> {
        while !body.is_eof() {
            match body.peek_identifier() {
                Some("input") if frames.is_empty() => {
                    body.try_keyword("input");
                    for decl in self.declaration_section(body)? {
                        workflow.inputs.push(input_from(decl));
                    }
                }
                Some("output") if frames.is_empty() => {
                    body.try_keyword("output");
                    for decl in self.declaration_section(body)? {
                        workflow.outputs.push(output_from(decl));
                    }
                }
                Some("meta") if frames.is_empty() => {
                    body.try_keyword("meta");
                    for (key, value) in key_values(body)? {
                        if key == "description" {
                            workflow.description = Some(meta_text(value));
                        }
                    }
                }
                Some("parameter_meta") if frames.is_empty() => {
                    body.try_keyword("parameter_meta");
                    for (key, value) in key_values(body)? {
                        if let Some(text) = parameter_description(value) {
                            descriptions.insert(key.to_string(), text);
                        }
                    }
                }
                Some("call") => {
                    let call = self.parse_call(body, frames)?;
                    workflow.add_call(call);
                }
                Some("scatter") => {
                    body.try_keyword("scatter");
                    let (s, e) = body.block('(', ')', Mode::Code)?;
                    let mut header = body.sub(s, e);
                    let variable = header.identifier("scatter variable", false)?;
                    if !header.try_keyword("in") {
                        return Err(header.error("Expected 'in'"));
                    }
                    header.skip_trivia();
                    let items = header.rest().trim();
                    if items.is_empty() {
                        return Err(header.error("Expected scatter collection"));
                    }
                    let (s, e) = body.block('{', '}', Mode::Code)?;
                    let mut inner = body.sub(s, e);
                    frames.push(Frame::Scatter { variable, items });
                    self.parse_workflow_body(&mut inner, workflow, frames, descriptions)?;
                    frames.pop();
                }
                Some("if") => {
                    body.try_keyword("if");
                    let (s, e) = body.block('(', ')', Mode::Code)?;
                    let condition = body.slice(s, e).trim();
                    if condition.is_empty() {
                        return Err(body.error("Expected a condition"));
                    }
                    let (s, e) = body.block('{', '}', Mode::Code)?;
                    let mut inner = body.sub(s, e);
                    frames.push(Frame::Conditional(condition));
                    self.parse_workflow_body(&mut inner, workflow, frames, descriptions)?;
                    frames.pop();
                }
                Some(_) => {
                    let decl = self.declaration(body)?;
                    if decl.expression.is_none() && frames.is_empty() {
                        workflow.inputs.push(input_from(decl));
                    } else {
                        debug!(workflow = %workflow.name, name = decl.name, "skipping workflow declaration");
                    }
                }
                None => return Err(body.error("Expected workflow element")),
            }
        }
        Ok(())
    }

    fn parse_call(&mut self, body: &mut Scanner<'_>, frames: &[Frame<'_>]) -> Result<WorkflowCall> {
        body.try_keyword("call");
        let task_name = body.identifier("task name", true)?;
        let call_id = if body.try_keyword("as") {
            body.identifier("call alias", false)?
        } else {
            task_name.rsplit('.').next().unwrap_or(task_name)
        };
        while body.try_keyword("after") {
            body.identifier("call name", false)?;
        }
        let mut call = WorkflowCall::new(call_id, task_name);

        if body.peek() == Some('{') {
            let (s, e) = body.block('{', '}', Mode::Code)?;
            let mut inputs = body.sub(s, e);
            if inputs.try_keyword("input") {
                inputs.expect(":")?;
            }
            while !inputs.is_eof() {
                let key = inputs.identifier("input name", false)?;
                let binding = if inputs.try_consume("=") {
                    Binding::parse_wdl(inputs.expression()?)
                } else {
                    Binding::expression(key)
                };
                call.inputs.insert(key.to_string(), binding);
                inputs.try_consume(",");
            }
        }

        let scatters: Vec<(&str, &str)> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Scatter { variable, items } => Some((*variable, *items)),
                Frame::Conditional(_) => None,
            })
            .collect();
        if let Some((variable, items)) = scatters.last() {
            if scatters.len() > 1 {
                warn!(
                    call = call_id,
                    "nested scatter blocks; only the innermost over `{}` is kept", items
                );
            }
            call.scatter = Some(variable.to_string());
            call.scatter_items = Some(items.to_string());
        }

        let conditions: Vec<&str> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Conditional(c) => Some(*c),
                Frame::Scatter { .. } => None,
            })
            .collect();
        call.conditional = match conditions.len() {
            0 => None,
            1 => Some(conditions[0].to_string()),
            _ => Some(
                conditions
                    .iter()
                    .map(|c| {
                        if c.contains(char::is_whitespace) {
                            format!("({})", c)
                        } else {
                            c.to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" && "),
            ),
        };
        Ok(call)
    }

    /// `{ <declaration>* }` as used by `input` and `output` sections.
    fn declaration_section<'a>(&mut self, scanner: &mut Scanner<'a>) -> Result<Vec<Declaration<'a>>> {
        let (s, e) = scanner.block('{', '}', Mode::Code)?;
        let mut section = scanner.sub(s, e);
        let mut decls = Vec::new();
        while !section.is_eof() {
            decls.push(self.declaration(&mut section)?);
        }
        Ok(decls)
    }

    fn declaration<'a>(&mut self, scanner: &mut Scanner<'a>) -> Result<Declaration<'a>> {
        scanner.skip_trivia();
        let pos = scanner.current_position();
        let text = scanner.type_text()?;
        let type_spec = TypeSpec::parse_wdl(text)
            .map_err(|_| ConvertError::syntax_error(pos, format!("Invalid type '{}'", text)))?
            .collect_into(&mut self.fallbacks);
        let name = scanner.identifier("declaration name", false)?;
        scanner.skip_inline_space();
        let expression = if scanner.rest().starts_with('=') && !scanner.rest().starts_with("==") {
            scanner.set_offset(scanner.offset() + 1);
            Some(scanner.expression()?)
        } else {
            None
        };
        Ok(Declaration {
            type_spec,
            name,
            expression,
        })
    }
}

impl Parse for WdlParser {
    fn parse_named(&mut self, source: &str, name: &str) -> Result<Workflow> {
        self.fallbacks.clear();
        self.parse_document(source, name)
    }

    fn fallbacks(&self) -> &[TypeFallback] {
        &self.fallbacks
    }
}

fn input_from(decl: Declaration<'_>) -> Input {
    let input = Input::new(decl.name, decl.type_spec);
    match decl.expression {
        Some(expr) => input.with_default(Binding::parse_wdl(expr)),
        None => input,
    }
}

fn output_from(decl: Declaration<'_>) -> Output {
    let output = Output::new(decl.name, decl.type_spec);
    match decl.expression {
        Some(expr) => output.with_expression(expr),
        None => output,
    }
}

/// `{ key: value ... }` pairs, as in `runtime` and `meta`.
fn key_values<'a>(scanner: &mut Scanner<'a>) -> Result<Vec<(&'a str, &'a str)>> {
    let (s, e) = scanner.block('{', '}', Mode::Code)?;
    let mut section = scanner.sub(s, e);
    let mut pairs = Vec::new();
    while !section.is_eof() {
        let key = section.identifier("attribute name", false)?;
        section.expect(":")?;
        let value = section.expression()?;
        section.try_consume(",");
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// A JSON value for a WDL literal, including arrays and objects whose
/// members are JSON-compatible.
fn literal_value(text: &str) -> Option<JsonValue> {
    match Binding::parse_wdl(text) {
        Binding::Literal(value) => Some(value),
        Binding::Expression(_) => serde_json::from_str(text).ok(),
    }
}

fn meta_text(value: &str) -> String {
    match literal_value(value) {
        Some(JsonValue::String(s)) => s,
        _ => unquote(value).unwrap_or(value).to_string(),
    }
}

/// `"text"` or `{ description: "text", ... }`.
fn parameter_description(value: &str) -> Option<String> {
    if let Some(JsonValue::String(s)) = literal_value(value) {
        return Some(s);
    }
    META_DESCRIPTION
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| literal_value(&format!("\"{}\"", m.as_str())))
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Map one runtime attribute onto the IR. Values that are not literals are
/// kept as their source text under `custom_attributes`.
fn apply_runtime_attribute(runtime: &mut Runtime, key: &str, value: &str) {
    let Some(literal) = literal_value(value) else {
        debug!(key, value, "runtime attribute is an expression, keeping its text");
        runtime
            .custom_attributes
            .insert(key.to_string(), JsonValue::String(value.to_string()));
        return;
    };
    let count = |v: &JsonValue| v.as_f64().filter(|n| *n >= 0.0).map(|n| n.ceil() as u32);
    match (key, &literal) {
        ("cpu", v) if count(v).is_some() => runtime.cpu = count(v),
        ("cpu", JsonValue::String(s)) if s.trim().parse::<f64>().is_ok() => {
            runtime.cpu = s.trim().parse::<f64>().ok().map(|n| n.ceil() as u32)
        }
        ("memory", JsonValue::String(s)) => runtime.memory = Some(s.trim().to_string()),
        ("memory", JsonValue::Number(n)) => {
            // bare numbers are bytes
            let mb = n.as_f64().unwrap_or(0.0) / (1024.0 * 1024.0);
            runtime.memory = Some(format!("{}M", mb.ceil() as u64));
        }
        ("docker" | "container", JsonValue::String(s)) => runtime.docker = Some(s.clone()),
        ("docker" | "container", JsonValue::Array(images)) => {
            runtime.docker = images.iter().find_map(|i| i.as_str()).map(str::to_string)
        }
        ("disks" | "disk", JsonValue::String(s)) => runtime.disk = Some(normalize_disks(s)),
        ("disks" | "disk", JsonValue::Number(n)) => runtime.disk = Some(format!("{}G", n)),
        ("preemptible", v) if count(v).is_some() => runtime.preemptible = count(v),
        ("maxRetries", v) if count(v).is_some() => runtime.max_retries = count(v),
        ("gpu", JsonValue::Bool(b)) => runtime.gpu = Some(*b),
        ("zones", JsonValue::String(s)) => {
            runtime.zones = s.split_whitespace().map(str::to_string).collect()
        }
        ("zones", JsonValue::Array(zones)) => {
            runtime.zones = zones.iter().filter_map(|z| z.as_str()).map(str::to_string).collect()
        }
        ("continueOnReturnCode", JsonValue::Bool(b)) => runtime.continue_on_return_code = Some(*b),
        _ => {
            runtime.custom_attributes.insert(key.to_string(), literal.clone());
        }
    }
}

/// `local-disk 100 HDD` is 100 GB; other forms are kept as written.
fn normalize_disks(text: &str) -> String {
    if let Some(size) = LOCAL_DISK.captures(text).and_then(|caps| caps.get(1)) {
        return format!("{}G", size.as_str());
    }
    if parse_size_mb(text).is_none() {
        warn!(disks = text, "unrecognized disks specification");
    }
    text.trim().to_string()
}

/// Strip surrounding blank lines and the common indentation.
fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let body = &lines[first..=last];
    let indent = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches(&[' ', '\t'][..]).len())
        .min()
        .unwrap_or(0);
    body.iter()
        .map(|l| if l.trim().is_empty() { "" } else { &l[indent..] })
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}
