//! CWL document parser
//!
//! CWL is YAML, so there is no text scanning here: the document is loaded
//! into a `serde_yaml::Value` and walked. `CommandLineTool`, `Workflow` and
//! packed `$graph` documents are accepted. Parameter references such as
//! `$(inputs.x)` are rewritten to `~{x}` placeholders so that the IR holds a
//! single interpolation syntax whichever language it came from.

use super::Parse;
use crate::error::{ConvertError, Result};
use crate::ir::io::quote;
use crate::ir::{Binding, Input, Output, Runtime, Task, Workflow, WorkflowCall, WorkflowKind};
use crate::types::{DataType, TypeFallback, TypeSpec};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::HashSet;
use tracing::{debug, warn};

/// `$(inputs.x)` (optionally `.path` / `.basename`) and the escapes `\$(`, `\${`.
static PARAMETER_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\\$[({]|\$\(inputs\.([A-Za-z_][A-Za-z0-9_]*)(?:\.(?:path|basename))?\)").unwrap()
});

/// A step port or `self` read inside a step expression.
static PORT_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\binputs\.([A-Za-z_][A-Za-z0-9_]*)|\bself\b").unwrap());

/// A `$(...)` expression embedded in a string, one level of parentheses deep.
static EMBEDDED_EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\(((?:[^()]|\([^()]*\))*)\)").unwrap());

/// Parser for CWL documents.
#[derive(Debug, Default)]
pub struct CwlParser {
    fallbacks: Vec<TypeFallback>,
}

/// One entry of a step's `in` section.
#[derive(Debug, Default)]
struct Port {
    /// Source in IR form (`x` or `step.output`)
    source: Option<String>,
    default: Option<JsonValue>,
    value_from: Option<String>,
}

/// Files a tool redirects its standard streams to.
#[derive(Debug, Default, Clone, Copy)]
struct Streams<'a> {
    stdout: Option<&'a str>,
    stderr: Option<&'a str>,
}

impl<'a> Streams<'a> {
    fn source_for(&self, glob: &str) -> Option<&'static str> {
        if self.stdout == Some(glob) {
            Some("stdout()")
        } else if self.stderr == Some(glob) {
            Some("stderr()")
        } else {
            None
        }
    }
}

impl CwlParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_document(&mut self, document: &YamlValue, name: &str) -> Result<Workflow> {
        let root = document
            .as_mapping()
            .ok_or_else(|| ConvertError::invalid_document("document root must be a mapping"))?;
        let mut workflow = match root.get("$graph") {
            Some(graph) => self.parse_graph(graph, name)?,
            None => match class_of(root) {
                Some("CommandLineTool") => Workflow::from_task(self.parse_tool(root, name)?),
                Some("Workflow") => self.parse_workflow(root, name, Vec::new())?,
                Some(other) => {
                    return Err(ConvertError::UnknownClass {
                        class: other.to_string(),
                    })
                }
                None => return Err(ConvertError::invalid_document("missing `class`")),
            },
        };
        workflow.version = get_str(root, "cwlVersion").map(str::to_string);
        Ok(workflow)
    }

    /// A packed document: tools become tasks of the `main` workflow.
    fn parse_graph(&mut self, graph: &YamlValue, name: &str) -> Result<Workflow> {
        let elements = graph
            .as_sequence()
            .ok_or_else(|| ConvertError::invalid_document("`$graph` must be a list"))?;
        let mut tools = Vec::new();
        let mut workflows = Vec::new();
        for element in elements {
            let map = element
                .as_mapping()
                .ok_or_else(|| ConvertError::invalid_document("`$graph` entries must be mappings"))?;
            match class_of(map) {
                Some("CommandLineTool") => tools.push(self.parse_tool(map, "")?),
                Some("Workflow") => workflows.push(map),
                Some(other) => {
                    return Err(ConvertError::UnknownClass {
                        class: other.to_string(),
                    })
                }
                None => return Err(ConvertError::invalid_document("`$graph` entry without `class`")),
            }
        }

        let main = workflows
            .iter()
            .position(|w| get_str(w, "id").map(short_id) == Some("main"))
            .unwrap_or(0);
        match workflows.get(main) {
            Some(map) => {
                if workflows.len() > 1 {
                    warn!(count = workflows.len(), "packed document has several workflows, only one is converted");
                }
                self.parse_workflow(map, name, tools)
            }
            None => {
                let Some(first) = tools.first() else {
                    return Err(ConvertError::invalid_document("`$graph` is empty"));
                };
                let doc_name = if name.is_empty() { first.name.clone() } else { name.to_string() };
                let mut doc = Workflow::new(doc_name);
                doc.kind = WorkflowKind::Task;
                for tool in tools {
                    doc.add_task(tool);
                }
                Ok(doc)
            }
        }
    }

    fn parse_tool(&mut self, tool: &Mapping, fallback_name: &str) -> Result<Task> {
        let name = get_str(tool, "id")
            .map(short_id)
            .filter(|id| !id.is_empty())
            .unwrap_or(if fallback_name.is_empty() { "tool" } else { fallback_name });
        let mut task = Task::new(name, String::new());
        task.description = text_field(tool, "doc").or_else(|| text_field(tool, "label"));

        // (position, prefix, input) for inputs placed on the command line
        let mut bound = Vec::new();
        for (id, definition) in entries(tool.get("inputs"), "inputs")? {
            let mut input = Input::new(id.clone(), self.type_of(parameter_type(definition)));
            if let Some(map) = definition.as_mapping() {
                input.description = text_field(map, "doc").or_else(|| text_field(map, "label"));
                input.default = map.get("default").and_then(yaml_to_json).map(Binding::Literal);
                if let Some(binding) = map.get("inputBinding").and_then(YamlValue::as_mapping) {
                    let position = binding.get("position").and_then(YamlValue::as_i64).unwrap_or(0);
                    let prefix = get_str(binding, "prefix").map(str::to_string);
                    bound.push((position, prefix, id));
                }
            }
            task.inputs.push(input);
        }

        task.command = command_line(tool, bound)?;
        if task.command.is_empty() {
            warn!(tool = %task.name, "tool has no baseCommand or arguments");
        }

        let streams = Streams {
            stdout: get_str(tool, "stdout"),
            stderr: get_str(tool, "stderr"),
        };
        for (id, definition) in entries(tool.get("outputs"), "outputs")? {
            let type_value = parameter_type(definition);
            let mut output = match type_value.as_str() {
                Some("stdout") => Output::new(id, TypeSpec::file()).with_expression("stdout()"),
                Some("stderr") => Output::new(id, TypeSpec::file()).with_expression("stderr()"),
                _ => {
                    let type_spec = self.type_of(type_value);
                    let binding = definition
                        .as_mapping()
                        .and_then(|m| m.get("outputBinding"))
                        .and_then(YamlValue::as_mapping);
                    let expression = output_expression(binding, &type_spec, streams);
                    let output = Output::new(id, type_spec);
                    match expression {
                        Some(expression) => output.with_expression(expression),
                        None => output,
                    }
                }
            };
            if let Some(map) = definition.as_mapping() {
                output.description = text_field(map, "doc").or_else(|| text_field(map, "label"));
            }
            task.outputs.push(output);
        }

        task.runtime = runtime_of(tool);
        Ok(task)
    }

    fn parse_workflow(&mut self, map: &Mapping, name: &str, tools: Vec<Task>) -> Result<Workflow> {
        let id = get_str(map, "id").map(short_id).unwrap_or("");
        let workflow_name = get_str(map, "label")
            .filter(|label| is_identifier(label))
            .or(Some(id).filter(|id| !id.is_empty() && *id != "main"))
            .or(Some(name).filter(|n| !n.is_empty()))
            .unwrap_or("workflow");
        let mut workflow = Workflow::new(workflow_name);
        workflow.description = text_field(map, "doc");
        for tool in tools {
            workflow.add_task(tool);
        }

        for (input_id, definition) in entries(map.get("inputs"), "inputs")? {
            let mut input = Input::new(input_id, self.type_of(parameter_type(definition)));
            if let Some(def) = definition.as_mapping() {
                input.description = text_field(def, "doc").or_else(|| text_field(def, "label"));
                input.default = def.get("default").and_then(yaml_to_json).map(Binding::Literal);
            }
            workflow.inputs.push(input);
        }

        for (output_id, definition) in entries(map.get("outputs"), "outputs")? {
            let mut output = Output::new(output_id, self.type_of(parameter_type(definition)));
            if let Some(def) = definition.as_mapping() {
                output.description = text_field(def, "doc");
                output.expression = def
                    .get("outputSource")
                    .and_then(|source| sources(source, id))
                    .map(|expr| match (get_str(def, "pickValue"), def.get("outputSource")) {
                        (Some("first_non_null"), Some(YamlValue::Sequence(_))) => {
                            format!("select_first({})", expr)
                        }
                        (Some("all_non_null"), Some(YamlValue::Sequence(_))) => {
                            format!("select_all({})", expr)
                        }
                        _ => expr,
                    });
            }
            workflow.outputs.push(output);
        }

        for (step_id, definition) in entries(map.get("steps"), "steps")? {
            let call = self.parse_step(&mut workflow, id, &step_id, definition)?;
            workflow.add_call(call);
        }
        Ok(workflow)
    }

    fn parse_step(
        &mut self,
        workflow: &mut Workflow,
        workflow_id: &str,
        step_id: &str,
        definition: &YamlValue,
    ) -> Result<WorkflowCall> {
        let step = definition
            .as_mapping()
            .ok_or_else(|| ConvertError::invalid_document(format!("step '{}' must be a mapping", step_id)))?;

        let task_name = match step.get("run") {
            Some(YamlValue::String(reference)) => run_reference(reference).to_string(),
            Some(YamlValue::Mapping(tool)) => match class_of(tool) {
                Some("CommandLineTool") => {
                    let mut task = self.parse_tool(tool, step_id)?;
                    task.name = step_id.to_string();
                    workflow.add_task(task);
                    step_id.to_string()
                }
                other => {
                    warn!(step = step_id, class = ?other, "embedded run is not a tool, treating it as external");
                    step_id.to_string()
                }
            },
            _ => {
                return Err(ConvertError::invalid_document(format!(
                    "step '{}' has no `run`",
                    step_id
                )))
            }
        };

        let mut ports: IndexMap<String, Port> = IndexMap::new();
        for (port_id, port) in entries(step.get("in"), "step inputs")? {
            ports.insert(port_id, parse_port(port, workflow_id));
        }

        let scatter = match step.get("scatter") {
            Some(YamlValue::String(port)) => Some(short_id(port).to_string()),
            Some(YamlValue::Sequence(list)) => {
                if list.len() > 1 {
                    warn!(step = step_id, "scatter over several inputs, only the first is kept");
                }
                list.first().and_then(YamlValue::as_str).map(|p| short_id(p).to_string())
            }
            _ => None,
        };
        let scatter = scatter.as_deref();

        let when = get_str(step, "when");
        let mut referenced: HashSet<&str> = HashSet::new();
        for text in ports.values().filter_map(|p| p.value_from.as_deref()).chain(when) {
            for caps in PORT_REFERENCE.captures_iter(text) {
                if let Some(port) = caps.get(1) {
                    referenced.insert(port.as_str());
                }
            }
        }

        let task = workflow.tasks.get(&task_name);
        // ports only feeding another port's expression are not task inputs
        let declared = |port: &str| match task {
            Some(task) => task.input(port).is_some(),
            None => !referenced.contains(port),
        };

        let mut call = WorkflowCall::new(step_id, task_name.clone());
        for (name, port) in &ports {
            let is_scatter = scatter == Some(name.as_str());
            if (is_scatter || referenced.contains(name.as_str())) && !declared(name) {
                continue;
            }
            let binding = if is_scatter {
                Binding::expression(name.clone())
            } else if let Some(value_from) = &port.value_from {
                step_binding(value_from, &ports, scatter, port.source.as_deref())
            } else if let Some(source) = &port.source {
                Binding::expression(source.clone())
            } else if let Some(default) = &port.default {
                Binding::Literal(default.clone())
            } else {
                debug!(step = step_id, port = %name, "step input has no value");
                continue;
            };
            call.inputs.insert(name.clone(), binding);
        }

        if let Some(variable) = scatter {
            call.scatter = Some(variable.to_string());
            call.scatter_items = ports.get(variable).and_then(|port| match (&port.value_from, &port.source) {
                (Some(value_from), _) => step_binding(value_from, &ports, None, port.source.as_deref())
                    .as_expression()
                    .map(str::to_string),
                (None, Some(source)) => Some(source.clone()),
                (None, None) => None,
            });
            if call.scatter_items.is_none() {
                warn!(step = step_id, port = variable, "scatter port has no source");
            }
        }

        if let Some(when) = when {
            let condition = match whole_expression(when.trim()) {
                Some(inner) => substitute_ports(inner, &ports, scatter, None),
                None => substitute_ports(when, &ports, scatter, None),
            };
            call.conditional = Some(condition.trim().to_string());
        }
        Ok(call)
    }

    fn type_of(&mut self, value: &YamlValue) -> TypeSpec {
        TypeSpec::from_cwl(value).collect_into(&mut self.fallbacks)
    }
}

impl Parse for CwlParser {
    fn parse_named(&mut self, source: &str, name: &str) -> Result<Workflow> {
        self.fallbacks.clear();
        let document: YamlValue = serde_yaml::from_str(source)?;
        self.parse_document(&document, name)
    }

    fn fallbacks(&self) -> &[TypeFallback] {
        &self.fallbacks
    }
}

/// Rewrite CWL parameter references in a command or glob as WDL placeholders.
pub(crate) fn from_cwl_template(text: &str) -> String {
    PARAMETER_REFERENCE
        .replace_all(text, |caps: &Captures| match caps.get(1) {
            Some(name) => format!("~{{{}}}", name.as_str()),
            // escaped `$(` / `${` is literal text
            None => caps[0][1..].to_string(),
        })
        .into_owned()
}

fn class_of(map: &Mapping) -> Option<&str> {
    get_str(map, "class")
}

fn get_str<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(YamlValue::as_str)
}

/// The last segment of `#main/step/port` style identifiers.
fn short_id(id: &str) -> &str {
    id.rsplit(|c: char| c == '#' || c == '/').next().unwrap_or(id)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `doc` may be a string or a list of lines.
fn text_field(map: &Mapping, key: &str) -> Option<String> {
    match map.get(key)? {
        YamlValue::String(s) => Some(s.trim_end().to_string()),
        YamlValue::Sequence(lines) => Some(
            lines
                .iter()
                .filter_map(YamlValue::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn yaml_to_json(value: &YamlValue) -> Option<JsonValue> {
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "value has no JSON form, dropping it");
            None
        }
    }
}

/// Scalars as they would appear on a command line.
fn scalar_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `(id, definition)` pairs from either the mapping form (`id: definition`)
/// or the list form (`- id: ...`).
fn entries<'a>(value: Option<&'a YamlValue>, what: &str) -> Result<Vec<(String, &'a YamlValue)>> {
    match value {
        None | Some(YamlValue::Null) => Ok(Vec::new()),
        Some(YamlValue::Mapping(map)) => map
            .iter()
            .map(|(key, definition)| match key.as_str() {
                Some(id) => Ok((short_id(id).to_string(), definition)),
                None => Err(ConvertError::invalid_document(format!("{} keys must be strings", what))),
            })
            .collect(),
        Some(YamlValue::Sequence(items)) => items
            .iter()
            .map(|item| {
                item.as_mapping()
                    .and_then(|m| get_str(m, "id"))
                    .map(|id| (short_id(id).to_string(), item))
                    .ok_or_else(|| ConvertError::invalid_document(format!("{} entries need an `id`", what)))
            })
            .collect(),
        Some(_) => Err(ConvertError::invalid_document(format!(
            "{} must be a mapping or a list",
            what
        ))),
    }
}

/// The type of a parameter, or the definition itself for `id: type` shorthand.
fn parameter_type(definition: &YamlValue) -> &YamlValue {
    match definition.as_mapping().and_then(|m| m.get("type")) {
        Some(type_value) => type_value,
        None => definition,
    }
}

/// `baseCommand` then `arguments` and bound inputs in position order.
fn command_line(tool: &Mapping, bound: Vec<(i64, Option<String>, String)>) -> Result<String> {
    let mut parts = Vec::new();
    match tool.get("baseCommand") {
        None | Some(YamlValue::Null) => {}
        Some(YamlValue::Sequence(items)) => parts.extend(items.iter().filter_map(scalar_text)),
        Some(other) => match scalar_text(other) {
            Some(text) => parts.push(text),
            None => return Err(ConvertError::invalid_document("`baseCommand` must be a string or a list")),
        },
    }

    let mut positioned: Vec<(i64, String)> = Vec::new();
    match tool.get("arguments") {
        None | Some(YamlValue::Null) => {}
        Some(YamlValue::Sequence(arguments)) => {
            for argument in arguments {
                match argument {
                    YamlValue::Mapping(map) => {
                        let position = map.get("position").and_then(YamlValue::as_i64).unwrap_or(0);
                        let value = map.get("valueFrom").and_then(scalar_text);
                        let text = match (get_str(map, "prefix"), value) {
                            (Some(prefix), Some(value)) => format!("{} {}", prefix, value),
                            (None, Some(value)) => value,
                            (Some(prefix), None) => prefix.to_string(),
                            (None, None) => continue,
                        };
                        positioned.push((position, from_cwl_template(&text)));
                    }
                    other => match scalar_text(other) {
                        Some(text) => positioned.push((0, from_cwl_template(&text))),
                        None => debug!("skipping argument that is not a scalar"),
                    },
                }
            }
        }
        Some(_) => return Err(ConvertError::invalid_document("`arguments` must be a list")),
    }
    for (position, prefix, name) in bound {
        let text = match prefix {
            Some(prefix) => format!("{} ~{{{}}}", prefix, name),
            None => format!("~{{{}}}", name),
        };
        positioned.push((position, text));
    }
    positioned.sort_by_key(|(position, _)| *position);

    parts.extend(positioned.into_iter().map(|(_, text)| text));
    Ok(parts.join(" "))
}

/// Rebuild the WDL expression of a tool output from its `outputBinding`.
fn output_expression(binding: Option<&Mapping>, type_spec: &TypeSpec, streams: Streams<'_>) -> Option<String> {
    let binding = binding?;
    let glob = match binding.get("glob") {
        Some(YamlValue::String(glob)) => Some(glob.as_str()),
        Some(YamlValue::Sequence(globs)) => globs.first().and_then(YamlValue::as_str),
        _ => None,
    };
    let eval = get_str(binding, "outputEval");
    let load_contents = binding.get("loadContents").and_then(YamlValue::as_bool).unwrap_or(false);

    let Some(glob) = glob else {
        return eval.map(|eval| match whole_expression(eval.trim()) {
            Some(inner) => inner
                .trim()
                .strip_prefix("inputs.")
                .filter(|name| is_identifier(name))
                .unwrap_or(inner)
                .to_string(),
            None => quote(&from_cwl_template(eval)),
        });
    };
    let stream = streams.source_for(glob);
    if load_contents {
        let source = stream
            .map(str::to_string)
            .unwrap_or_else(|| quote(&from_cwl_template(glob)));
        return Some(format!("{}({})", reader_for(eval, type_spec), source));
    }
    if let Some(stream) = stream {
        return Some(stream.to_string());
    }
    if glob.contains("$(") {
        return Some(quote(&from_cwl_template(glob)));
    }
    if glob.contains('(') {
        // an expression that had no CWL counterpart
        return Some(glob.to_string());
    }
    if glob.contains(|c: char| matches!(c, '*' | '?' | '[')) {
        return Some(match type_spec.kind {
            DataType::Array(_) => format!("glob({})", quote(glob)),
            _ => format!("glob({})[0]", quote(glob)),
        });
    }
    Some(quote(glob))
}

/// The WDL `read_*` function matching an `outputEval` over loaded contents.
fn reader_for(eval: Option<&str>, type_spec: &TypeSpec) -> &'static str {
    match eval {
        Some(e) if e.contains("parseInt") => "read_int",
        Some(e) if e.contains("parseFloat") => "read_float",
        Some(e) if e.contains("\"true\"") || e.contains("'true'") => "read_boolean",
        _ => match type_spec.kind {
            DataType::Int => "read_int",
            DataType::Float => "read_float",
            DataType::Boolean => "read_boolean",
            _ => "read_string",
        },
    }
}

/// Requirements and hints as `(class, fields)`, in list or mapping form.
fn requirements(tool: &Mapping) -> Vec<(&str, &Mapping)> {
    let mut found = Vec::new();
    for key in ["requirements", "hints"] {
        match tool.get(key) {
            Some(YamlValue::Sequence(items)) => {
                for item in items.iter().filter_map(YamlValue::as_mapping) {
                    if let Some(class) = class_of(item) {
                        found.push((class, item));
                    }
                }
            }
            Some(YamlValue::Mapping(by_class)) => {
                for (class, fields) in by_class {
                    if let (Some(class), Some(fields)) = (class.as_str(), fields.as_mapping()) {
                        found.push((class, fields));
                    }
                }
            }
            _ => {}
        }
    }
    found
}

fn runtime_of(tool: &Mapping) -> Option<Runtime> {
    let mut runtime = Runtime::new();
    for (class, fields) in requirements(tool) {
        match class {
            "DockerRequirement" => {
                runtime.docker = get_str(fields, "dockerPull")
                    .or_else(|| get_str(fields, "dockerImageId"))
                    .map(str::to_string);
            }
            "ResourceRequirement" => {
                let amount = |key: &str| match fields.get(key) {
                    Some(value) => match value.as_f64() {
                        Some(n) => Some(n.ceil() as u64),
                        None => {
                            warn!(field = key, "resource requirement is not a number, ignoring it");
                            None
                        }
                    },
                    None => None,
                };
                if let Some(cores) = amount("coresMin") {
                    runtime.cpu = Some(cores as u32);
                }
                if let Some(ram) = amount("ramMin") {
                    runtime.memory = Some(format!("{}M", ram));
                }
                if let Some(outdir) = amount("outdirMin") {
                    runtime.disk = Some(format!("{}M", outdir));
                }
            }
            "RuntimeAttributes" => apply_runtime_attributes(&mut runtime, fields),
            "ShellCommandRequirement"
            | "InlineJavascriptRequirement"
            | "StepInputExpressionRequirement"
            | "ScatterFeatureRequirement"
            | "SubworkflowFeatureRequirement" => {}
            other => debug!(class = other, "ignoring requirement"),
        }
    }
    if runtime.is_empty() {
        None
    } else {
        Some(runtime)
    }
}

/// The hint carrying runtime fields CWL has no requirement for.
fn apply_runtime_attributes(runtime: &mut Runtime, fields: &Mapping) {
    let count = |v: &YamlValue| v.as_u64().map(|n| n as u32);
    for (key, value) in fields {
        let Some(key) = key.as_str() else { continue };
        match key {
            "class" => {}
            "maxRetries" => runtime.max_retries = count(value),
            "preemptible" => runtime.preemptible = count(value),
            "gpu" => runtime.gpu = value.as_bool(),
            "continueOnReturnCode" => runtime.continue_on_return_code = value.as_bool(),
            "zones" => {
                runtime.zones = match value {
                    YamlValue::Sequence(zones) => zones.iter().filter_map(scalar_text).collect(),
                    other => scalar_text(other)
                        .map(|s| s.split_whitespace().map(str::to_string).collect())
                        .unwrap_or_default(),
                }
            }
            "memory" if runtime.memory.is_none() => runtime.memory = scalar_text(value),
            "disk" if runtime.disk.is_none() => runtime.disk = scalar_text(value),
            _ => {
                if let Some(json) = yaml_to_json(value) {
                    runtime.custom_attributes.insert(key.to_string(), json);
                }
            }
        }
    }
}

/// `#hello` and `tools/hello.cwl` both name the task `hello`.
fn run_reference(reference: &str) -> &str {
    let name = short_id(reference);
    name.strip_suffix(".cwl").unwrap_or(name)
}

/// A source list or single source in IR form.
fn sources(value: &YamlValue, workflow_id: &str) -> Option<String> {
    match value {
        YamlValue::String(source) => Some(source_to_ir(source, workflow_id)),
        YamlValue::Sequence(list) => {
            let items: Vec<String> = list
                .iter()
                .filter_map(YamlValue::as_str)
                .map(|s| source_to_ir(s, workflow_id))
                .collect();
            Some(format!("[{}]", items.join(", ")))
        }
        _ => None,
    }
}

/// `step/output` becomes `step.output`; packed `#main/x` becomes `x`.
fn source_to_ir(source: &str, workflow_id: &str) -> String {
    let trimmed = source.trim_start_matches('#');
    let parts: Vec<&str> = trimmed.split('/').collect();
    match parts.as_slice() {
        [single] => single.to_string(),
        [owner, name] if !workflow_id.is_empty() && *owner == workflow_id => name.to_string(),
        [.., step, output] => format!("{}.{}", step, output),
        [] => String::new(),
    }
}

fn parse_port(definition: &YamlValue, workflow_id: &str) -> Port {
    match definition {
        YamlValue::Mapping(map) => Port {
            source: map.get("source").and_then(|s| sources(s, workflow_id)),
            default: map.get("default").and_then(yaml_to_json),
            value_from: get_str(map, "valueFrom").map(str::to_string),
        },
        YamlValue::Null => Port::default(),
        other => Port {
            source: sources(other, workflow_id),
            ..Port::default()
        },
    }
}

/// The inside of `$(...)` when the expression spans the whole text.
fn whole_expression(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("$(")?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// How a step port reads in IR terms.
fn port_form(name: &str, ports: &IndexMap<String, Port>, scatter: Option<&str>) -> Option<String> {
    if scatter == Some(name) {
        return Some(name.to_string());
    }
    let port = ports.get(name)?;
    if let Some(source) = &port.source {
        return Some(source.clone());
    }
    port.default.as_ref().map(|d| Binding::Literal(d.clone()).to_wdl())
}

fn substitute_ports(
    expression: &str,
    ports: &IndexMap<String, Port>,
    scatter: Option<&str>,
    own_source: Option<&str>,
) -> String {
    PORT_REFERENCE
        .replace_all(expression, |caps: &Captures| match caps.get(1) {
            Some(port) => port_form(port.as_str(), ports, scatter).unwrap_or_else(|| caps[0].to_string()),
            None => own_source.map(str::to_string).unwrap_or_else(|| caps[0].to_string()),
        })
        .into_owned()
}

/// Translate a step `valueFrom` into a binding.
fn step_binding(
    value_from: &str,
    ports: &IndexMap<String, Port>,
    scatter: Option<&str>,
    own_source: Option<&str>,
) -> Binding {
    let text = value_from.trim();
    if let Some(inner) = whole_expression(text) {
        return Binding::parse_wdl(&substitute_ports(inner, ports, scatter, own_source));
    }
    if text.contains("$(") {
        let interpolated = EMBEDDED_EXPRESSION.replace_all(text, |caps: &Captures| {
            format!("~{{{}}}", substitute_ports(&caps[1], ports, scatter, own_source))
        });
        return Binding::parse_wdl(&quote(&interpolated));
    }
    Binding::literal(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    const TOOL: &str = r#"
cwlVersion: v1.2
class: CommandLineTool
id: hello
doc: Say hello
baseCommand: echo
arguments:
  - "Hello, $(inputs.name)!"
stdout: stdout.txt
inputs:
  name:
    type: string
    doc: Who to greet
  count:
    type: int?
    default: 2
outputs:
  greeting:
    type: File
    outputBinding:
      glob: stdout.txt
  text:
    type: string
    outputBinding:
      glob: stdout.txt
      loadContents: true
      outputEval: $(self[0].contents.trim())
requirements:
  - class: DockerRequirement
    dockerPull: ubuntu:20.04
  - class: ResourceRequirement
    coresMin: 2
    ramMin: 2048
    outdirMin: 1024
hints:
  - class: RuntimeAttributes
    maxRetries: 3
    zones: [us-east1-b, us-east1-c]
    bootDiskSizeGb: 20
"#;

    fn parse(source: &str) -> Workflow {
        CwlParser::new().parse(source).unwrap()
    }

    #[test]
    fn test_parse_tool() {
        let doc = parse(TOOL);
        assert_eq!(doc.kind, WorkflowKind::Task);
        assert_eq!(doc.version.as_deref(), Some("v1.2"));
        let task = doc.single_task().unwrap();
        assert_eq!(task.name, "hello");
        assert_eq!(task.description.as_deref(), Some("Say hello"));
        assert_eq!(task.command, "echo Hello, ~{name}!");

        let name = task.input("name").unwrap();
        assert_eq!(name.type_spec, TypeSpec::string());
        assert_eq!(name.description.as_deref(), Some("Who to greet"));
        let count = task.input("count").unwrap();
        assert!(count.optional);
        assert_eq!(count.default, Some(Binding::literal(2)));

        assert_eq!(task.output("greeting").unwrap().expression.as_deref(), Some("stdout()"));
        assert_eq!(
            task.output("text").unwrap().expression.as_deref(),
            Some("read_string(stdout())")
        );
    }

    #[test]
    fn test_parse_requirements() {
        let doc = parse(TOOL);
        let runtime = doc.single_task().unwrap().runtime.clone().unwrap();
        assert_eq!(runtime.docker.as_deref(), Some("ubuntu:20.04"));
        assert_eq!(runtime.cpu, Some(2));
        assert_eq!(runtime.memory.as_deref(), Some("2048M"));
        assert_eq!(runtime.disk.as_deref(), Some("1024M"));
        assert_eq!(runtime.max_retries, Some(3));
        assert_eq!(runtime.zones, vec!["us-east1-b", "us-east1-c"]);
        assert_eq!(runtime.custom_attributes.get("bootDiskSizeGb"), Some(&JsonValue::from(20)));
    }

    #[test]
    fn test_requirements_mapping_form() {
        let doc = parse(
            r#"
class: CommandLineTool
baseCommand: [ls, -l]
inputs: {}
outputs: {}
requirements:
  DockerRequirement:
    dockerPull: alpine
"#,
        );
        let task = doc.single_task().unwrap();
        assert_eq!(task.name, "tool");
        assert_eq!(task.command, "ls -l");
        assert_eq!(task.runtime.as_ref().unwrap().docker.as_deref(), Some("alpine"));
    }

    #[test]
    fn test_input_bindings_and_shell_arguments() {
        let doc = parse(
            r#"
class: CommandLineTool
id: sort
baseCommand: sort
inputs:
  - id: reverse
    type: boolean
    inputBinding:
      position: 1
      prefix: -r
  - id: infile
    type: File
    inputBinding:
      position: 2
outputs:
  - id: sorted
    type: stdout
arguments:
  - valueFrom: "cat $(inputs.infile.path) | wc -l > \\$(date).txt"
    shellQuote: false
    position: 3
"#,
        );
        let task = doc.single_task().unwrap();
        assert_eq!(
            task.command,
            "sort -r ~{reverse} ~{infile} cat ~{infile} | wc -l > $(date).txt"
        );
        let sorted = task.output("sorted").unwrap();
        assert_eq!(sorted.type_spec, TypeSpec::file());
        assert_eq!(sorted.expression.as_deref(), Some("stdout()"));
    }

    #[test]
    fn test_output_globs() {
        let doc = parse(
            r#"
class: CommandLineTool
id: globber
baseCommand: run
inputs:
  prefix: string
outputs:
  bams:
    type: File[]
    outputBinding: {glob: "*.bam"}
  first:
    type: File
    outputBinding: {glob: "*.bai"}
  named:
    type: File
    outputBinding: {glob: "$(inputs.prefix).txt"}
  report:
    type: File
    outputBinding: {glob: report.html}
  lines:
    type: int
    outputBinding:
      glob: count.txt
      loadContents: true
      outputEval: $(parseInt(self[0].contents))
"#,
        );
        let task = doc.single_task().unwrap();
        let expr = |name: &str| task.output(name).unwrap().expression.clone().unwrap();
        assert_eq!(expr("bams"), r#"glob("*.bam")"#);
        assert_eq!(expr("first"), r#"glob("*.bai")[0]"#);
        assert_eq!(expr("named"), r#""~{prefix}.txt""#);
        assert_eq!(expr("report"), r#""report.html""#);
        assert_eq!(expr("lines"), r#"read_int("count.txt")"#);
    }

    #[test]
    fn test_parse_workflow_with_embedded_run() {
        let doc = parse(
            r##"
cwlVersion: v1.2
class: Workflow
id: count_workflow
inputs:
  text_file: File
outputs:
  total_lines:
    type: int
    outputSource: count/line_count
steps:
  count:
    run:
      class: CommandLineTool
      baseCommand: wc
      arguments: ["-l", "$(inputs.input_file.path)"]
      inputs:
        input_file: File
      outputs:
        line_count:
          type: int
          outputBinding:
            glob: out.txt
            loadContents: true
            outputEval: $(parseInt(self[0].contents))
    in:
      input_file: text_file
    out: [line_count]
  report:
    run: "#report"
    in:
      lines: count/line_count
      title: {default: "Lines"}
    out: []
"##,
        );
        assert_eq!(doc.kind, WorkflowKind::Workflow);
        assert_eq!(doc.name, "count_workflow");
        assert_eq!(doc.inputs[0].type_spec, TypeSpec::file());
        assert_eq!(doc.outputs[0].expression.as_deref(), Some("count.line_count"));

        let task = doc.tasks.get("count").unwrap();
        assert_eq!(task.command, "wc -l ~{input_file}");

        let count = doc.call("count").unwrap();
        assert_eq!(count.task_name, "count");
        assert_eq!(count.inputs["input_file"], Binding::expression("text_file"));

        let report = doc.call("report").unwrap();
        assert_eq!(report.task_name, "report");
        assert_eq!(report.inputs["lines"], Binding::expression("count.line_count"));
        assert_eq!(report.inputs["title"], Binding::literal("Lines"));
        assert_eq!(doc.unresolved_calls().len(), 1);
    }

    #[test]
    fn test_parse_packed_graph() {
        let doc = parse(
            r##"
cwlVersion: v1.2
$graph:
  - class: CommandLineTool
    id: "#process_file"
    baseCommand: process
    arguments: ["$(inputs.input_file.path)"]
    inputs:
      input_file: File
    outputs:
      processed:
        type: File
        outputBinding: {glob: output.txt}
  - class: Workflow
    id: main
    label: scatter_workflow
    requirements:
      - class: ScatterFeatureRequirement
    inputs:
      files: File[]
    outputs:
      results:
        type: File[]
        outputSource: process_file/processed
    steps:
      process_file:
        run: "#process_file"
        in:
          input_file:
            valueFrom: $(inputs.file)
          file: files
        scatter: file
        scatterMethod: dotproduct
        out: [processed]
"##,
        );
        assert_eq!(doc.name, "scatter_workflow");
        assert!(doc.tasks.contains_key("process_file"));
        let call = doc.call("process_file").unwrap();
        assert_eq!(call.scatter.as_deref(), Some("file"));
        assert_eq!(call.scatter_items.as_deref(), Some("files"));
        assert_eq!(call.inputs.len(), 1);
        assert_eq!(call.inputs["input_file"], Binding::expression("file"));
    }

    #[test]
    fn test_scatter_port_declared_by_task() {
        let doc = parse(
            r##"
$graph:
  - class: CommandLineTool
    id: align
    baseCommand: align
    inputs: {fastq: File}
    outputs: {}
  - class: Workflow
    id: main
    inputs: {reads: "File[]"}
    outputs: {}
    steps:
      - id: align
        run: "#align"
        in:
          - id: fastq
            source: "#main/reads"
        scatter: "#main/align/fastq"
        out: []
"##,
        );
        let call = doc.call("align").unwrap();
        assert_eq!(call.scatter.as_deref(), Some("fastq"));
        assert_eq!(call.scatter_items.as_deref(), Some("reads"));
        assert_eq!(call.inputs["fastq"], Binding::expression("fastq"));
    }

    #[test]
    fn test_conditional_step() {
        let doc = parse(
            r#"
class: Workflow
id: gated
inputs:
  run_qc: boolean
  sample: string
outputs: {}
steps:
  qc:
    run: qc.cwl
    in:
      run_qc: run_qc
      label:
        valueFrom: "$(inputs.sample).qc"
      sample: sample
    when: $(inputs.run_qc)
    out: []
"#,
        );
        let call = doc.call("qc").unwrap();
        assert_eq!(call.task_name, "qc");
        assert_eq!(call.conditional.as_deref(), Some("run_qc"));
        assert_eq!(call.inputs["label"], Binding::expression("\"~{sample}.qc\""));
        // only read by the expressions above
        assert!(!call.inputs.contains_key("run_qc"));
        assert!(!call.inputs.contains_key("sample"));
    }

    #[test]
    fn test_unknown_types_recorded() {
        let mut parser = CwlParser::new();
        parser
            .parse(
                r#"
class: CommandLineTool
baseCommand: x
inputs:
  choice:
    type: {type: enum, symbols: [a, b]}
outputs: {}
"#,
            )
            .unwrap();
        assert_eq!(parser.fallbacks().len(), 1);
        assert_eq!(parser.fallbacks()[0].language, Language::Cwl);
    }

    #[test]
    fn test_document_errors() {
        let mut parser = CwlParser::new();
        match parser.parse("class: ExpressionTool\ninputs: {}\n") {
            Err(ConvertError::UnknownClass { class }) => assert_eq!(class, "ExpressionTool"),
            other => panic!("expected UnknownClass, got {:?}", other),
        }
        assert!(matches!(
            parser.parse("- just\n- a list\n"),
            Err(ConvertError::InvalidDocument { .. })
        ));
        assert!(matches!(
            parser.parse("inputs: {}\n"),
            Err(ConvertError::InvalidDocument { .. })
        ));
        assert!(matches!(parser.parse("class: [unclosed"), Err(ConvertError::Yaml(_))));
        assert!(matches!(
            parser.parse("class: Workflow\nsteps:\n  a:\n    in: {}\n"),
            Err(ConvertError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_from_cwl_template() {
        assert_eq!(from_cwl_template("cat $(inputs.f.path) > $(inputs.out)"), "cat ~{f} > ~{out}");
        assert_eq!(from_cwl_template(r"echo \$(date) \${HOME}"), "echo $(date) ${HOME}");
        assert_eq!(from_cwl_template("$(runtime.cores)"), "$(runtime.cores)");
    }
}
