//! CWL renderer
//!
//! Documents are built as `serde_yaml` values and serialized at the end.
//! A lone task becomes a `CommandLineTool`; a workflow that owns its tasks
//! becomes a packed `$graph` whose workflow element has the id `main`.
//!
//! WDL placeholders are translated by token substitution: `~{x}` and `${x}`
//! naming a task input become `$(inputs.x)`. Anything more complex inside a
//! placeholder is left as written and logged. Step-level expressions refer to
//! workflow values through extra step ports, so `~{sample}` inside a call
//! input becomes `$(inputs.sample)` with a `sample` port sourced from the
//! workflow input of that name.

use super::Write;
use crate::error::Result;
use crate::ir::io::unquote;
use crate::ir::task::INTERPOLATION;
use crate::ir::workflow::dotted_references;
use crate::ir::{Binding, Input, Output, Runtime, Task, Workflow, WorkflowCall, WorkflowKind};
use crate::types::{DataType, TypeSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::HashSet;
use tracing::warn;

static READ_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^read_(string|int|float|boolean)\(\s*(stdout\(\)|stderr\(\)|"[^"]*"|'[^']*')\s*\)$"#).unwrap()
});

static GLOB_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^glob\(\s*("[^"]*"|'[^']*')\s*\)(?:\[0\])?$"#).unwrap());

static SELECT_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^select_(first|all)\(\s*\[(.*)\]\s*\)$").unwrap());

/// String literals are skipped; names and `a.b` references are captured.
static EXPRESSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?"#)
        .unwrap()
});

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";

/// Renders the IR as CWL YAML.
#[derive(Debug, Clone)]
pub struct CwlWriter {
    version: String,
}

impl Default for CwlWriter {
    fn default() -> Self {
        Self {
            version: "v1.2".to_string(),
        }
    }
}

/// Requirements a workflow picks up while its steps are written.
#[derive(Debug, Default)]
struct Features {
    scatter: bool,
    step_expressions: bool,
    javascript: bool,
    multiple_inputs: bool,
    subworkflows: bool,
}

impl CwlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn document(&self, body: Mapping) -> Result<String> {
        let mut root = Mapping::new();
        root.insert("cwlVersion".into(), self.version.as_str().into());
        for (key, value) in body {
            root.insert(key, value);
        }
        Ok(serde_yaml::to_string(&YamlValue::Mapping(root))?)
    }
}

impl Write for CwlWriter {
    fn write_workflow(&self, workflow: &Workflow) -> Result<String> {
        if let Some(task) = workflow.single_task() {
            return self.write_task(task);
        }

        if workflow.tasks.is_empty() {
            return self.document(workflow_mapping(workflow, false)?);
        }

        let mut graph = Vec::new();
        for task in workflow.tasks.values() {
            graph.push(YamlValue::Mapping(tool_mapping(task)?));
        }
        // a task-only document has no workflow element
        if workflow.kind != WorkflowKind::Task || !workflow.calls.is_empty() {
            graph.push(YamlValue::Mapping(workflow_mapping(workflow, true)?));
        }
        let mut body = Mapping::new();
        body.insert("$graph".into(), YamlValue::Sequence(graph));
        self.document(body)
    }

    fn write_task(&self, task: &Task) -> Result<String> {
        self.document(tool_mapping(task)?)
    }
}

fn class(name: &str) -> YamlValue {
    let mut requirement = Mapping::new();
    requirement.insert("class".into(), name.into());
    YamlValue::Mapping(requirement)
}

fn json_to_yaml(value: &JsonValue) -> Result<YamlValue> {
    Ok(serde_yaml::to_value(value)?)
}

fn is_path(type_spec: &TypeSpec) -> bool {
    matches!(type_spec.kind, DataType::File | DataType::Directory)
}

fn is_path_like(type_spec: &TypeSpec) -> bool {
    match &type_spec.kind {
        DataType::Array(item) => is_path_like(item),
        _ => is_path(type_spec),
    }
}

fn parameter_type(input: &Input) -> YamlValue {
    if input.optional && !input.type_spec.optional {
        input.type_spec.clone().with_optional(true).to_cwl()
    } else {
        input.type_spec.to_cwl()
    }
}

/// Escape `$(` and `${` so CWL reads them as text.
fn escape(text: &str) -> String {
    text.replace("$(", "\\$(").replace("${", "\\${")
}

/// Translate a command template, or any text evaluated against tool inputs.
pub(crate) fn to_cwl_template(text: &str, task: &Task) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in INTERPOLATION.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&escape(&text[last..whole.start()]));
        let tilde = whole.as_str().starts_with('~');
        match task.input(name.as_str()) {
            Some(input) if is_path(&input.type_spec) => {
                out.push_str(&format!("$(inputs.{}.path)", name.as_str()))
            }
            Some(_) => out.push_str(&format!("$(inputs.{})", name.as_str())),
            None if tilde => {
                warn!(task = %task.name, name = name.as_str(), "placeholder names no task input");
                out.push_str(&format!("$(inputs.{})", name.as_str()));
            }
            // a shell variable such as ${HOME}
            None => out.push_str(&escape(whole.as_str())),
        }
        last = whole.end();
    }
    out.push_str(&escape(&text[last..]));
    if out.contains("~{") {
        warn!(task = %task.name, "placeholder expression passed through untranslated");
    }
    out
}

/// A command that is one line of plain words and placeholders.
fn is_simple_command(command: &str) -> bool {
    if command.contains('\n') {
        return false;
    }
    let stripped = INTERPOLATION.replace_all(command, "x");
    !stripped.trim().is_empty()
        && stripped
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || "_-./=:,@%+".contains(c))
}

fn tool_mapping(task: &Task) -> Result<Mapping> {
    let mut tool = Mapping::new();
    tool.insert("class".into(), "CommandLineTool".into());
    tool.insert("id".into(), task.name.as_str().into());
    if let Some(doc) = &task.description {
        tool.insert("doc".into(), doc.as_str().into());
    }

    let mut requirements = Vec::new();
    let mut hints = Vec::new();
    let shell = !is_simple_command(task.command.trim());
    if shell {
        requirements.push(class("ShellCommandRequirement"));
    }

    let mut inputs = Mapping::new();
    for input in &task.inputs {
        inputs.insert(input.name.as_str().into(), parameter(input)?);
    }

    let mut outputs = Mapping::new();
    let mut stdout = false;
    let mut stderr = false;
    let mut javascript = false;
    for output in &task.outputs {
        let mut entry = Mapping::new();
        entry.insert("type".into(), output.type_spec.to_cwl());
        if let Some(doc) = &output.description {
            entry.insert("doc".into(), doc.as_str().into());
        }
        if let Some(binding) = output_binding(output, task, &mut stdout, &mut stderr, &mut javascript) {
            entry.insert("outputBinding".into(), YamlValue::Mapping(binding));
        }
        outputs.insert(output.name.as_str().into(), YamlValue::Mapping(entry));
    }
    if javascript {
        requirements.push(class("InlineJavascriptRequirement"));
    }

    if let Some(runtime) = task.runtime.as_ref().filter(|r| !r.is_empty()) {
        runtime_requirements(task, runtime, &mut requirements, &mut hints);
    }

    if !requirements.is_empty() {
        tool.insert("requirements".into(), YamlValue::Sequence(requirements));
    }
    if !hints.is_empty() {
        tool.insert("hints".into(), YamlValue::Sequence(hints));
    }

    let command = task.command.trim();
    if shell {
        let mut argument = Mapping::new();
        argument.insert("valueFrom".into(), to_cwl_template(command, task).into());
        argument.insert("shellQuote".into(), false.into());
        tool.insert("arguments".into(), YamlValue::Sequence(vec![YamlValue::Mapping(argument)]));
    } else {
        let mut words = command.split_whitespace().peekable();
        if let Some(program) = words.next_if(|w| !INTERPOLATION.is_match(w)) {
            tool.insert("baseCommand".into(), program.into());
        }
        let arguments: Vec<YamlValue> = words.map(|w| to_cwl_template(w, task).into()).collect();
        if !arguments.is_empty() {
            tool.insert("arguments".into(), YamlValue::Sequence(arguments));
        }
    }
    if stdout {
        tool.insert("stdout".into(), STDOUT_FILE.into());
    }
    if stderr {
        tool.insert("stderr".into(), STDERR_FILE.into());
    }

    tool.insert("inputs".into(), YamlValue::Mapping(inputs));
    tool.insert("outputs".into(), YamlValue::Mapping(outputs));
    Ok(tool)
}

fn parameter(input: &Input) -> Result<YamlValue> {
    let mut entry = Mapping::new();
    entry.insert("type".into(), parameter_type(input));
    if let Some(doc) = &input.description {
        entry.insert("doc".into(), doc.as_str().into());
    }
    match &input.default {
        Some(Binding::Literal(value)) => {
            entry.insert("default".into(), json_to_yaml(value)?);
        }
        Some(Binding::Expression(expression)) => {
            warn!(input = %input.name, expression = %expression, "default is an expression, dropping it");
        }
        None => {}
    }
    Ok(YamlValue::Mapping(entry))
}

fn output_binding(
    output: &Output,
    task: &Task,
    stdout: &mut bool,
    stderr: &mut bool,
    javascript: &mut bool,
) -> Option<Mapping> {
    let expression = output.expression.as_deref()?.trim();
    let mut binding = Mapping::new();
    let mut stream = |source: &str| -> Option<String> {
        match source {
            "stdout()" => {
                *stdout = true;
                Some(STDOUT_FILE.to_string())
            }
            "stderr()" => {
                *stderr = true;
                Some(STDERR_FILE.to_string())
            }
            _ => None,
        }
    };

    if let Some(file) = stream(expression) {
        binding.insert("glob".into(), file.into());
    } else if let Some(caps) = READ_FUNCTION.captures(expression) {
        let source = &caps[2];
        let glob = match stream(source) {
            Some(file) => file,
            None => to_cwl_template(unquote(source).unwrap_or(source), task),
        };
        let eval = match &caps[1] {
            "int" => "$(parseInt(self[0].contents))",
            "float" => "$(parseFloat(self[0].contents))",
            "boolean" => "$(self[0].contents.trim() == \"true\")",
            _ => "$(self[0].contents.trim())",
        };
        binding.insert("glob".into(), glob.into());
        binding.insert("loadContents".into(), true.into());
        binding.insert("outputEval".into(), eval.into());
        *javascript = true;
    } else if let Some(caps) = GLOB_FUNCTION.captures(expression) {
        let pattern = &caps[1];
        binding.insert("glob".into(), unquote(pattern).unwrap_or(pattern).into());
    } else if let Some(text) = unquote(expression) {
        let translated = to_cwl_template(text, task);
        if is_path_like(&output.type_spec) {
            binding.insert("glob".into(), translated.into());
        } else {
            binding.insert("outputEval".into(), translated.into());
        }
    } else if let Some(value) = Binding::parse_wdl(expression).as_literal() {
        binding.insert("outputEval".into(), format!("$({})", value).into());
    } else {
        warn!(output = %output.name, expression, "output expression has no CWL form, passing it through");
        binding.insert("outputEval".into(), format!("$({})", expression).into());
        *javascript = true;
    }
    Some(binding)
}

fn runtime_requirements(task: &Task, runtime: &Runtime, requirements: &mut Vec<YamlValue>, hints: &mut Vec<YamlValue>) {
    if let Some(image) = &runtime.docker {
        let mut docker = Mapping::new();
        docker.insert("class".into(), "DockerRequirement".into());
        docker.insert("dockerPull".into(), image.as_str().into());
        requirements.push(YamlValue::Mapping(docker));
    }

    let mut attributes = Mapping::new();
    attributes.insert("class".into(), "RuntimeAttributes".into());

    let mut resources = Mapping::new();
    resources.insert("class".into(), "ResourceRequirement".into());
    if let Some(cpu) = runtime.cpu {
        resources.insert("coresMin".into(), u64::from(cpu).into());
    }
    match runtime.memory_mb() {
        Ok(Some(mb)) => {
            resources.insert("ramMin".into(), mb.into());
        }
        Ok(None) => {}
        Err(e) => {
            warn!(task = %task.name, error = %e, "keeping memory as a runtime hint");
            attributes.insert("memory".into(), runtime.memory.as_deref().unwrap_or_default().into());
        }
    }
    match runtime.disk_mb() {
        Ok(Some(mb)) => {
            resources.insert("outdirMin".into(), mb.into());
        }
        Ok(None) => {}
        Err(e) => {
            warn!(task = %task.name, error = %e, "keeping disk as a runtime hint");
            attributes.insert("disk".into(), runtime.disk.as_deref().unwrap_or_default().into());
        }
    }
    if resources.len() > 1 {
        requirements.push(YamlValue::Mapping(resources));
    }

    if runtime.has_extended_attributes() {
        extended_attributes(runtime, &mut attributes);
    }
    if attributes.len() > 1 {
        hints.push(YamlValue::Mapping(attributes));
    }
}

/// Runtime fields with no CWL resource equivalent, kept as hint entries.
fn extended_attributes(runtime: &Runtime, attributes: &mut Mapping) {
    if let Some(retries) = runtime.max_retries {
        attributes.insert("maxRetries".into(), u64::from(retries).into());
    }
    if let Some(preemptible) = runtime.preemptible {
        attributes.insert("preemptible".into(), u64::from(preemptible).into());
    }
    if let Some(gpu) = runtime.gpu {
        attributes.insert("gpu".into(), gpu.into());
    }
    if !runtime.zones.is_empty() {
        let zones: Vec<YamlValue> = runtime.zones.iter().map(|z| z.as_str().into()).collect();
        attributes.insert("zones".into(), YamlValue::Sequence(zones));
    }
    if let Some(continue_on) = runtime.continue_on_return_code {
        attributes.insert("continueOnReturnCode".into(), continue_on.into());
    }
    for (key, value) in &runtime.custom_attributes {
        match json_to_yaml(value) {
            Ok(yaml) => {
                attributes.insert(key.as_str().into(), yaml);
            }
            Err(e) => warn!(key = %key, error = %e, "dropping runtime attribute"),
        }
    }
}

/// `x` for a workflow value, `a/b` for a call output.
fn source_of(binding: &Binding) -> Option<String> {
    if let Some(name) = binding.identifier() {
        return Some(name.to_string());
    }
    binding.reference().map(|(call, output)| format!("{}/{}", call, output))
}

fn workflow_mapping(workflow: &Workflow, packed: bool) -> Result<Mapping> {
    let mut map = Mapping::new();
    map.insert("class".into(), "Workflow".into());
    let id = if packed { "main" } else { workflow.name.as_str() };
    map.insert("id".into(), id.into());
    map.insert("label".into(), workflow.name.as_str().into());
    if let Some(doc) = &workflow.description {
        map.insert("doc".into(), doc.as_str().into());
    }

    let mut features = Features::default();
    let mut inputs = Mapping::new();
    for input in &workflow.inputs {
        inputs.insert(input.name.as_str().into(), parameter(input)?);
    }

    let mut outputs = Mapping::new();
    for output in &workflow.outputs {
        outputs.insert(
            output.name.as_str().into(),
            YamlValue::Mapping(workflow_output(output, &mut features)),
        );
    }

    let mut steps = Mapping::new();
    for call in &workflow.calls {
        let step = StepWriter::new(workflow, call, &mut features).write()?;
        steps.insert(call.call_id.as_str().into(), YamlValue::Mapping(step));
    }

    let mut requirements = Vec::new();
    if features.subworkflows {
        requirements.push(class("SubworkflowFeatureRequirement"));
    }
    if features.scatter {
        requirements.push(class("ScatterFeatureRequirement"));
    }
    if features.multiple_inputs {
        requirements.push(class("MultipleInputFeatureRequirement"));
    }
    if features.step_expressions {
        requirements.push(class("StepInputExpressionRequirement"));
    }
    if features.javascript {
        requirements.push(class("InlineJavascriptRequirement"));
    }
    if !requirements.is_empty() {
        map.insert("requirements".into(), YamlValue::Sequence(requirements));
    }
    map.insert("inputs".into(), YamlValue::Mapping(inputs));
    map.insert("outputs".into(), YamlValue::Mapping(outputs));
    map.insert("steps".into(), YamlValue::Mapping(steps));
    Ok(map)
}

fn workflow_output(output: &Output, features: &mut Features) -> Mapping {
    let mut entry = Mapping::new();
    entry.insert("type".into(), output.type_spec.to_cwl());
    if let Some(doc) = &output.description {
        entry.insert("doc".into(), doc.as_str().into());
    }
    let Some(expression) = output.expression.as_deref().map(str::trim) else {
        warn!(output = %output.name, "workflow output has no source");
        return entry;
    };

    if let Some(source) = source_of(&Binding::expression(expression)) {
        entry.insert("outputSource".into(), source.into());
        return entry;
    }

    let selected = SELECT_FUNCTION.captures(expression).and_then(|caps| {
        let sources: Option<Vec<String>> = caps[2]
            .split(',')
            .map(|item| source_of(&Binding::expression(item.trim())))
            .collect();
        sources.map(|sources| (caps[1].to_string(), sources))
    });
    if let Some((which, sources)) = selected {
        let sources: Vec<YamlValue> = sources.into_iter().map(YamlValue::from).collect();
        entry.insert("outputSource".into(), YamlValue::Sequence(sources));
        let pick = if which == "first" { "first_non_null" } else { "all_non_null" };
        entry.insert("pickValue".into(), pick.into());
        features.multiple_inputs = true;
        return entry;
    }

    let mut references: Vec<YamlValue> = dotted_references(expression)
        .into_iter()
        .map(|(call, name)| format!("{}/{}", call, name).into())
        .collect();
    warn!(output = %output.name, expression, "workflow output expression reduced to its sources");
    match references.len() {
        0 => {}
        1 => {
            entry.insert("outputSource".into(), references.remove(0));
        }
        _ => {
            entry.insert("outputSource".into(), YamlValue::Sequence(references));
            features.multiple_inputs = true;
        }
    }
    entry
}

/// Writes one call as a workflow step.
struct StepWriter<'a> {
    workflow: &'a Workflow,
    call: &'a WorkflowCall,
    features: &'a mut Features,
    ports: Mapping,
    call_ids: HashSet<&'a str>,
}

impl<'a> StepWriter<'a> {
    fn new(workflow: &'a Workflow, call: &'a WorkflowCall, features: &'a mut Features) -> Self {
        Self {
            workflow,
            call,
            features,
            ports: Mapping::new(),
            call_ids: workflow.calls.iter().map(|c| c.call_id.as_str()).collect(),
        }
    }

    fn write(mut self) -> Result<Mapping> {
        let (workflow, call) = (self.workflow, self.call);
        let task = workflow.task_for(call);
        let scatter = call.scatter.as_deref();

        for (name, binding) in &call.inputs {
            let port = match binding {
                Binding::Literal(value) => {
                    let mut port = Mapping::new();
                    port.insert("default".into(), json_to_yaml(value)?);
                    YamlValue::Mapping(port)
                }
                Binding::Expression(_) if scatter.is_some() && binding.identifier() == scatter => {
                    if Some(name.as_str()) == scatter && call.scatter_items.is_some() {
                        // the scatter port below carries the items
                        continue;
                    }
                    self.features.step_expressions = true;
                    value_from(format!("$(inputs.{})", binding.identifier().unwrap_or_default()))
                }
                Binding::Expression(text) => match source_of(binding) {
                    Some(source) => source.into(),
                    None => {
                        self.features.step_expressions = true;
                        let translated = self.expression(text);
                        value_from(translated)
                    }
                },
            };
            self.ports.insert(name.as_str().into(), port);
        }

        let mut step = Mapping::new();
        let run = match task {
            Some(task) => format!("#{}", task.name),
            None => {
                self.features.subworkflows = true;
                format!("{}.cwl", call.task_name)
            }
        };
        step.insert("run".into(), run.into());

        match (scatter, call.scatter_items.as_deref()) {
            (Some(variable), Some(items)) => {
                let port = match source_of(&Binding::expression(items)) {
                    Some(source) => source.into(),
                    None => {
                        self.features.step_expressions = true;
                        warn!(call = %call.call_id, items, "scatter collection is an expression");
                        let translated = self.general_expression(items);
                        value_from(translated)
                    }
                };
                if self.ports.contains_key(variable) {
                    warn!(call = %call.call_id, variable, "scatter variable shadows a call input");
                }
                self.ports.insert(variable.into(), port);
                self.features.scatter = true;
            }
            (Some(variable), None) => {
                warn!(call = %call.call_id, variable, "scatter has no collection, the port is left unsourced");
                if !self.ports.contains_key(variable) {
                    self.ports.insert(variable.into(), YamlValue::Mapping(Mapping::new()));
                }
                self.features.scatter = true;
            }
            _ => {}
        }

        let when = call.conditional.as_deref().map(|c| self.general_expression(c));

        step.insert("in".into(), YamlValue::Mapping(std::mem::take(&mut self.ports)));
        let out: Vec<YamlValue> = self.outputs(task).into_iter().map(YamlValue::from).collect();
        step.insert("out".into(), YamlValue::Sequence(out));
        if let Some(variable) = scatter {
            step.insert("scatter".into(), variable.into());
            step.insert("scatterMethod".into(), "dotproduct".into());
        }
        if let Some(when) = when {
            step.insert("when".into(), when.into());
        }
        Ok(step)
    }

    /// Output names of the task, or the ones read elsewhere for external tasks.
    fn outputs(&self, task: Option<&Task>) -> Vec<String> {
        if let Some(task) = task {
            return task.outputs.iter().map(|o| o.name.clone()).collect();
        }
        let id = self.call.call_id.as_str();
        let mut names: Vec<String> = Vec::new();
        let mut add = |refs: Vec<(String, String)>| {
            for (call, output) in refs {
                if call == id && !names.contains(&output) {
                    names.push(output);
                }
            }
        };
        for call in &self.workflow.calls {
            add(call.references());
        }
        for output in &self.workflow.outputs {
            if let Some(expression) = &output.expression {
                add(dotted_references(expression));
            }
        }
        names
    }

    /// A port feeding a step expression; reuses a port with the same source.
    fn port_for(&mut self, name: &str, source: &str) -> String {
        let mut candidate = name.to_string();
        let mut n = 1;
        loop {
            match self.ports.get(candidate.as_str()) {
                None => {
                    self.ports.insert(candidate.as_str().into(), source.into());
                    return candidate;
                }
                Some(existing) if existing.as_str() == Some(source) => return candidate,
                Some(_) => {
                    n += 1;
                    candidate = format!("{}_{}", name, n);
                }
            }
        }
    }

    /// Port reading a call output named in an expression.
    fn resolve_output(&mut self, call: &str, output: &str) -> Option<String> {
        if !self.call_ids.contains(call) {
            return None;
        }
        Some(self.port_for(&format!("{}_{}", call, output), &format!("{}/{}", call, output)))
    }

    /// Port reading a workflow value named in an expression.
    fn resolve(&mut self, name: &str) -> Option<String> {
        if self.call.scatter.as_deref() == Some(name) {
            return Some(name.to_string());
        }
        if self.workflow.input(name).is_some() {
            return Some(self.port_for(name, name));
        }
        None
    }

    /// A call input expression: interpolated strings stay strings.
    fn expression(&mut self, text: &str) -> String {
        let Some(inner) = unquote(text.trim()) else {
            return self.general_expression(text);
        };
        let mut out = String::new();
        let mut last = 0;
        for caps in INTERPOLATION.captures_iter(inner) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&escape(&inner[last..whole.start()]));
            match self.resolve(name.as_str()) {
                Some(port) => out.push_str(&format!("$(inputs.{})", port)),
                None => {
                    warn!(call = %self.call.call_id, name = name.as_str(), "placeholder names no workflow value");
                    out.push_str(&escape(whole.as_str()));
                }
            }
            last = whole.end();
        }
        out.push_str(&escape(&inner[last..]));
        if out.contains("~{") {
            warn!(call = %self.call.call_id, "placeholder expression passed through untranslated");
        }
        out
    }

    /// `$(...)` over step ports, with names rewritten to `inputs.<port>`.
    fn general_expression(&mut self, text: &str) -> String {
        self.features.javascript = true;
        let mut rewritten = String::with_capacity(text.len());
        let mut last = 0;
        let tokens: Vec<(usize, usize, Option<String>, Option<String>)> = EXPRESSION_TOKEN
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((
                    whole.start(),
                    whole.end(),
                    caps.get(1).map(|m| m.as_str().to_string()),
                    caps.get(2).map(|m| m.as_str().to_string()),
                ))
            })
            .collect();
        for (start, end, name, member) in tokens {
            let Some(name) = name else { continue };
            // members of a longer path such as `a.b.c`
            if text[..start].ends_with('.') {
                continue;
            }
            let (port, consumed) = match member.as_deref().and_then(|m| self.resolve_output(&name, m)) {
                Some(port) => (port, end),
                None => match self.resolve(&name) {
                    Some(port) => (port, start + name.len()),
                    None => continue,
                },
            };
            rewritten.push_str(&text[last..start]);
            rewritten.push_str(&format!("inputs.{}", port));
            last = consumed;
        }
        rewritten.push_str(&text[last..]);
        format!("$({})", rewritten.trim())
    }
}

fn value_from(expression: String) -> YamlValue {
    let mut port = Mapping::new();
    port.insert("valueFrom".into(), expression.into());
    YamlValue::Mapping(port)
}
