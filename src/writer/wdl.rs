//! WDL renderer
//!
//! Output is WDL 1.0 style: `input {}` sections, `command <<< >>>` heredocs
//! and `~{}` placeholders. Consecutive calls that share a scatter and a
//! condition are written inside one `scatter`/`if` block, with the condition
//! outermost.

use super::Write;
use crate::error::Result;
use crate::ir::io::{quote, unquote};
use crate::ir::{parse_size_mb, Binding, Input, Output, Runtime, Task, Workflow, WorkflowCall, WorkflowKind};
use serde_json::Value as JsonValue;
use tracing::warn;

const INDENT: &str = "    ";

/// Renders the IR as WDL source.
#[derive(Debug, Clone)]
pub struct WdlWriter {
    version: String,
}

impl Default for WdlWriter {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
        }
    }
}

/// Line buffer with an indentation level.
struct Emitter {
    out: String,
    depth: usize,
}

impl Emitter {
    fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
        }
    }

    fn line(&mut self, text: &str) {
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn open(&mut self, header: &str) {
        self.line(&format!("{} {{", header));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    fn finish(self) -> String {
        self.out
    }
}

impl WdlWriter {
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

    fn header(&self, out: &mut Emitter) {
        out.line(&format!("version {}", self.version));
    }

    fn task(&self, out: &mut Emitter, task: &Task) {
        out.open(&format!("task {}", task.name));

        if let Some(description) = &task.description {
            out.open("meta");
            out.line(&format!("description: {}", quote(description)));
            out.close();
            out.blank();
        }

        if !task.inputs.is_empty() {
            inputs(out, &task.inputs);
            out.blank();
        }

        out.line("command <<<");
        out.depth += 1;
        for line in task.command.lines() {
            out.line(line);
        }
        out.depth -= 1;
        out.line(">>>");

        if let Some(runtime) = task.runtime.as_ref().filter(|r| !r.is_empty()) {
            out.blank();
            self.runtime(out, runtime);
        }

        if !task.outputs.is_empty() {
            out.blank();
            outputs(out, &task.outputs);
        }

        parameter_meta(out, &task.inputs, &task.outputs);
        out.close();
    }

    fn runtime(&self, out: &mut Emitter, runtime: &Runtime) {
        out.open("runtime");
        if let Some(docker) = &runtime.docker {
            out.line(&format!("docker: {}", quote(docker)));
        }
        if let Some(cpu) = runtime.cpu {
            out.line(&format!("cpu: {}", cpu));
        }
        if let Some(memory) = &runtime.memory {
            out.line(&format!("memory: {}", quote(memory)));
        }
        if let Some(disk) = &runtime.disk {
            out.line(&format!("disks: {}", quote(&disks(disk))));
        }
        if let Some(retries) = runtime.max_retries {
            out.line(&format!("maxRetries: {}", retries));
        }
        if let Some(preemptible) = runtime.preemptible {
            out.line(&format!("preemptible: {}", preemptible));
        }
        if let Some(gpu) = runtime.gpu {
            out.line(&format!("gpu: {}", gpu));
        }
        if !runtime.zones.is_empty() {
            out.line(&format!("zones: {}", quote(&runtime.zones.join(" "))));
        }
        if let Some(continue_on) = runtime.continue_on_return_code {
            out.line(&format!("continueOnReturnCode: {}", continue_on));
        }
        for (key, value) in &runtime.custom_attributes {
            out.line(&format!("{}: {}", key, attribute_value(value)));
        }
        out.close();
    }

    fn workflow(&self, out: &mut Emitter, workflow: &Workflow) {
        out.open(&format!("workflow {}", workflow.name));

        if let Some(description) = &workflow.description {
            out.open("meta");
            out.line(&format!("description: {}", quote(description)));
            out.close();
            out.blank();
        }

        if !workflow.inputs.is_empty() {
            inputs(out, &workflow.inputs);
            out.blank();
        }

        let mut calls = workflow.calls.iter().peekable();
        while let Some(first) = calls.next() {
            let mut group = vec![first];
            while let Some(next) = calls.next_if(|c| same_block(first, c)) {
                group.push(next);
            }

            let mut opened = 0;
            if let Some(condition) = &first.conditional {
                out.open(&format!("if ({})", condition));
                opened += 1;
            }
            if let Some(variable) = &first.scatter {
                let items = match &first.scatter_items {
                    Some(items) => items.as_str(),
                    None => {
                        warn!(call = %first.call_id, variable = %variable, "scatter has no collection, using the variable");
                        variable.as_str()
                    }
                };
                out.open(&format!("scatter ({} in {})", variable, items));
                opened += 1;
            }
            for (i, call) in group.iter().enumerate() {
                if i > 0 {
                    out.blank();
                }
                self.call(out, call);
            }
            for _ in 0..opened {
                out.close();
            }
            out.blank();
        }

        if !workflow.outputs.is_empty() {
            outputs(out, &workflow.outputs);
        }
        parameter_meta(out, &workflow.inputs, &workflow.outputs);
        out.close();
    }

    fn call(&self, out: &mut Emitter, call: &WorkflowCall) {
        let default_id = call.task_name.rsplit('.').next().unwrap_or(&call.task_name);
        let header = if call.call_id == default_id {
            format!("call {}", call.task_name)
        } else {
            format!("call {} as {}", call.task_name, call.call_id)
        };
        if call.inputs.is_empty() {
            out.line(&header);
            return;
        }
        out.open(&header);
        out.line("input:");
        out.depth += 1;
        let last = call.inputs.len() - 1;
        for (i, (name, binding)) in call.inputs.iter().enumerate() {
            let separator = if i < last { "," } else { "" };
            out.line(&format!("{} = {}{}", name, binding.to_wdl(), separator));
        }
        out.depth -= 1;
        out.close();
    }
}

impl Write for WdlWriter {
    fn write_workflow(&self, workflow: &Workflow) -> Result<String> {
        let mut out = Emitter::new();
        self.header(&mut out);

        if !workflow.imports.is_empty() {
            out.blank();
            for import in &workflow.imports {
                match &import.alias {
                    Some(alias) => out.line(&format!("import {} as {}", quote(&import.uri), alias)),
                    None => out.line(&format!("import {}", quote(&import.uri))),
                }
            }
        }

        for task in workflow.tasks.values() {
            out.blank();
            self.task(&mut out, task);
        }

        if workflow.kind != WorkflowKind::Task {
            out.blank();
            self.workflow(&mut out, workflow);
        }
        Ok(out.finish())
    }

    fn write_task(&self, task: &Task) -> Result<String> {
        let mut out = Emitter::new();
        self.header(&mut out);
        out.blank();
        self.task(&mut out, task);
        Ok(out.finish())
    }
}

fn same_block(a: &WorkflowCall, b: &WorkflowCall) -> bool {
    a.scatter == b.scatter && a.scatter_items == b.scatter_items && a.conditional == b.conditional
}

fn inputs(out: &mut Emitter, inputs: &[Input]) {
    out.open("input");
    for input in inputs {
        let type_spec = if input.optional {
            input.type_spec.clone().with_optional(true)
        } else {
            input.type_spec.clone()
        };
        match &input.default {
            Some(default) => out.line(&format!("{} {} = {}", type_spec, input.name, default.to_wdl())),
            None => out.line(&format!("{} {}", type_spec, input.name)),
        }
    }
    out.close();
}

fn outputs(out: &mut Emitter, outputs: &[Output]) {
    out.open("output");
    for output in outputs {
        match &output.expression {
            Some(expression) => out.line(&format!("{} {} = {}", output.type_spec, output.name, expression)),
            None => out.line(&format!("{} {}", output.type_spec, output.name)),
        }
    }
    out.close();
}

fn parameter_meta(out: &mut Emitter, inputs: &[Input], outputs: &[Output]) {
    let described: Vec<(&str, &str)> = inputs
        .iter()
        .filter_map(|i| i.description.as_deref().map(|d| (i.name.as_str(), d)))
        .chain(
            outputs
                .iter()
                .filter_map(|o| o.description.as_deref().map(|d| (o.name.as_str(), d))),
        )
        .collect();
    if described.is_empty() {
        return;
    }
    out.blank();
    out.open("parameter_meta");
    for (name, description) in described {
        out.line(&format!("{}: {}", name, quote(description)));
    }
    out.close();
}

/// Sizes that parse are written as whole GB on a local disk.
fn disks(disk: &str) -> String {
    match parse_size_mb(disk) {
        Some(mb) => format!("local-disk {} HDD", ((mb + 1023) / 1024).max(1)),
        None => disk.to_string(),
    }
}

/// Strings already holding quoted WDL text are written as they are.
fn attribute_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) if unquote(s).is_some() => s.clone(),
        other => Binding::Literal(other.clone()).to_wdl(),
    }
}
