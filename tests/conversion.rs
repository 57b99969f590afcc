use flowconv::converter::{validate_conversion, Converter, Direction};
use flowconv::ir::{Binding, Level, Task, Validator, Workflow, WorkflowCall};
use flowconv::parser::{CwlParser, Parse, WdlParser};
use flowconv::types::{DataType, TypeSpec};
use flowconv::writer::{CwlWriter, WdlWriter, Write};
use serde_yaml::Value as YamlValue;
use std::error::Error;
use std::fs;
use tempfile::TempDir;

const HELLO: &str = r#"
version 1.0

task hello {
    input {
        String name
        File input_file
    }

    command <<<
        echo "Hello, ~{name}!"
        cat ~{input_file}
    >>>

    output {
        File greeting = stdout()
    }

    runtime {
        docker: "ubuntu:20.04"
        memory: "2G"
        cpu: 1
    }
}
"#;

const SCATTER: &str = r#"
version 1.0

task process_file {
    input {
        File input_file
    }
    command <<<
        process ~{input_file} > output.txt
    >>>
    output {
        File processed = "output.txt"
    }
}

workflow scatter_workflow {
    input {
        Array[File] files
    }
    scatter (file in files) {
        call process_file {
            input:
                input_file = file
        }
    }
    output {
        Array[File] results = process_file.processed
    }
}
"#;

fn requirement<'a>(tool: &'a YamlValue, class: &str) -> Option<&'a YamlValue> {
    tool["requirements"]
        .as_sequence()?
        .iter()
        .find(|r| r["class"].as_str() == Some(class))
}

#[test]
fn hello_task_converts_to_command_line_tool() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let src = temp_dir.path().join("hello.wdl");
    fs::write(&src, HELLO)?;

    let workflow = Converter::new(Direction::WdlToCwl).convert_file(&src, None)?;
    assert!(validate_conversion(&workflow));

    let text = fs::read_to_string(temp_dir.path().join("hello.cwl"))?;
    let tool: YamlValue = serde_yaml::from_str(&text)?;
    assert_eq!(tool["cwlVersion"].as_str(), Some("v1.2"));
    assert_eq!(tool["class"].as_str(), Some("CommandLineTool"));
    assert_eq!(
        requirement(&tool, "DockerRequirement").and_then(|r| r["dockerPull"].as_str()),
        Some("ubuntu:20.04")
    );
    let resources = requirement(&tool, "ResourceRequirement").ok_or("no ResourceRequirement")?;
    assert_eq!(resources["coresMin"].as_u64(), Some(1));
    assert_eq!(resources["ramMin"].as_u64(), Some(2048));
    Ok(())
}

#[test]
fn docker_survives_wdl_to_cwl_to_ir() -> Result<(), Box<dyn Error>> {
    let cwl = Converter::new(Direction::WdlToCwl).convert_str(HELLO)?;
    let workflow = CwlParser::new().parse(&cwl)?;
    let task = workflow.single_task().ok_or("expected a single task")?;
    let runtime = task.runtime.as_ref().ok_or("runtime lost")?;
    assert_eq!(runtime.docker.as_deref(), Some("ubuntu:20.04"));
    assert_eq!(runtime.cpu, Some(1));
    assert_eq!(runtime.memory_mb()?, Some(2048));
    assert_eq!(task.input("input_file").map(|i| &i.type_spec), Some(&TypeSpec::file()));
    Ok(())
}

#[test]
fn written_wdl_reparses_to_the_same_task() -> Result<(), Box<dyn Error>> {
    let original = WdlParser::new().parse(HELLO)?;
    let written = WdlWriter::new().write_workflow(&original)?;
    let reparsed = WdlParser::new().parse(&written)?;

    let (before, after) = (
        original.single_task().ok_or("no task")?,
        reparsed.single_task().ok_or("no task")?,
    );
    assert_eq!(before.name, after.name);
    assert_eq!(before.inputs, after.inputs);
    assert_eq!(before.outputs, after.outputs);
    let (rb, ra) = (before.runtime.as_ref(), after.runtime.as_ref());
    assert_eq!(rb.and_then(|r| r.docker.clone()), ra.and_then(|r| r.docker.clone()));
    assert_eq!(rb.and_then(|r| r.cpu), ra.and_then(|r| r.cpu));
    assert_eq!(rb.and_then(|r| r.memory.clone()), ra.and_then(|r| r.memory.clone()));
    Ok(())
}

#[test]
fn type_rendering_in_both_languages() {
    let array = TypeSpec::array(TypeSpec::file());
    let optional = TypeSpec::string().with_optional(true);

    let rendered: YamlValue = serde_yaml::from_str("{type: array, items: File}").unwrap();
    assert_eq!(array.to_cwl(), rendered);
    assert_eq!(array.to_string(), "Array[File]");

    let rendered: YamlValue = serde_yaml::from_str("['null', string]").unwrap();
    assert_eq!(optional.to_cwl(), rendered);
    assert_eq!(optional.to_string(), "String?");

    for spec in [array, optional] {
        assert_eq!(TypeSpec::from_cwl(&spec.to_cwl()).value, spec);
    }
}

#[test]
fn unknown_type_falls_back_to_string() -> Result<(), Box<dyn Error>> {
    let mut parser = WdlParser::new();
    let workflow = parser.parse(
        "version 1.0\ntask t {\n  input {\n    SampleInfo info\n  }\n  command <<<\n    true\n  >>>\n}\n",
    )?;
    let task = workflow.single_task().ok_or("no task")?;
    assert_eq!(task.inputs[0].type_spec.kind, DataType::String);
    assert_eq!(parser.fallbacks().len(), 1);
    assert_eq!(parser.fallbacks()[0].token, "SampleInfo");
    Ok(())
}

#[test]
fn scatter_is_preserved() -> Result<(), Box<dyn Error>> {
    let workflow = WdlParser::new().parse(SCATTER)?;
    let cwl = CwlWriter::new().write_workflow(&workflow)?;
    let doc: YamlValue = serde_yaml::from_str(&cwl)?;
    let main = doc["$graph"]
        .as_sequence()
        .and_then(|graph| graph.iter().find(|e| e["class"].as_str() == Some("Workflow")))
        .ok_or("no workflow in $graph")?;
    let step = &main["steps"]["process_file"];
    assert_eq!(step["scatter"].as_str(), Some("file"));
    assert_eq!(step["scatterMethod"].as_str(), Some("dotproduct"));

    let reparsed = CwlParser::new().parse(&cwl)?;
    let call = reparsed.call("process_file").ok_or("call lost")?;
    assert_eq!(call.scatter.as_deref(), Some("file"));
    assert_eq!(call.scatter_items.as_deref(), Some("files"));
    assert_eq!(call.inputs["input_file"], Binding::expression("file"));

    let wdl = WdlWriter::new().write_workflow(&reparsed)?;
    assert!(wdl.contains("scatter (file in files) {"));
    Ok(())
}

#[test]
fn directory_conversion_continues_past_failures() -> Result<(), Box<dyn Error>> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::create_dir_all(src.path().join("nested"))?;
    fs::write(src.path().join("hello.wdl"), HELLO)?;
    fs::write(src.path().join("nested/scatter.wdl"), SCATTER)?;
    fs::write(src.path().join("broken.wdl"), "workflow w {\n call a {")?;
    fs::write(src.path().join("notes.txt"), "not a workflow")?;

    let converter = Converter::new(Direction::WdlToCwl);
    let report = converter.convert_directory(src.path(), dst.path(), true)?;
    assert_eq!(report.converted.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].path.ends_with("broken.wdl"));
    assert!(!report.is_success());
    assert!(dst.path().join("hello.cwl").is_file());
    assert!(dst.path().join("nested/scatter.cwl").is_file());

    let flat = TempDir::new()?;
    let report = converter.convert_directory(src.path(), flat.path(), false)?;
    assert_eq!(report.total(), 2);
    assert!(!flat.path().join("nested").exists());
    Ok(())
}

#[test]
fn missing_source_directory_is_an_error() {
    let dst = TempDir::new().unwrap();
    let result = Converter::new(Direction::CwlToWdl).convert_directory(
        &dst.path().join("absent"),
        dst.path(),
        true,
    );
    assert!(result.is_err());
}

#[test]
fn unresolved_call_is_reported_once() {
    let mut workflow = Workflow::new("wf");
    workflow.add_call(WorkflowCall::new("step", "missing_task"));

    let report = Validator::new().validate_workflow(&workflow);
    assert_eq!(report.with_level(Level::Warning).count(), 1);
    assert!(report.is_valid());
    assert!(!validate_conversion(&workflow));
}

#[test]
fn cycles_are_detected() {
    let mut workflow = Workflow::new("cyclic");
    workflow.add_task(Task::new("t", "true"));
    workflow.add_call(WorkflowCall::new("A", "t").with_input("x", Binding::expression("B.out")));
    workflow.add_call(WorkflowCall::new("B", "t").with_input("y", Binding::expression("A.out")));

    let graph = workflow.dependency_graph();
    assert_eq!(graph.find_cycles(), vec![vec!["A".to_string(), "B".to_string()]]);
    assert_eq!(graph.topological_order(), None);

    let report = Validator::new().validate_workflow(&workflow);
    let cycles = report
        .errors()
        .filter(|f| f.message.starts_with("Circular dependency"))
        .count();
    assert_eq!(cycles, 1);
}

#[test]
fn cwl_to_wdl_file_conversion() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let cwl = temp_dir.path().join("hello.cwl");
    fs::write(&cwl, Converter::new(Direction::WdlToCwl).convert_str(HELLO)?)?;

    let dst = temp_dir.path().join("out/hello.wdl");
    let workflow = Converter::new(Direction::CwlToWdl).convert_file(&cwl, Some(&dst))?;
    assert_eq!(workflow.name, "hello");

    let wdl = fs::read_to_string(&dst)?;
    let reparsed = WdlParser::new().parse(&wdl)?;
    let task = reparsed.single_task().ok_or("no task")?;
    assert_eq!(task.name, "hello");
    assert!(task.command.contains("echo \"Hello, ~{name}!\""));
    assert!(task.command.contains("cat ~{input_file}"));
    assert_eq!(task.output("greeting").and_then(|o| o.expression.as_deref()), Some("stdout()"));
    Ok(())
}
