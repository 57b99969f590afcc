//! flowconv CLI
//!
//! Command-line interface for converting workflows between WDL and CWL.

use clap::{Args, Parser, Subcommand};
use flowconv::config::{config_file_path, load_config, Config};
use flowconv::converter::{validate_conversion, Converter, Direction};
use flowconv::ir::{Level, Validator, Workflow};
use flowconv::ConvertError;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flowconv", about = "Convert workflows between WDL and CWL", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Enable debug output.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Settings file (default: ~/.flowconv.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one file.
    Convert {
        src: PathBuf,
        /// Output path (default: next to the source with the target extension).
        dst: Option<PathBuf>,
        /// Check the converted document's structure.
        #[arg(long)]
        validate: bool,
        /// Convert CWL to WDL.
        #[arg(long)]
        reverse: bool,
    },

    /// Convert every file of a directory tree.
    ConvertDir {
        src_dir: PathBuf,
        dst_dir: PathBuf,
        /// Descend into subdirectories.
        #[arg(long, conflicts_with = "no_recursive")]
        recursive: bool,
        /// Only convert files directly inside the source directory.
        #[arg(long)]
        no_recursive: bool,
        /// Convert CWL to WDL.
        #[arg(long)]
        reverse: bool,
    },

    /// Print the structure of a workflow file.
    Parse { src: PathBuf },

    /// Report validation findings for a workflow file.
    Validate { src: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("flowconv=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowconv=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings(path: Option<&Path>) -> Result<Config, ConvertError> {
    match path.map(Path::to_path_buf).or_else(config_file_path) {
        Some(path) => load_config(&path),
        None => {
            let config = Config::default().with_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

/// `--reverse` flips the configured direction; otherwise a `.cwl` or `.wdl`
/// source decides.
fn direction_for(config: &Config, src: &Path, reverse: bool) -> Direction {
    if reverse {
        config.default_direction.reverse()
    } else {
        Direction::from_path(src).unwrap_or(config.default_direction)
    }
}

fn run(cli: Cli) -> Result<(), ConvertError> {
    let config = settings(cli.global.config.as_deref())?;

    match cli.command {
        Command::Convert {
            src,
            dst,
            validate,
            reverse,
        } => {
            let converter = Converter::from_config(&config, direction_for(&config, &src, reverse));
            let workflow = converter.convert_file(&src, dst.as_deref())?;
            if validate && !validate_conversion(&workflow) {
                return Err(ConvertError::Validation {
                    message: format!("{} did not pass validation", src.display()),
                });
            }
            Ok(())
        }
        Command::ConvertDir {
            src_dir,
            dst_dir,
            recursive,
            no_recursive,
            reverse,
        } => {
            let direction = if reverse {
                config.default_direction.reverse()
            } else {
                config.default_direction
            };
            let recursive = if no_recursive {
                false
            } else {
                recursive || config.recursive
            };
            let converter = Converter::from_config(&config, direction);
            let report = converter.convert_directory(&src_dir, &dst_dir, recursive)?;
            println!(
                "Converted {} of {} files",
                report.converted.len(),
                report.total()
            );
            for failure in &report.failed {
                println!("  failed: {}: {}", failure.path.display(), failure.error);
            }
            if report.is_success() {
                Ok(())
            } else {
                Err(ConvertError::Validation {
                    message: format!("{} files failed to convert", report.failed.len()),
                })
            }
        }
        Command::Parse { src } => {
            let workflow = parse(&config, &src)?;
            print_summary(&workflow);
            Ok(())
        }
        Command::Validate { src } => {
            let workflow = parse(&config, &src)?;
            let report = Validator::new().validate_workflow(&workflow);
            if report.is_empty() {
                println!("No findings");
            }
            for finding in &report.findings {
                println!("{}", finding);
            }
            let errors = report.with_level(Level::Error).count();
            if errors > 0 {
                return Err(ConvertError::Validation {
                    message: format!("{} errors in {}", errors, src.display()),
                });
            }
            Ok(())
        }
    }
}

fn parse(config: &Config, src: &Path) -> Result<Workflow, ConvertError> {
    let source = std::fs::read_to_string(src).map_err(|e| ConvertError::io(src, e))?;
    let name = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Converter::from_config(config, direction_for(config, src, false)).parse_str(&source, &name)
}

fn print_summary(workflow: &Workflow) {
    println!("Name: {}", workflow.name);
    if let Some(version) = &workflow.version {
        println!("Version: {}", version);
    }
    println!("Inputs:");
    for input in &workflow.inputs {
        println!("  {}: {}", input.name, input.type_spec);
    }
    println!("Tasks:");
    for task in workflow.tasks.values() {
        println!("  {} ({} inputs, {} outputs)", task.name, task.inputs.len(), task.outputs.len());
    }
    println!("Calls:");
    for call in &workflow.calls {
        let mut line = format!("  {} -> {}", call.call_id, call.task_name);
        if let (Some(variable), Some(items)) = (&call.scatter, &call.scatter_items) {
            line.push_str(&format!(" [scatter {} in {}]", variable, items));
        }
        if let Some(condition) = &call.conditional {
            line.push_str(&format!(" [if {}]", condition));
        }
        println!("{}", line);
    }
    println!("Outputs:");
    for output in &workflow.outputs {
        println!("  {}: {}", output.name, output.type_spec);
    }
}
