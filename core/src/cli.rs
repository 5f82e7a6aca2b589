use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyzer::analyze_method;
use crate::asm::{assemble, disassemble};
use crate::bytecode::{MethodId, Program};
use crate::config::Config;
use crate::frame::Frame;
use crate::instrument::{instrument_program, MethodReport};
use crate::runtime::Dispatcher;
use crate::specs::SpecTable;
use crate::vm::{Console, Vm};

#[derive(Parser)]
#[command(name = "corofy")]
#[command(about = "corofy - stackful coroutines for stack-machine bytecode", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Restore-point tables (TOML or JSON) merged with the program's own declarations
    #[arg(long = "specs", global = true)]
    pub specs: Vec<PathBuf>,

    /// Log filter (overrides config file and env vars)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze every method that declares restore points
    Analyze {
        /// Program to analyze (.jasm, or .json)
        file: PathBuf,

        /// Print the frame before every instruction
        #[arg(long)]
        frames: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a program and print (or write) the result
    Instrument {
        /// Program to instrument (.jasm, or .json)
        file: PathBuf,

        /// Output file; `.json` writes the program model, anything else assembly text
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Instrument a program and drive one coroutine to completion
    Run {
        /// Program to run (.jasm, or .json)
        file: PathBuf,

        /// Entry method, `Owner.name` or `Owner.name(desc)`
        #[arg(long)]
        entry: String,

        /// Run the program as written
        #[arg(long)]
        no_instrument: bool,

        /// Stop after this many resumes (default: 100)
        #[arg(long, default_value = "100")]
        max_resumes: usize,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with explicit arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load and validate configuration before executing any command
    let config = Config::builder()
        .config_path(cli.config.clone())
        .log_filter(cli.log.clone())
        .build()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    match cli.command {
        Commands::Analyze { file, frames, json } => {
            let (program, specs) = load(&file, &config, &cli.specs)?;
            analyze(&program, &specs, frames, json)
        }

        Commands::Instrument { file, output, json } => {
            let (program, specs) = load(&file, &config, &cli.specs)?;
            let (rewritten, report) =
                instrument_program(&program, &specs, &config.instrument_options())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for class in &report.classes {
                    match &class.error {
                        Some(error) => eprintln!("{}: skipped ({})", class.name, error),
                        None if class.modified => eprintln!("{}: rewritten", class.name),
                        None => {}
                    }
                }
            }

            match output {
                Some(path) => {
                    write_program(&path, &rewritten, &specs)?;
                    eprintln!("Wrote {}", path.display());
                }
                None if !json => print!("{}", disassemble(&rewritten, &specs)),
                None => {}
            }
            Ok(())
        }

        Commands::Run {
            file,
            entry,
            no_instrument,
            max_resumes,
        } => {
            let (program, specs) = load(&file, &config, &cli.specs)?;
            let program = if no_instrument {
                program
            } else {
                instrument_program(&program, &specs, &config.instrument_options())?.0
            };
            let entry = resolve_entry(&program, &entry)?;
            run(program, &entry, config.runtime.echo_console, max_resumes).await
        }
    }
}

/* ===================== Loading ===================== */

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Program plus the merged restore-point table: configured entry names and spec files,
/// the program's own directives, then `--specs` files.
fn load(path: &Path, config: &Config, extra_specs: &[PathBuf]) -> Result<(Program, SpecTable)> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut specs = config.spec_table()?;
    let program = if is_json(path) {
        serde_json::from_str(&source)
            .with_context(|| format!("Invalid program model in {}", path.display()))?
    } else {
        let assembly =
            assemble(&source).map_err(|e| anyhow!("{}:{}", path.display(), e))?;
        specs.methods.extend(assembly.specs.methods);
        assembly.program
    };
    for extra in extra_specs {
        specs.extend(SpecTable::load(extra)?);
    }
    Ok((program, specs))
}

fn write_program(path: &Path, program: &Program, specs: &SpecTable) -> Result<()> {
    let text = if is_json(path) {
        serde_json::to_string_pretty(program)?
    } else {
        disassemble(program, specs)
    };
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/* ===================== Analyze ===================== */

#[derive(Serialize)]
struct AnalyzeOutput {
    #[serde(flatten)]
    report: MethodReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<Vec<Option<Frame>>>,
}

fn analyze(program: &Program, specs: &SpecTable, frames: bool, json: bool) -> Result<()> {
    let mut outputs = Vec::new();
    let mut failures = 0;

    for (id, method) in program.methods() {
        match analyze_method(&id.owner, method, specs, program) {
            Ok(Some(analysis)) => {
                if !json {
                    print_analysis(&analysis.method, &MethodReport::from(&analysis));
                    if frames {
                        for (index, (insn, frame)) in
                            analysis.insns.iter().zip(&analysis.frames).enumerate()
                        {
                            println!("  {:>4}  {:<48} {}", index, insn.to_string(), render(frame));
                        }
                    }
                }
                outputs.push(AnalyzeOutput {
                    report: MethodReport::from(&analysis),
                    frames: frames.then(|| analysis.frames.clone()),
                });
            }
            Ok(None) => {}
            Err(e) => {
                failures += 1;
                eprintln!("{}", e);
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    }
    if failures > 0 {
        bail!("{} method(s) failed analysis", failures);
    }
    Ok(())
}

fn print_analysis(id: &MethodId, report: &MethodReport) {
    let entry = if report.root_entry { " (entry)" } else { "" };
    println!("{}{}: {} restore point call(s)", id, entry, report.restore_point_calls);
    for callee in &report.restore_points {
        let marker = if report.unpatchable.contains(callee) {
            " [unpatchable]"
        } else {
            ""
        };
        println!("  -> {}{}", callee, marker);
    }
}

fn render(frame: &Option<Frame>) -> String {
    let Some(frame) = frame else {
        return "unreachable".to_string();
    };
    let join = |values: &[crate::frame::ValueCategory]| {
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("locals=[{}] stack=[{}]", join(&frame.locals), join(&frame.stack))
}

/* ===================== Run ===================== */

/// Resolve `Owner.name(desc)`, or `Owner.name` when the class has exactly one
/// argument-less method of that name.
fn resolve_entry(program: &Program, text: &str) -> Result<MethodId> {
    if let Some(id) = MethodId::parse(text) {
        return Ok(id);
    }
    let (owner, name) = text
        .rsplit_once('.')
        .ok_or_else(|| anyhow!("Entry must be Owner.name, got {:?}", text))?;
    let class = program
        .class(owner)
        .ok_or_else(|| anyhow!("No class {}", owner))?;
    let mut candidates = class
        .methods
        .iter()
        .filter(|m| m.name == name && m.desc.starts_with("()"));
    match (candidates.next(), candidates.next()) {
        (Some(method), None) => Ok(method.id(owner)),
        (None, _) => bail!("No argument-less method {} in {}", name, owner),
        (Some(_), Some(_)) => bail!("Entry {} is ambiguous; give a descriptor", text),
    }
}

async fn run(program: Program, entry: &MethodId, echo: bool, max_resumes: usize) -> Result<()> {
    let console = if echo {
        Console::echoing()
    } else {
        Console::default()
    };
    let vm = Vm::builder(program).console(console).build();
    let coro = vm.spawn(entry).map_err(|t| t.into_error())?;
    let dispatcher = Dispatcher::current();

    let mut resumes = 0;
    while !coro.is_done() {
        if resumes > max_resumes {
            warn!(coro = coro.id(), resumes, "giving up on suspended coroutine");
            break;
        }
        dispatcher
            .resume(coro.clone())
            .await
            .map_err(|t| t.into_error())?;
        resumes += 1;
    }

    if !echo {
        for line in vm.console().lines() {
            println!("{}", line);
        }
    }
    info!(entry = %entry, resumes, done = coro.is_done(), "run finished");
    Ok(())
}
