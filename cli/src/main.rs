use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Once};

static PERF_TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str =
    "xvm::vm::guard=debug,xvm::vm::call=debug,xvm::vm::slowpath=debug,xvm_core=info,xvm_cli=info";

use anyhow::Context;
use clap::{Parser, Subcommand};
use xvm_core::{
    val::Value,
    vm::{Completion, ModuleMeta, Program, Vm, VmConfig, encode_module},
};


#[derive(Debug, Parser)]
#[command(
    name = "xvm",
    author,
    version,
    about = "CLI for the XVM register machine",
    long_about = None,
    arg_required_else_help = true
)]
struct CliArgs {
    /// Subcommands like `run FILE`
    #[command(subcommand)]
    command: Option<Commands>,

    /// If no subcommand, treat as a program to execute
    #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Verify a JSON program and encode it as an `.xvmb` module.
    Build {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Output path (defaults to FILE with an `.xvmb` extension)
        #[arg(short, long, value_parser = parse_sanitized_path)]
        output: Option<PathBuf>,
    },
    /// Execute a program (`.xvmb` or JSON source).
    Run {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Function to call instead of the program's entry
        #[arg(long)]
        entry: Option<String>,
        /// VM settings as TOML
        #[arg(long, value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
        /// Arguments passed to the entry function
        #[arg(value_name = "ARGS", allow_negative_numbers = true)]
        args: Vec<String>,
    },
    /// Print each function's ops with addresses and scope depths.
    Dis {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
    /// Run the layout pass and report register usage.
    Check {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_perf_tracing() {
    let raw = match std::env::var("XVM_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    PERF_TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

/// Command line arguments become ints, booleans or null when they parse as
/// such, strings otherwise.
pub(crate) fn parse_value(raw: &str) -> Value {
    match raw {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::str(raw),
        },
    }
}

fn load_program(path: &Path) -> anyhow::Result<Arc<Program>> {
    let program = Program::load(path)?;
    tracing::info!(target: "xvm_cli", path = %path.display(), functions = program.functions().len(), "loaded program");
    Ok(Arc::new(program))
}

fn run_build(file: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    let program = load_program(file)?;
    let meta = ModuleMeta {
        source: Some(file.to_string_lossy().to_string()),
        ..Default::default()
    };
    let bytes = encode_module(&program.to_module(Some(meta)))?;
    let out = output.unwrap_or_else(|| file.with_extension("xvmb"));
    std::fs::write(&out, &bytes).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {} ({} bytes)", out.display(), bytes.len());
    Ok(())
}

fn run_program(file: &Path, entry: Option<&str>, config: Option<&Path>, args: &[String]) -> anyhow::Result<()> {
    let program = load_program(file)?;
    let config = match config {
        Some(path) => VmConfig::load(path)?,
        None => VmConfig::default(),
    };
    let args = args.iter().map(|raw| parse_value(raw)).collect();
    let mut vm = Vm::with_config(config);
    let completion = match entry {
        Some(name) => vm.exec_named(&program, name, args)?,
        None => vm.exec(&program, args)?,
    };
    match completion {
        Completion::Returned(values) => {
            for value in values {
                println!("{value}");
            }
            Ok(())
        }
        Completion::Threw(exc) => {
            eprintln!("Unhandled exception: {exc}");
            std::process::exit(1);
        }
    }
}

pub(crate) fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    for (id, func) in program.functions().iter().enumerate() {
        let layout = func.layout();
        out.push_str(&format!(
            "fn #{id} {}({}) registers={}\n",
            func.name(),
            func.params(),
            layout.max_vars()
        ));
        for (pc, op) in func.code().iter().enumerate() {
            let depth = layout.depth_at(pc).unwrap_or_default();
            out.push_str(&format!("{pc:>5} [{depth}] {op:?}\n"));
        }
    }
    out
}

fn run_check(file: &Path) -> anyhow::Result<()> {
    let program = load_program(file)?;
    for func in program.functions() {
        println!(
            "{}: params={} registers={} ops={}",
            func.name(),
            func.params(),
            func.layout().max_vars(),
            func.code().len()
        );
    }
    println!("ok");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    maybe_init_perf_tracing();

    let CliArgs { command, file } = CliArgs::parse();

    match (command, file) {
        (Some(Commands::Build { file, output }), _) => run_build(&file, output),
        (
            Some(Commands::Run {
                file,
                entry,
                config,
                args,
            }),
            _,
        ) => run_program(&file, entry.as_deref(), config.as_deref(), &args),
        (Some(Commands::Dis { file }), _) => {
            let program = load_program(&file)?;
            print!("{}", disassemble(&program));
            Ok(())
        }
        (Some(Commands::Check { file }), _) => run_check(&file),
        (None, Some(file)) => run_program(&file, None, None, &[]),
        (None, None) => anyhow::bail!("no program given; see `xvm --help`"),
    }
}
