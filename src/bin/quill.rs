use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use quill::{ExecutionResult, InterpreterConfig, QuillError, Repl, Runtime};

#[derive(Parser)]
#[command(author, version, about = "Quill scripting language interpreter")]
struct Args {
    #[command(flatten)]
    limits: Limits,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(ClapArgs)]
struct Limits {
    /// Maximum closure call depth before the run is aborted
    #[arg(long, global = true, default_value_t = InterpreterConfig::default().max_call_depth)]
    max_call_depth: usize,
    /// Maximum bytes a program may print
    #[arg(long, global = true)]
    max_output_bytes: Option<usize>,
    /// Print the final program value after its output
    #[arg(long, global = true)]
    echo_result: bool,
}

impl Limits {
    fn config(&self) -> InterpreterConfig {
        InterpreterConfig {
            max_call_depth: self.max_call_depth,
            max_output_bytes: self.max_output_bytes,
            echo_result: self.echo_result,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run a Quill script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of Quill code
    Eval { source: String },
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    let config = args.limits.config();
    let outcome = match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => run_script(script, config),
        Command::Eval { source } => Ok(report(Runtime::with_config(config).execute(&source))),
        Command::Repl => Repl::new(config).run().map(|()| ExitCode::SUCCESS),
    };
    outcome.unwrap_or_else(|err| {
        eprintln!("error: {err}");
        ExitCode::FAILURE
    })
}

fn run_script(path: PathBuf, config: InterpreterConfig) -> Result<ExitCode, QuillError> {
    let source = fs::read_to_string(&path)?;
    Ok(report(Runtime::with_config(config).execute(&source)))
}

fn report(result: ExecutionResult) -> ExitCode {
    match result {
        ExecutionResult::Success { text } => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        ExecutionResult::LanguageError { text } => {
            eprintln!("{text}");
            ExitCode::from(1)
        }
        ExecutionResult::Fault { reason } => {
            eprintln!("fault: {reason}");
            ExitCode::from(2)
        }
    }
}

/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}
