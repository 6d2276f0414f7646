use std::{fs, path::PathBuf, process::ExitCode, time::Duration};

use clap::{Args, Parser, Subcommand};

use hoot::{
    runtime::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_REQUEST_TIMEOUT},
    ClockMode, ExecutionContext, HootError, Interpreter, Repl,
};

#[derive(Parser)]
#[command(author, version, about = "Hoot language interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    options: RunOptions,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Hoot script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of Hoot code
    Eval { source: String },
}

#[derive(Args)]
struct RunOptions {
    /// Fire timers immediately on a virtual clock instead of waiting
    #[arg(long, global = true, env = "HOOT_VIRTUAL_TIME")]
    virtual_time: bool,
    /// Timeout applied to each `request`, in milliseconds
    #[arg(long, global = true, env = "HOOT_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,
    /// Maximum nesting of function calls before a stack overflow error
    #[arg(long, global = true, env = "HOOT_MAX_CALL_DEPTH")]
    max_call_depth: Option<usize>,
}

impl RunOptions {
    fn context(&self, script_name: Option<String>) -> ExecutionContext {
        ExecutionContext {
            script_name,
            clock: if self.virtual_time {
                ClockMode::Virtual
            } else {
                ClockMode::Real
            },
            request_timeout: self
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_call_depth: self.max_call_depth.unwrap_or(DEFAULT_MAX_CALL_DEPTH),
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let outcome = match cli.command.unwrap_or(Command::Repl) {
        Command::Run { script } => run_script(script, &cli.options),
        Command::Eval { source } => {
            let mut interpreter = Interpreter::with_context(cli.options.context(None));
            interpreter.eval_source(&source)
        }
        Command::Repl => Repl::with_context(cli.options.context(None)).run(),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Runtime errors are printed by the interpreter as they happen.
            if !matches!(err, HootError::Runtime(_)) {
                eprintln!("{err}");
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run_script(path: PathBuf, options: &RunOptions) -> Result<(), HootError> {
    let source = fs::read_to_string(&path)?;
    let context = options.context(Some(path.display().to_string()));
    let mut interpreter = Interpreter::with_context(context);
    interpreter.eval_source(&source)
}

/// Logs to stderr when `HOOT_LOG` (or `RUST_LOG`) is set.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_env("HOOT_LOG").or_else(|_| EnvFilter::try_from_default_env());
    if let Ok(filter) = filter {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .init();
    }
}
