//! `snapmat` - materialize a columnar snapshot from a row source.
//!
//! The binary is a local, one-shot trigger: it submits one request to the
//! scheduler and waits for the resulting rebuild to finish.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use snapmat_config::{resolve_config, ConfigPaths, ResolvedConfig};
use snapmat_core::logging::{self, LogFormat};
use snapmat_core::{ExitCode, JsonLinesFactory, Scheduler, SnapshotJob};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "snapmat", version, about = "Incremental columnar snapshot materializer")]
struct Cli {
    /// Config file (.json or .toml); falls back to SNAPMAT_CONFIG, then the XDG config dir
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild the snapshot once from a JSON-lines file
    Run(RunArgs),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON-lines file with one record per line
    #[arg(long, value_name = "FILE")]
    source: PathBuf,

    /// Source tag recorded with the request
    #[arg(long, default_value = "manual")]
    tag: String,

    /// Override the configured output path
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "3600")]
    timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the resolved configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.verbose);

    let code = match &cli.command {
        Commands::Run(args) => run(cli.config.clone(), args),
        Commands::Config {
            command: ConfigCommands::Show,
        } => config_show(cli.config.clone()),
    };
    process::exit(code.as_i32());
}

fn resolve(cli_path: Option<PathBuf>) -> Result<ResolvedConfig, ExitCode> {
    let paths = ConfigPaths::discover(cli_path.as_deref());
    resolve_config(&paths).map_err(|e| {
        error!(error = %e, "failed to resolve configuration");
        eprintln!("snapmat: {e}");
        ExitCode::ConfigError
    })
}

fn config_show(cli_path: Option<PathBuf>) -> ExitCode {
    let resolved = match resolve(cli_path) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let output = json!({
        "source": resolved.source.to_string(),
        "config": resolved.config,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(text) => {
            println!("{text}");
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("snapmat: {e}");
            ExitCode::InternalError
        }
    }
}

fn run(cli_path: Option<PathBuf>, args: &RunArgs) -> ExitCode {
    let mut resolved = match resolve(cli_path) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    if let Some(output) = &args.output {
        resolved.config.output_path = output.clone();
    }

    let job = match SnapshotJob::new(resolved.config, JsonLinesFactory::new(&args.source)) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("snapmat: {e}");
            return ExitCode::for_error(&e);
        }
    };

    let scheduler = Scheduler::new(job);
    let outcome = scheduler.request(args.tag.clone());
    if !scheduler.wait_idle(Duration::from_secs(args.timeout_secs)) {
        eprintln!("snapmat: rebuild still running after {}s", args.timeout_secs);
        return ExitCode::Timeout;
    }

    let stats = scheduler.stats();
    let report = json!({
        "outcome": outcome,
        "stats": stats,
        "summary": scheduler.rebuild().last_summary(),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("snapmat: {e}"),
    }

    if stats.failed > 0 {
        ExitCode::RunFailed
    } else {
        ExitCode::Success
    }
}
