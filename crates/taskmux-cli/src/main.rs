mod logging;
mod review_cmd;
mod run_cmd;
mod status_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;

use taskmux_core::backend::BackendRegistry;
use taskmux_core::state::StateWriter;

#[derive(Parser)]
#[command(name = "taskmux", about = "Multi-agent coding task orchestrator")]
struct Cli {
    /// Path of the persisted state document
    #[arg(long, global = true, default_value = ".taskmux/state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch submission from stdin (parallel mode)
    Run {
        /// Terminal-multiplexer session to run tasks in; omit for pipe mode
        #[arg(long)]
        session: Option<String>,
    },
    /// Run a single dispatch cycle against the state document
    Dispatch {
        /// Terminal-multiplexer session to run tasks in; omit for pipe mode
        #[arg(long)]
        session: Option<String>,
    },
    /// Show task status summary
    Status,
    /// Record an external review verdict (findings JSON on stdin)
    ReviewComplete {
        /// Task the verdict applies to
        task_id: String,
        /// Overall severity: critical, major, minor, or none
        #[arg(long)]
        severity: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_path = match logging::init() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            std::process::exit(1);
        }
    };
    let registry = BackendRegistry::with_defaults();
    logging::banner(&log_path, &registry.list());

    if let Some(parent) = cli.state.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("failed to create state directory {}: {e}", parent.display());
                std::process::exit(1);
            }
        }
    }
    let writer = Arc::new(StateWriter::new(&cli.state));

    // An interrupt cancels every in-flight per-task context.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupt received, cancelling in-flight tasks...");
                cancel.cancel();
            }
        });
    }

    let exit_code = match cli.command {
        Commands::Run { session } => {
            match run_cmd::run_parallel(Arc::clone(&writer), session, cancel.clone()).await {
                Ok(report) => {
                    emit_report(&report);
                    if cancel.is_cancelled() {
                        130
                    } else {
                        run_cmd::exit_code_for(&report)
                    }
                }
                Err(e) => {
                    error!(error = %e, "run failed");
                    eprintln!("{e:#}");
                    1
                }
            }
        }
        Commands::Dispatch { session } => {
            match run_cmd::run_single_cycle(Arc::clone(&writer), session, cancel.clone()).await {
                Ok(report) => {
                    emit_report(&report);
                    run_cmd::exit_code_for(&report)
                }
                Err(e) => {
                    error!(error = %e, "dispatch cycle failed");
                    eprintln!("{e:#}");
                    1
                }
            }
        }
        Commands::Status => match status_cmd::run_status(&writer) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{e:#}");
                1
            }
        },
        Commands::ReviewComplete { task_id, severity } => {
            match review_cmd::run_review_complete(&writer, &task_id, &severity).await {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "review-complete failed");
                    eprintln!("{e:#}");
                    1
                }
            }
        }
    };

    if exit_code != 0 {
        logging::emit_recent_errors(&log_path);
    } else {
        let _ = std::fs::remove_file(&log_path);
    }
    std::process::exit(exit_code);
}

fn emit_report(report: &taskmux_core::dispatch::ExecutionReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize report: {e}"),
    }
}
