//! `warden-cli` – Warden Command Line Interface
//!
//! | Command | Effect |
//! |---|---|
//! | `warden check-policy <file>` | parse and validate a policy file |
//! | `warden init-policy [file]` | write the baseline policy |
//! | `warden init-config` | write `~/.warden/config.toml` |
//! | `warden run <intents.json>` | submit a batch of intents and wait for all of them |
//! | `warden repl` | interactive operator shell |
//!
//! Ctrl-C stops waiting and exits.  Runs still in flight never receive an
//! unlock signal.

mod config;
mod render;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, warn};

use warden_runtime::{KernelService, init_tracing};
use warden_types::{IntentRequest, RunSnapshot, RunStatus};

#[derive(Parser)]
#[command(name = "warden")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Governance kernel for autonomous agent swarms", long_about = None)]
struct Cli {
    /// Config file (default: ~/.warden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a policy file
    CheckPolicy {
        path: PathBuf,
    },

    /// Write the baseline policy
    InitPolicy {
        #[arg(default_value = "policy.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Write a default operator config
    InitConfig,

    /// Submit every intent in a JSON array and wait for the results
    Run {
        intents: PathBuf,

        /// Print the final snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive operator shell
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _tracing = init_tracing("warden");

    match cli.command {
        Commands::CheckPolicy { path } => check_policy(&path),
        Commands::InitPolicy { path, force } => match config::write_baseline_policy(&path, force) {
            Ok(()) => {
                println!("{} baseline policy written to {}", "✓".green().bold(), path.display());
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e),
        },
        Commands::InitConfig => match config::init_default() {
            Ok(path) => {
                println!("{} config written to {}", "✓".green().bold(), path.display());
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e),
        },
        Commands::Run { intents, json } => {
            with_service(cli.config.as_deref(), |service, rt, shutdown| {
                rt.block_on(run_batch(service, &intents, json, &shutdown))
            })
        }
        Commands::Repl => with_service(cli.config.as_deref(), |service, rt, shutdown| {
            print_banner(service);
            repl::run(service, rt, shutdown);
            ExitCode::SUCCESS
        }),
    }
}

fn check_policy(path: &Path) -> ExitCode {
    match config::load_policy(path) {
        Ok(policy) => {
            println!("{} {} is valid", "✓".green().bold(), path.display());
            println!("  critical threshold : {}", policy.critical_threshold);
            println!("  collusion τ        : {}", policy.collusion_threshold);
            println!("  round limit        : {}", policy.round_limit);
            println!("  min quorum         : {}", policy.min_quorum);
            for c in &policy.shard_counts {
                println!("  shards at {}      : {}", c.classification, c.shards);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

/// Load config and policy, start the kernel and hand it to `body`.
fn with_service(
    config_path: Option<&Path>,
    body: impl FnOnce(&KernelService, &tokio::runtime::Runtime, Arc<AtomicBool>) -> ExitCode,
) -> ExitCode {
    let path = config_path.map_or_else(config::config_path, Path::to_path_buf);
    let cfg = match config::load_or_default(&path) {
        Ok(cfg) => cfg,
        Err(e) => return fail(&e),
    };
    // An invalid policy is fatal; there is no fallback to defaults.
    let policy = match cfg.policy() {
        Ok(policy) => policy,
        Err(e) => return fail(&e),
    };
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => return fail(&format!("Failed to start async runtime: {e}")),
    };
    let _enter = rt.enter();
    let service = match cfg
        .components()
        .and_then(|c| KernelService::start(policy, c).map_err(|e| e.to_string()))
    {
        Ok(service) => service,
        Err(e) => return fail(&e),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    body(&service, &rt, shutdown)
}

async fn run_batch(
    service: &KernelService,
    path: &Path,
    json: bool,
    shutdown: &AtomicBool,
) -> ExitCode {
    let requests: Vec<IntentRequest> = match std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))
        .and_then(|raw| {
            serde_json::from_str(&raw).map_err(|e| format!("Failed to parse intents: {}", e))
        }) {
        Ok(requests) => requests,
        Err(e) => return fail(&e),
    };

    let mut ids = Vec::with_capacity(requests.len());
    for request in requests {
        match service.submit(request) {
            Ok(id) => ids.push(id),
            Err(e) => return fail(&e.to_string()),
        }
    }

    let mut finished: Vec<RunSnapshot> = Vec::with_capacity(ids.len());
    for id in ids {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                warn!(pending = %id, "interrupted before every run finished");
                return ExitCode::from(130);
            }
            match tokio::time::timeout(Duration::from_millis(250), service.wait(id)).await {
                Ok(Ok(snapshot)) => {
                    finished.push(snapshot);
                    break;
                }
                Ok(Err(e)) => {
                    error!(run_id = %id, error = %e, "lost track of run");
                    break;
                }
                Err(_) => {}
            }
        }
    }

    if json {
        match serde_json::to_string_pretty(&finished) {
            Ok(out) => println!("{out}"),
            Err(e) => return fail(&e.to_string()),
        }
    } else {
        for s in &finished {
            println!("{}", render::summary_line(s));
        }
    }

    let completed = finished
        .iter()
        .filter(|s| s.status == RunStatus::Completed)
        .count();
    if !json {
        println!(
            "\n  {} of {} run(s) completed",
            completed.to_string().bold(),
            finished.len()
        );
    }
    if completed == finished.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn fail(msg: &str) -> ExitCode {
    eprintln!("{}: {}", "Error".red().bold(), msg);
    ExitCode::FAILURE
}

fn print_banner(service: &KernelService) {
    println!();
    println!("{}", r#" _      __           __         "#.bold().cyan());
    println!("{}", r#"| | /| / /__ ________/ /__ ___   "#.bold().cyan());
    println!("{}", r#"| |/ |/ / _ `/ __/ _  / -_) _ \  "#.bold().cyan());
    println!("{}", r#"|__/|__/\_,_/_/  \_,_/\__/_//_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Warden".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!(
        "  critical from {} · quorum {} · τ {}",
        service.policy().critical_threshold,
        service.policy().min_quorum,
        service.policy().collusion_threshold
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
}
