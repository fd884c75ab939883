use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use podstage::config::RunConfig;
use podstage::logging::{self, TracingSink};
use podstage::runner;
use podstage::workflow::Workflow;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "podstage", version, about = "Deploy files into a pod over SSH and run a test script")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy, restart the service and run the test script
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Where this run's log is written before being saved
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a run file without connecting
    Check {
        #[arg(long)]
        config: PathBuf,
    },
    /// Check that a test script exists and is readable
    ValidateScript { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_file,
            json,
        } => run(&config, log_file, json).await,
        Commands::Check { config } => {
            init_console();
            check(&config)
        }
        Commands::ValidateScript { path } => {
            init_console();
            match runner::validate(&path) {
                Ok(kind) => {
                    println!("{}: {}", path.display(), kind);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn init_console() {
    if let Err(e) = logging::init_tracing(None) {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

async fn run(config_path: &Path, log_file: Option<PathBuf>, json: bool) -> ExitCode {
    let log_file = log_file.unwrap_or_else(logging::temp_log_path);
    if let Err(e) = logging::init_tracing(Some(&log_file)) {
        eprintln!("Failed to open log file {}: {}", log_file.display(), e);
        return ExitCode::FAILURE;
    }

    let config = match RunConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let workflow = Workflow::new(config, Arc::new(TracingSink), Some(log_file));
    info!("Run {}", workflow.run_id());

    let scripts = workflow.script_runner();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if scripts.is_running() {
            warn!("Interrupted, stopping test script");
            scripts.stop().await;
        } else {
            warn!("Interrupted");
            std::process::exit(130);
        }
    });

    match workflow.run().await {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => error!("Failed to encode report: {}", e),
                }
            }
            if report.success() {
                info!("Test run passed");
                ExitCode::SUCCESS
            } else if report.script.stopped {
                warn!("Test script was stopped");
                ExitCode::from(130)
            } else {
                error!("Test script failed with exit code {}", report.script.exit_code);
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn check(config_path: &Path) -> ExitCode {
    let config = match RunConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    let mut ok = true;
    let target = config.deploy_target();
    println!("Target: {}", config.session_config().display_string());
    println!(
        "Namespace: {}  filter: {:?}  staging: {}",
        target.namespace, target.container_selector, target.staging_base
    );
    println!(
        "Escalation: {}",
        if config.environment.root_command.trim().is_empty() {
            "none".to_string()
        } else {
            config.environment.root_command.clone()
        }
    );

    for entry in &config.files {
        let exists = entry.local_path.is_file();
        ok &= exists;
        println!(
            "  [{}] {} -> {} ({})",
            if exists { "ok" } else { "missing" },
            entry.local_path.display(),
            entry.container_path,
            entry.permissions
        );
    }

    match runner::validate(&config.test_script.script_path) {
        Ok(kind) => println!(
            "Test script: {} ({})",
            config.test_script.script_path.display(),
            kind
        ),
        Err(e) => {
            ok = false;
            println!("Test script: {}", e);
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
