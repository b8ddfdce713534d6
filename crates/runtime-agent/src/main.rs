// Entry point of the runtime agent process.
//
// Runs exactly one action and exits with 0 when it completed, 1 otherwise.
// The action's result is printed to stdout as JSON; everything else goes to
// stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use agent_common::constants::{return_code, variables, DEFAULT_SCRATCH_DIR, VERSION};
use agent_common::settings::snapshot_environment;
use agent_common::{logging, AgentSettings};
use runtime_agent::{ActionRunner, BlobStore, LocalBlobStore, RunReport, S3BlobStore, StatusReporter};

/// Command-line arguments for the agent process.
#[derive(Parser, Debug)]
#[command(name = "runtime-agent", version, about = "Fetch, unpack, load and run one packaged action")]
struct Args {
    /// Scratch directory, emptied at start.
    #[arg(long, env = variables::action::SCRATCH_DIR, default_value = DEFAULT_SCRATCH_DIR)]
    scratch_dir: PathBuf,

    /// Upper bound in seconds for each of the fetch, unpack and invoke stages.
    #[arg(long, value_name = "SECS", env = variables::action::STAGE_TIMEOUT_SECS)]
    stage_timeout: Option<u64>,

    /// Emit logs as JSON lines.
    #[arg(long, env = variables::action::LOG_JSON)]
    log_json: bool,
}

fn main() {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(args.log_json);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to build Tokio runtime: {e}");
            std::process::exit(return_code::FAILURE);
        }
    };

    let exit_code = runtime.block_on(async move {
        match run(args).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("Agent failed to start: {e:#}");
                eprintln!("{e:#}");
                return_code::FAILURE
            }
        }
    });

    // Exit without waiting on blocking work a timed-out action may still hold.
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<i32> {
    tracing::info!("Runtime agent {VERSION} starting");

    let snapshot = snapshot_environment();
    let settings = AgentSettings::from_snapshot(&snapshot).context("Invalid configuration")?;
    tracing::debug!(?settings, "Loaded settings");

    let reporter =
        StatusReporter::from_settings(&settings).context("Failed to create HTTP client")?;

    let store: Arc<dyn BlobStore> = match &settings.local_store {
        Some(dir) => {
            tracing::info!("Reading action packages from '{}'", dir.display());
            Arc::new(LocalBlobStore::new(dir))
        }
        None => Arc::new(S3BlobStore::from_settings(&settings.aws).await),
    };

    let runner = ActionRunner::new(settings, store, reporter)
        .with_stage_timeout(args.stage_timeout.map(Duration::from_secs));

    let report = runner.run(&args.scratch_dir, &snapshot).await;
    match &report {
        RunReport::Completed(value) => println!("{value}"),
        RunReport::Failed(e) | RunReport::Aborted(e) => eprintln!("{}", e.report_message()),
    }

    tracing::info!(
        "Runtime agent finished with result {} (return code {})",
        report.result(),
        report.exit_code()
    );
    Ok(report.exit_code())
}
