//! Binary entry point: load config, initialise logging, construct the
//! engine, restore snapshots, then serve HTTP until ctrl-c.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ragline::api::{self, AppState};
use ragline::bootstrap::logger;
use ragline::config;
use ragline::embed;
use ragline::engine::RagEngine;
use ragline::error::AppError;

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<String>,
    verbosity: u8,
}

/// Minimal flag parsing: `-f/--config <path>`, `-v`/`-vv` for debug/trace.
fn parse_cli_args() -> CliArgs {
    let mut out = CliArgs::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-f" | "--config" => out.config_path = args.next(),
            "-v" => out.verbosity = out.verbosity.max(1),
            "-vv" => out.verbosity = out.verbosity.max(2),
            other => eprintln!("ignoring unknown argument: {other}"),
        }
    }
    out
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let args = parse_cli_args();

    let cfg = config::load(args.config_path.as_deref())?;
    logger::init(&cfg, args.verbosity)?;

    info!(work_dir = %cfg.work_dir.display(), provider = %cfg.embedding.provider, "starting ragline");

    let embedder = embed::build(&cfg.embedding)?;
    let bind = cfg.bind.clone();
    let api_key = cfg.api_key.clone();
    let engine = Arc::new(RagEngine::new(cfg, embedder));
    engine.boot().await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
        }
        info!("shutdown signal received");
        signal_token.cancel();
    });

    api::serve(AppState::new(engine, api_key), &bind, shutdown).await
}
