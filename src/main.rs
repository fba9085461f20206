use std::path::PathBuf;
use std::process::exit;

use clap::{Command, CommandFactory, FromArgMatches, Parser};
use tracing::{error, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use docbase::config::{
    context::build_app,
    schema::{load_config, LogFormat},
};
use docbase::version::BuildInfo;

#[derive(Debug, Parser)]
#[clap(name = "docbase", about = "Multi-tenant document store")]
struct Args {
    #[clap(short, long, default_value = "docbase.toml")]
    config_path: PathBuf,

    #[clap(long, help = "Log in JSON, overriding misc.log_format")]
    json_logs: bool,
}

/// The derived command, reporting the full build identity for `--version`
fn command(version: &str) -> Command<'_> {
    Args::command().version(version)
}

fn prepare_tracing(json_logs: bool) {
    // Route `log` records from sqlx and warp through tracing
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to forward log records: {e}");
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docbase=info,warn".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let build = BuildInfo::from_build_env();
    let version = build.long_version();
    let matches = command(&version).get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config from {:?}: {e}", args.config_path);
            exit(1);
        }
    };

    prepare_tracing(args.json_logs || config.misc.log_format == LogFormat::Json);

    info!("Starting {build}");

    let app = match build_app(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Error initializing storage: {e}");
            exit(1);
        }
    };

    let Some(http) = config.frontend.http.clone() else {
        warn!("No frontends configured. Nothing to do.");
        return;
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };

    if let Err(e) = docbase::frontend::http::run_server(app, build, http, shutdown).await {
        error!("HTTP frontend failed: {e}");
        exit(1);
    }
}
