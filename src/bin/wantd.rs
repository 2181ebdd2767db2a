// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! `wantd` — a small reference runner for the want reconciliation engine.
//!
//! Loads a YAML manifest of wants (spec §6.1), starts an [`Engine`], and
//! drives it either for a fixed number of ticks (`--once`) or until
//! Ctrl-C. The engine itself ships no domain want types (those are
//! explicitly out of scope), so this binary registers a handful of
//! reference types — `prime numbers`, `prime sequence`, `noop` — useful
//! for smoke-testing a manifest; real deployments register their own
//! types against the library directly rather than through this binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, MietteHandlerOpts, Result, WrapErr};
use wantengine::engine::{Engine, EngineConfig};
use wantengine::mutation::WantConfig;
use wantengine::reconcile::WantTypeRegistry;
use wantengine::want::WantBehavior;

mod demo_types;

#[derive(Parser)]
#[command(name = "wantd", about = "Reference runner for the want reconciliation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads a want manifest and reconciles it.
    Run {
        /// Path to a YAML document of shape `{wants: [...]}` (spec §6.1, §6.5).
        manifest: PathBuf,
        /// Where the engine writes its periodic memory-file snapshot.
        #[arg(long)]
        memory_file: Option<PathBuf>,
        /// Reconcile tick interval in milliseconds.
        #[arg(long, default_value_t = 100)]
        tick_interval_ms: u64,
        /// Run a fixed number of ticks and exit instead of running forever.
        #[arg(long)]
        once: Option<u32>,
    },
    /// Runs the HTTP surface (requires the `server` feature).
    #[cfg(feature = "server")]
    Serve {
        manifest: PathBuf,
        #[arg(long)]
        memory_file: Option<PathBuf>,
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

fn built_in_want_types() -> WantTypeRegistry {
    let types = WantTypeRegistry::new();
    types.register("noop", Arc::new(demo_types::Noop) as Arc<dyn WantBehavior>);
    types.register("prime numbers", Arc::new(demo_types::PrimeNumbers));
    types.register("prime sequence", Arc::new(demo_types::PrimeSequence));
    types
}

async fn load_manifest(path: &PathBuf) -> Result<Vec<WantConfig>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("reading manifest {}", path.display()))?;
    wantengine::config::parse_wants_document_yaml(&contents)
        .into_diagnostic()
        .wrap_err("parsing want manifest")
}

async fn run_once_or_forever(manifest: PathBuf, memory_file: Option<PathBuf>, tick_interval_ms: u64, once: Option<u32>) -> Result<()> {
    let configs = load_manifest(&manifest).await?;

    let config = EngineConfig {
        memory_file,
        tick_interval: Duration::from_millis(tick_interval_ms),
        ..EngineConfig::default()
    };
    let engine = Engine::start(config, built_in_want_types())
        .await
        .into_diagnostic()
        .wrap_err("starting engine")?;

    engine.create_wants(configs).await.into_diagnostic().wrap_err("submitting manifest wants")?;

    match once {
        Some(ticks) => {
            for _ in 0..ticks {
                engine.run_tick_now().await;
            }
        }
        None => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

#[cfg(feature = "server")]
async fn serve(manifest: PathBuf, memory_file: Option<PathBuf>, bind: String) -> Result<()> {
    let configs = load_manifest(&manifest).await?;
    let config = EngineConfig { memory_file, ..EngineConfig::default() };
    let engine = Arc::new(
        Engine::start(config, built_in_want_types())
            .await
            .into_diagnostic()
            .wrap_err("starting engine")?,
    );
    engine.create_wants(configs).await.into_diagnostic().wrap_err("submitting manifest wants")?;

    let router = wantengine::server::router(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "serving");
    axum::serve(listener, router).await.into_diagnostic().wrap_err("server error")?;
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { manifest, memory_file, tick_interval_ms, once } => {
            run_once_or_forever(manifest, memory_file, tick_interval_ms, once).await
        }
        #[cfg(feature = "server")]
        Commands::Serve { manifest, memory_file, bind } => serve(manifest, memory_file, bind).await,
    }
}

fn main() -> ExitCode {
    miette::set_hook(Box::new(|_| {
        Box::new(MietteHandlerOpts::new().terminal_links(true).unicode(true).context_lines(3).build())
    }))
    .ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            let is_config_error = report.downcast_ref::<wantengine::error::ConfigError>().is_some()
                || format!("{report:?}").contains("parsing want manifest")
                || format!("{report:?}").contains("reading manifest");
            ExitCode::from(if is_config_error { 1 } else { 2 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_types_cover_the_seed_scenario_names() {
        let types = built_in_want_types();
        assert!(types.get("prime numbers").is_some());
        assert!(types.get("prime sequence").is_some());
        assert!(types.get("noop").is_some());
    }
}
