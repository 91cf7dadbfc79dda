use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
};
use unimatrix::matrix::RouterId;
use unimatrix::orchestrator::{Options, Orchestrator, OrchestratorHandle};
use unimatrix::settings::{RouterSettings, Settings};

#[derive(Parser, Debug)]
#[command(name = "unimatrix", about = "Two broadcast routers, one virtual matrix")]
struct Args {
    /// Settings document (JSON). Missing file means defaults.
    #[arg(long, default_value = "unimatrix.json")]
    settings: PathBuf,

    /// Port for the northbound Videohub bridge.
    #[arg(long, default_value_t = 9990)]
    bridge_port: u16,

    /// Do not start the northbound bridge.
    #[arg(long)]
    no_bridge: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    info!("unimatrix starting up!");

    let settings = load_settings(&args.settings)?;

    let handle = Orchestrator::spawn(Options {
        auto_reconnect: settings.auto_reconnect,
        rollback_on_partial_failure: false,
    });

    handle
        .set_tie_line_config(settings.tie_lines.clone())
        .await
        .context("tie-line configuration rejected")?;

    if settings.auto_connect {
        connect_if_configured(&handle, RouterId::A, settings.router_a.as_ref()).await;
        connect_if_configured(&handle, RouterId::B, settings.router_b.as_ref()).await;
    }

    if !args.no_bridge {
        let port = handle
            .start_bridge(args.bridge_port)
            .await
            .context("failed to start bridge")?;
        info!(port, "northbound bridge up");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.stop_bridge().await.ok();
    handle.disconnect_router(RouterId::A).await.ok();
    handle.disconnect_router(RouterId::B).await.ok();
    Ok(())
}

fn load_settings(path: &PathBuf) -> Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no settings document, using defaults");
            Ok(Settings::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

async fn connect_if_configured(
    handle: &OrchestratorHandle,
    id: RouterId,
    settings: Option<&RouterSettings>,
) {
    let Some(rs) = settings else { return };
    match handle.connect_router(id, rs.controller_config()).await {
        Ok(()) => info!(router = %id, name = %rs.name, "router connected"),
        Err(e) => error!(router = %id, error = %e, "router connect failed"),
    }
}
