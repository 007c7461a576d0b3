use anyhow::Result;
use motif_core::{clear_ready, init_metrics, init_tracing, mark_not_live, mark_ready};
use motif_host::config::HostServiceConfig;
use motif_host::service::HostService;
use motif_host::{http, reload, store};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("motif-host")?;
    init_metrics()?;

    let cfg = HostServiceConfig::load()?;
    info!(?cfg, "config loaded");

    let service = Arc::new(HostService::bootstrap(&cfg).await?);
    info!(hosts = service.dispatcher().registry().len(), "host registry ready");

    let sweeper = store::spawn_expiry_sweeper(service.store().clone(), cfg.sweep_interval());
    let watcher = match (&cfg.manifest_path, cfg.watch_manifest) {
        (Some(path), true) => Some(reload::spawn_manifest_watcher(service.clone(), path.clone())),
        _ => None,
    };

    let app = http::router(service.dispatcher().clone());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "motif host listening");
    mark_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            clear_ready();
            info!("shutdown requested");
        })
        .await?;

    mark_not_live();
    sweeper.abort();
    if let Some(w) = watcher {
        w.abort();
    }
    info!("shutdown");
    Ok(())
}
