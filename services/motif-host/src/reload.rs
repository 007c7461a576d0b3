//! Manifest hot reload: a `notify` watcher feeding registry rebuilds.

use anyhow::Result;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::service::HostService;

const SETTLE: Duration = Duration::from_millis(250);

pub fn spawn_manifest_watcher(service: Arc<HostService>, manifest: PathBuf) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = watch_loop(service, manifest).await {
            warn!(error = ?e, "manifest watch loop exited");
        }
    })
}

fn touches(event: &notify::Event, manifest: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|p| p.file_name() == manifest.file_name())
}

async fn watch_loop(service: Arc<HostService>, manifest: PathBuf) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(16);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.blocking_send(res);
        },
        notify::Config::default(),
    )?;
    // Editors often replace the file, so watch its directory.
    let dir = manifest.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!(manifest = %manifest.display(), "watching manifest for changes");
    while let Some(evt) = rx.recv().await {
        match evt {
            Ok(ev) if touches(&ev, &manifest) => {}
            Ok(_) => continue,
            Err(e) => {
                warn!(error = ?e, "manifest watch error");
                continue;
            }
        }
        // Coalesce the burst of events a single save produces.
        tokio::time::sleep(SETTLE).await;
        while rx.try_recv().is_ok() {}
        match service.refresh().await {
            Ok(hosts) => {
                motif_core::HOST_METRICS.registry_reloads_total.add(1, &[]);
                info!(hosts, "registry reloaded from manifest");
            }
            Err(e) => warn!(error = %e, "manifest reload failed, keeping previous registry"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
    use notify::Event;

    #[test]
    fn only_writes_to_the_manifest_trigger_a_reload() {
        let manifest = Path::new("/etc/motif/hosts.json");
        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)));
        assert!(touches(&modify.clone().add_path(PathBuf::from("/etc/motif/hosts.json")), manifest));
        assert!(touches(&Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/motif/hosts.json")), manifest));
        assert!(!touches(&modify.clone().add_path(PathBuf::from("/etc/motif/other.json")), manifest));
        assert!(!touches(&modify, manifest));
        assert!(!touches(&Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/etc/motif/hosts.json")), manifest));
        assert!(!touches(&Event::new(EventKind::Access(AccessKind::Read)).add_path(PathBuf::from("/etc/motif/hosts.json")), manifest));
    }
}
