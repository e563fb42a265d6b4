//! Application wiring: config → auth → store → pipeline → debouncer → watcher.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bucketdrop_auth::{AuthSelector, CredentialStore, default_credential_store};
use bucketdrop_config::{
    Backend, Config, DEFAULT_CREDENTIAL_ACCOUNT, DEFAULT_CREDENTIAL_SERVICE, FileConfig, config_dir,
};
use bucketdrop_debounce::{Debouncer, OnFireFn};
use bucketdrop_notifier::{DesktopNotifier, LogNotifier, Notifier};
use bucketdrop_pipeline::UploadPipeline;
use bucketdrop_store::{GcsConnector, LocalConnector, StoreConnector};
use bucketdrop_watcher::{DirectoryWatcher, scan_existing};

/// Runs the daemon until SIGINT/SIGTERM or a watcher failure.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    log_startup(&config);

    let credentials = default_credential_store(config_dir().as_deref());
    let selector = AuthSelector::new(
        credentials,
        &config.credential_service,
        &config.credential_account,
        config.impersonate_service_account.clone(),
    );
    selector.log_strategy().await;

    let pipeline = Arc::new(UploadPipeline::new(
        Arc::clone(&config),
        selector,
        connector(&config)?,
        notifier(&config),
    ));
    let debouncer = Debouncer::new(config.debounce, fire_into(Arc::clone(&pipeline)));

    // Watch first so nothing written during the scan is missed.
    let mut watcher = DirectoryWatcher::new(&config.source)
        .with_context(|| format!("failed to watch {}", config.source.display()))?;

    tracing::info!("scanning source folder for existing files");
    match scan_existing(&config.source) {
        Ok(files) => {
            for path in files {
                tracing::debug!(path = %path.display(), "found existing file");
                debouncer.fire_now(path);
            }
        }
        Err(e) => tracing::error!(error = %e, "initial scan failed"),
    }
    tracing::info!("initial scan complete, watching for changes");

    let result = watch(&mut watcher, &debouncer).await;

    drop(watcher);
    if !debouncer.drain(config.shutdown_grace).await {
        tracing::warn!(
            grace_ms = config.shutdown_grace.as_millis() as u64,
            "in-flight uploads did not finish before shutdown"
        );
    }
    result
}

/// Feeds watcher events into the debouncer until a shutdown signal.
async fn watch(watcher: &mut DirectoryWatcher, debouncer: &Debouncer) -> anyhow::Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal.context("failed to listen for shutdown signals")?;
                tracing::info!(signal, "shutting down");
                return Ok(());
            }
            event = watcher.next() => {
                let event = event.context("file watcher stopped")?;
                debouncer.notify(event.path);
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

fn fire_into(pipeline: Arc<UploadPipeline>) -> OnFireFn {
    Arc::new(move |path| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            pipeline.run(&path).await;
        })
    })
}

fn connector(config: &Config) -> anyhow::Result<Arc<dyn StoreConnector>> {
    Ok(match &config.backend {
        Backend::Gcs => {
            let http = reqwest::Client::builder()
                .user_agent(concat!("bucketdrop/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("failed to build HTTP client")?;
            Arc::new(GcsConnector::new(http, config.project.clone()))
        }
        Backend::Local { root } => {
            tracing::info!(root = %root.display(), "using local directory backend");
            Arc::new(LocalConnector::new(root.clone()))
        }
    })
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    if config.notifications && DesktopNotifier::is_supported() {
        Arc::new(DesktopNotifier::new())
    } else {
        Arc::new(LogNotifier)
    }
}

fn log_startup(config: &Config) {
    tracing::info!(
        source = %config.source.display(),
        bucket = %config.bucket,
        project = config.project.as_deref().unwrap_or("-"),
        "starting file transfer monitor"
    );
    tracing::info!(
        debounce_ms = config.debounce.as_millis() as u64,
        stability_window_ms = config.stability_window.as_millis() as u64,
        stability_poll_ms = config.stability_poll.as_millis() as u64,
        max_concurrent_uploads = config.max_concurrent_uploads,
        verbose = config.verbose,
        "pipeline settings"
    );
}

/// Reads a service-account key file into the credential store.
pub async fn store_key(key_path: &Path, file: &FileConfig) -> anyhow::Result<()> {
    let key = std::fs::read(key_path)
        .with_context(|| format!("failed to read service account key {}", key_path.display()))?;
    anyhow::ensure!(!key.is_empty(), "service account key {} is empty", key_path.display());

    let service = file
        .credential_service
        .as_deref()
        .unwrap_or(DEFAULT_CREDENTIAL_SERVICE);
    let account = file
        .credential_account
        .as_deref()
        .unwrap_or(DEFAULT_CREDENTIAL_ACCOUNT);

    let store = default_credential_store(config_dir().as_deref());
    save_key(store.as_ref(), service, account, &key).await?;
    tracing::info!(service, account, "stored service account key");
    Ok(())
}

async fn save_key(
    store: &dyn CredentialStore,
    service: &str,
    account: &str,
    key: &[u8],
) -> anyhow::Result<()> {
    store
        .put(service, account, key)
        .await
        .context("failed to store service account key")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketdrop_auth::MemoryCredentialStore;

    #[tokio::test]
    async fn save_key_overwrites() {
        let store = MemoryCredentialStore::default();
        save_key(&store, "svc", "acct", b"old").await.unwrap();
        save_key(&store, "svc", "acct", b"new").await.unwrap();
        assert_eq!(store.get("svc", "acct").await.unwrap().unwrap(), b"new");
    }

    #[tokio::test]
    async fn store_key_rejects_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = store_key(&tmp.path().join("missing.json"), &FileConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read service account key"));
    }

    #[tokio::test]
    async fn store_key_rejects_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.json");
        std::fs::write(&path, b"").unwrap();
        assert!(store_key(&path, &FileConfig::default()).await.is_err());
    }

    #[test]
    fn local_backend_builds_local_connector() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::new(tmp.path(), "b");
        config.backend = Backend::Local {
            root: tmp.path().join("remote"),
        };
        assert!(connector(&config).is_ok());
    }
}
