fn main() {
    println!("Run `cargo test -p end-to-end` to execute the end-to-end scenarios.");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bucketdrop_auth::{AuthSelector, MemoryCredentialStore};
    use bucketdrop_config::{Backend, Config};
    use bucketdrop_debounce::{Debouncer, OnFireFn};
    use bucketdrop_notifier::MemoryNotifier;
    use bucketdrop_pipeline::{Outcome, UploadPipeline};
    use bucketdrop_store::LocalConnector;
    use bucketdrop_watcher::{DirectoryWatcher, scan_existing};
    use tokio::time::Instant;

    const BUCKET: &str = "drop-zone";

    /// A watched folder, a local "bucket" root and the pipeline between them.
    struct Harness {
        source: tempfile::TempDir,
        remote: tempfile::TempDir,
        notifier: Arc<MemoryNotifier>,
        pipeline: Arc<UploadPipeline>,
        /// Every pipeline run: (path, start time, outcome).
        runs: Arc<Mutex<Vec<(PathBuf, Instant, Outcome)>>>,
    }

    impl Harness {
        fn new(stability_window: Duration) -> Self {
            let source = tempfile::tempdir().unwrap();
            let remote = tempfile::tempdir().unwrap();

            let mut config = Config::new(source.path(), BUCKET);
            config.stability_window = stability_window;
            config.stability_poll = Duration::from_millis(20);
            config.backend = Backend::Local {
                root: remote.path().to_path_buf(),
            };
            config.validate().unwrap();

            let notifier = Arc::new(MemoryNotifier::new());
            let selector = AuthSelector::new(
                Arc::new(MemoryCredentialStore::default()),
                &config.credential_service,
                &config.credential_account,
                None,
            );
            let pipeline = Arc::new(UploadPipeline::new(
                Arc::new(config),
                selector,
                Arc::new(LocalConnector::new(remote.path())),
                notifier.clone(),
            ));

            Self {
                source,
                remote,
                notifier,
                pipeline,
                runs: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn debouncer(&self, window: Duration) -> Debouncer {
            let pipeline = Arc::clone(&self.pipeline);
            let runs = Arc::clone(&self.runs);
            let on_fire: OnFireFn = Arc::new(move |path: PathBuf| {
                let pipeline = Arc::clone(&pipeline);
                let runs = Arc::clone(&runs);
                Box::pin(async move {
                    let started = Instant::now();
                    let outcome = pipeline.run(&path).await;
                    runs.lock().unwrap().push((path, started, outcome));
                })
            });
            Debouncer::new(window, on_fire)
        }

        fn local(&self, name: &str) -> PathBuf {
            self.source.path().join(name)
        }

        fn remote_object(&self, name: &str) -> PathBuf {
            self.remote.path().join(BUCKET).join(name)
        }

        fn runs(&self) -> Vec<(PathBuf, Instant, Outcome)> {
            self.runs.lock().unwrap().clone()
        }
    }

    async fn wait_for(path: &Path, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        path.exists()
    }

    #[tokio::test]
    async fn startup_scan_uploads_existing_file() {
        let h = Harness::new(Duration::from_millis(100));
        std::fs::write(h.local("report.csv"), b"id,total\n1,42\n").unwrap();
        std::fs::create_dir(h.local("archive")).unwrap();

        let debouncer = h.debouncer(Duration::from_secs(1));
        for path in scan_existing(h.source.path()).unwrap() {
            debouncer.fire_now(path);
        }
        assert!(debouncer.drain(Duration::from_secs(10)).await);

        let runs = h.runs();
        assert_eq!(runs.len(), 1);
        assert!(matches!(&runs[0].2, Outcome::Uploaded { object, .. } if object.name == "report.csv"));
        assert_eq!(
            std::fs::read(h.remote_object("report.csv")).unwrap(),
            b"id,total\n1,42\n"
        );
        assert!(!h.local("report.csv").exists());
        assert!(h.local("archive").is_dir());

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "File Uploaded");
        assert!(sent[0].message.contains("report.csv"));
    }

    #[tokio::test]
    async fn rapid_writes_collapse_into_one_upload() {
        let h = Harness::new(Duration::from_millis(40));
        let debounce = Duration::from_millis(200);
        let debouncer = h.debouncer(debounce);
        let path = h.local("log.txt");

        let mut last_write = Instant::now();
        for line in ["one\n", "two\n", "three\n"] {
            let mut body = std::fs::read(&path).unwrap_or_default();
            body.extend_from_slice(line.as_bytes());
            std::fs::write(&path, body).unwrap();
            last_write = Instant::now();
            debouncer.notify(path.clone());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(wait_for(&h.remote_object("log.txt"), Duration::from_secs(5)).await);
        assert!(debouncer.drain(Duration::from_secs(5)).await);

        let runs = h.runs();
        assert_eq!(runs.len(), 1, "expected exactly one attempt");
        let delay = runs[0].1 - last_write;
        assert!(delay >= debounce, "fired after {delay:?}");
        assert!(delay < debounce + Duration::from_millis(500), "fired after {delay:?}");
        assert_eq!(
            std::fs::read(h.remote_object("log.txt")).unwrap(),
            b"one\ntwo\nthree\n"
        );
    }

    #[tokio::test]
    async fn file_already_in_bucket_is_not_reuploaded() {
        let h = Harness::new(Duration::ZERO);
        std::fs::create_dir_all(h.remote.path().join(BUCKET)).unwrap();
        std::fs::write(h.remote_object("dup.bin"), b"original").unwrap();
        std::fs::write(h.local("dup.bin"), b"changed locally").unwrap();

        let outcome = h.pipeline.run(&h.local("dup.bin")).await;

        assert!(matches!(outcome, Outcome::SkippedExisting { .. }));
        assert_eq!(std::fs::read(h.remote_object("dup.bin")).unwrap(), b"original");
        assert!(!h.local("dup.bin").exists());
        assert_eq!(h.notifier.titles(), vec!["File Existed"]);
    }

    #[tokio::test]
    async fn watched_file_flows_through_to_bucket() {
        let h = Harness::new(Duration::from_millis(50));
        let debouncer = Arc::new(h.debouncer(Duration::from_millis(100)));
        let mut watcher = DirectoryWatcher::new(h.source.path()).unwrap();

        let feeder = {
            let debouncer = Arc::clone(&debouncer);
            tokio::spawn(async move {
                while let Ok(event) = watcher.next().await {
                    debouncer.notify(event.path);
                }
            })
        };

        std::fs::write(h.local("incoming.txt"), b"hello bucket").unwrap();

        assert!(wait_for(&h.remote_object("incoming.txt"), Duration::from_secs(10)).await);
        feeder.abort();
        assert!(debouncer.drain(Duration::from_secs(5)).await);

        assert_eq!(
            std::fs::read(h.remote_object("incoming.txt")).unwrap(),
            b"hello bucket"
        );
        assert!(!h.local("incoming.txt").exists());
        assert!(h.notifier.titles().contains(&"File Uploaded".to_string()));
    }
}
