//! Directory-backed store: `<root>/<bucket>/<name>`.
//!
//! Writes land in a hidden temp file next to the target and are renamed
//! into place on close, so a reader never sees a partial object.

use std::path::PathBuf;
use std::sync::Arc;

use bucketdrop_auth::AuthContext;
use tokio::io::AsyncWriteExt;

use crate::{ObjectRef, ObjectStore, ObjectWriter, StoreConnector, StoreError, StoreFuture};

/// Connects to a [`LocalDirStore`]. Credentials are ignored.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreConnector for LocalConnector {
    fn connect<'a>(&'a self, auth: &'a AuthContext) -> StoreFuture<'a, Arc<dyn ObjectStore>> {
        Box::pin(async move {
            tracing::trace!(strategy = auth.strategy(), "local store ignores credentials");
            Ok(Arc::new(LocalDirStore::new(self.root.clone())) as Arc<dyn ObjectStore>)
        })
    }
}

/// Buckets are subdirectories of `root`; objects are files inside them.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `object` to its file, rejecting names that would escape the bucket.
    pub fn object_path(&self, object: &ObjectRef) -> Result<PathBuf, StoreError> {
        validate_component(&object.bucket)?;
        validate_component(&object.name)?;
        Ok(self.root.join(&object.bucket).join(&object.name))
    }
}

fn validate_component(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl ObjectStore for LocalDirStore {
    fn exists<'a>(&'a self, object: &'a ObjectRef) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.object_path(object)?;
            match tokio::fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn open_writer<'a>(&'a self, object: &'a ObjectRef) -> StoreFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            let target = self.object_path(object)?;
            let dir = self.root.join(&object.bucket);
            tokio::fs::create_dir_all(&dir).await?;

            let temp = dir.join(format!(".{}.{}.partial", object.name, uuid::Uuid::new_v4()));
            let file = tokio::fs::File::create(&temp).await?;
            tracing::trace!(temp = %temp.display(), "opened local object writer");

            Ok(Box::new(LocalWriter { file, temp, target }) as Box<dyn ObjectWriter>)
        })
    }
}

struct LocalWriter {
    file: tokio::fs::File,
    temp: PathBuf,
    target: PathBuf,
}

impl LocalWriter {
    async fn commit(&mut self) -> Result<(), StoreError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tokio::fs::rename(&self.temp, &self.target).await?;
        Ok(())
    }
}

impl ObjectWriter for LocalWriter {
    fn write<'a>(&'a mut self, chunk: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.file.write_all(chunk).await?;
            Ok(())
        })
    }

    fn close(mut self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.commit().await {
                let _ = tokio::fs::remove_file(&self.temp).await;
                return Err(e);
            }
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let LocalWriter { file, temp, .. } = *self;
            drop(file);
            match tokio::fs::remove_file(&temp).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn missing_object_does_not_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        assert!(!store.exists(&ObjectRef::new("bkt", "a.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn object_visible_only_after_close() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let obj = ObjectRef::new("bkt", "report.csv");

        let mut writer = store.open_writer(&obj).await.unwrap();
        writer.write(b"a,b\n").await.unwrap();
        writer.write(b"1,2\n").await.unwrap();
        assert!(!store.exists(&obj).await.unwrap());

        writer.close().await.unwrap();
        assert!(store.exists(&obj).await.unwrap());
        assert_eq!(
            std::fs::read(tmp.path().join("bkt").join("report.csv")).unwrap(),
            b"a,b\n1,2\n"
        );
        assert_eq!(entries(&tmp.path().join("bkt")), vec!["report.csv"]);
    }

    #[tokio::test]
    async fn abort_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let obj = ObjectRef::new("bkt", "half.bin");

        let mut writer = store.open_writer(&obj).await.unwrap();
        writer.write(&[0u8; 1024]).await.unwrap();
        writer.abort().await.unwrap();

        assert!(!store.exists(&obj).await.unwrap());
        assert!(entries(&tmp.path().join("bkt")).is_empty());
    }

    #[tokio::test]
    async fn close_replaces_existing_object() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let obj = ObjectRef::new("bkt", "x");

        for body in [&b"first"[..], &b"second"[..]] {
            let mut writer = store.open_writer(&obj).await.unwrap();
            writer.write(body).await.unwrap();
            writer.close().await.unwrap();
        }
        assert_eq!(std::fs::read(tmp.path().join("bkt").join("x")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn directory_with_object_name_is_not_an_object() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("bkt").join("sub")).unwrap();
        let store = LocalDirStore::new(tmp.path());
        assert!(!store.exists(&ObjectRef::new("bkt", "sub")).await.unwrap());
    }

    #[tokio::test]
    async fn names_escaping_the_bucket_are_rejected() {
        let store = LocalDirStore::new("/nonexistent");
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                store.exists(&ObjectRef::new("bkt", name)).await,
                Err(StoreError::InvalidName(_))
            ));
        }
        assert!(matches!(
            store.object_path(&ObjectRef::new("../etc", "passwd")),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn connector_ignores_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let connector = LocalConnector::new(tmp.path());
        let store = connector
            .connect(&AuthContext::Delegated {
                target: "sa@example.iam.gserviceaccount.com".into(),
            })
            .await
            .unwrap();
        assert!(!store.exists(&ObjectRef::new("bkt", "a")).await.unwrap());
    }
}
