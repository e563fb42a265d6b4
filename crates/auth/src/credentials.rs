//! Local secure storage for the service-account key blob.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::AuthError;

/// Future returned by [`CredentialStore`] operations.
pub type CredentialFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send + 'a>>;

/// A keyed store of opaque secret blobs.
///
/// `get` returns `Ok(None)` when nothing is stored under the key.
pub trait CredentialStore: Send + Sync {
    fn get<'a>(
        &'a self,
        service: &'a str,
        account: &'a str,
    ) -> CredentialFuture<'a, Option<Vec<u8>>>;

    /// Stores `secret`, replacing any existing item.
    fn put<'a>(
        &'a self,
        service: &'a str,
        account: &'a str,
        secret: &'a [u8],
    ) -> CredentialFuture<'a, ()>;
}

/// Picks the platform store: the Keychain on macOS.
#[cfg(target_os = "macos")]
pub fn default_credential_store(_config_dir: Option<&Path>) -> Arc<dyn CredentialStore> {
    Arc::new(KeychainStore::new())
}

/// Picks the platform store: a JSON file in `config_dir`.
///
/// Falls back to an in-memory store when no config directory is known.
#[cfg(not(target_os = "macos"))]
pub fn default_credential_store(config_dir: Option<&Path>) -> Arc<dyn CredentialStore> {
    match config_dir {
        Some(dir) => Arc::new(FileCredentialStore::new(dir.join("credentials.json"))),
        None => {
            tracing::warn!("no configuration directory, stored credentials will not persist");
            Arc::new(MemoryCredentialStore::default())
        }
    }
}

// ---------------------------------------------------------------------------
// KeychainStore
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
pub use keychain::KeychainStore;

#[cfg(target_os = "macos")]
mod keychain {
    use security_framework::base::Error as SecError;
    use security_framework::passwords::{get_generic_password, set_generic_password};

    use super::{CredentialFuture, CredentialStore};
    use crate::AuthError;

    /// `errSecItemNotFound`.
    const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

    /// macOS Keychain generic passwords through the Security framework.
    ///
    /// Calls block on the Keychain daemon, so they run on the blocking pool.
    #[derive(Debug, Default)]
    pub struct KeychainStore {
        _priv: (),
    }

    impl KeychainStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl CredentialStore for KeychainStore {
        fn get<'a>(
            &'a self,
            service: &'a str,
            account: &'a str,
        ) -> CredentialFuture<'a, Option<Vec<u8>>> {
            let (service, account) = (service.to_string(), account.to_string());
            Box::pin(async move {
                let found = tokio::task::spawn_blocking(move || {
                    get_generic_password(&service, &account).map_err(|e| e.code())
                })
                .await
                .map_err(|e| AuthError::Store(format!("keychain lookup panicked: {e}")))?;
                lookup_result(found)
            })
        }

        fn put<'a>(
            &'a self,
            service: &'a str,
            account: &'a str,
            secret: &'a [u8],
        ) -> CredentialFuture<'a, ()> {
            let (service, account, secret) =
                (service.to_string(), account.to_string(), secret.to_vec());
            Box::pin(async move {
                tokio::task::spawn_blocking(move || {
                    set_generic_password(&service, &account, &secret)
                })
                .await
                .map_err(|e| AuthError::Store(format!("keychain write panicked: {e}")))?
                .map_err(|e: SecError| AuthError::Store(format!("keychain write failed: {e}")))
            })
        }
    }

    /// Maps a Keychain lookup status onto the store contract.
    fn lookup_result(found: Result<Vec<u8>, i32>) -> Result<Option<Vec<u8>>, AuthError> {
        match found {
            Ok(secret) => Ok(Some(secret)),
            Err(ERR_SEC_ITEM_NOT_FOUND) => Ok(None),
            Err(code) => Err(AuthError::Store(format!(
                "keychain lookup failed (OSStatus {code})"
            ))),
        }
    }

}

// ---------------------------------------------------------------------------
// FileCredentialStore
// ---------------------------------------------------------------------------

/// JSON file of `"service/account" → base64 blob`, readable by the owner only.
///
/// The file is re-read on every `get`, so a rotated key is picked up by the
/// next attempt without a restart.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, AuthError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(map)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %self.path.display(), "credential file written");
        Ok(())
    }
}

fn item_key(service: &str, account: &str) -> String {
    format!("{service}/{account}")
}

impl CredentialStore for FileCredentialStore {
    fn get<'a>(
        &'a self,
        service: &'a str,
        account: &'a str,
    ) -> CredentialFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let map = self.load()?;
            match map.get(&item_key(service, account)) {
                Some(encoded) => BASE64
                    .decode(encoded)
                    .map(Some)
                    .map_err(|e| AuthError::Store(format!("corrupt credential entry: {e}"))),
                None => Ok(None),
            }
        })
    }

    fn put<'a>(
        &'a self,
        service: &'a str,
        account: &'a str,
        secret: &'a [u8],
    ) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            let mut map = self.load()?;
            map.insert(item_key(service, account), BASE64.encode(secret));
            self.persist(&map)
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryCredentialStore
// ---------------------------------------------------------------------------

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    items: RwLock<HashMap<String, Vec<u8>>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn get<'a>(
        &'a self,
        service: &'a str,
        account: &'a str,
    ) -> CredentialFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let items = self
                .items
                .read()
                .map_err(|_| AuthError::Store("credential map poisoned".into()))?;
            Ok(items.get(&item_key(service, account)).cloned())
        })
    }

    fn put<'a>(
        &'a self,
        service: &'a str,
        account: &'a str,
        secret: &'a [u8],
    ) -> CredentialFuture<'a, ()> {
        Box::pin(async move {
            let mut items = self
                .items
                .write()
                .map_err(|_| AuthError::Store("credential map poisoned".into()))?;
            items.insert(item_key(service, account), secret.to_vec());
            Ok(())
        })
    }
}
