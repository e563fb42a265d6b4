//! Auth strategy selection.

use std::fmt;
use std::sync::Arc;

use crate::credentials::CredentialStore;

/// Credentials chosen for one upload attempt.
///
/// Never cached: each attempt resolves its own so a rotated or revoked key
/// takes effect on the very next file.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthContext {
    /// Service-account key blob from the local credential store.
    StoredKey(Vec<u8>),
    /// Impersonate `target` with a short-lived token.
    Delegated { target: String },
    /// Environment / platform default credentials.
    Ambient,
}

impl AuthContext {
    /// Short strategy name for logs.
    pub fn strategy(&self) -> &'static str {
        match self {
            AuthContext::StoredKey(_) => "stored-key",
            AuthContext::Delegated { .. } => "delegated",
            AuthContext::Ambient => "ambient",
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthContext::StoredKey(blob) => f
                .debug_tuple("StoredKey")
                .field(&format_args!("<{} bytes>", blob.len()))
                .finish(),
            AuthContext::Delegated { target } => f
                .debug_struct("Delegated")
                .field("target", target)
                .finish(),
            AuthContext::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Chooses among stored key, delegation and ambient credentials.
pub struct AuthSelector {
    store: Arc<dyn CredentialStore>,
    service: String,
    account: String,
    delegate: Option<String>,
}

impl AuthSelector {
    /// Creates a selector reading the key at (`service`, `account`) and
    /// falling back to `delegate` when set.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        service: impl Into<String>,
        account: impl Into<String>,
        delegate: Option<String>,
    ) -> Self {
        Self {
            store,
            service: service.into(),
            account: account.into(),
            delegate,
        }
    }

    /// Picks the first available strategy.
    ///
    /// An unreadable or empty stored item counts as absent. Falling through
    /// to ambient credentials only logs a warning.
    pub async fn resolve(&self) -> AuthContext {
        match self.store.get(&self.service, &self.account).await {
            Ok(Some(blob)) if !blob.is_empty() => return AuthContext::StoredKey(blob),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "stored credential unavailable");
            }
        }

        if let Some(target) = &self.delegate {
            return AuthContext::Delegated {
                target: target.clone(),
            };
        }

        tracing::warn!(
            "no stored service account key and no impersonation target, using ambient default credentials"
        );
        AuthContext::Ambient
    }

    /// Logs the strategy the next attempt would use.
    pub async fn log_strategy(&self) {
        match self.resolve().await {
            AuthContext::StoredKey(_) => {
                tracing::info!("authentication strategy: stored service account key");
            }
            AuthContext::Delegated { target } => {
                tracing::info!(principal = %target, "authentication strategy: impersonating service account");
            }
            AuthContext::Ambient => {
                tracing::info!("authentication strategy: ambient default credentials");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialFuture, MemoryCredentialStore};
    use crate::AuthError;

    const SERVICE: &str = "bucketdrop-sa-key";
    const ACCOUNT: &str = "default";
    const TARGET: &str = "uploader@example.iam.gserviceaccount.com";

    async fn store_with(blob: Option<&[u8]>) -> Arc<dyn CredentialStore> {
        let store = MemoryCredentialStore::default();
        if let Some(blob) = blob {
            store.put(SERVICE, ACCOUNT, blob).await.unwrap();
        }
        Arc::new(store)
    }

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn get<'a>(
            &'a self,
            _service: &'a str,
            _account: &'a str,
        ) -> CredentialFuture<'a, Option<Vec<u8>>> {
            Box::pin(async { Err(AuthError::Store("keychain locked".into())) })
        }

        fn put<'a>(
            &'a self,
            _service: &'a str,
            _account: &'a str,
            _secret: &'a [u8],
        ) -> CredentialFuture<'a, ()> {
            Box::pin(async { Err(AuthError::Store("keychain locked".into())) })
        }
    }

    #[tokio::test]
    async fn stored_key_wins_over_delegation() {
        let store = store_with(Some(b"{\"type\":\"service_account\"}")).await;
        let selector = AuthSelector::new(store, SERVICE, ACCOUNT, Some(TARGET.into()));

        let ctx = selector.resolve().await;
        assert_eq!(ctx, AuthContext::StoredKey(b"{\"type\":\"service_account\"}".to_vec()));
    }

    #[tokio::test]
    async fn delegation_when_no_stored_key() {
        let selector = AuthSelector::new(store_with(None).await, SERVICE, ACCOUNT, Some(TARGET.into()));
        assert_eq!(
            selector.resolve().await,
            AuthContext::Delegated {
                target: TARGET.into()
            }
        );
    }

    #[tokio::test]
    async fn ambient_as_last_resort() {
        let selector = AuthSelector::new(store_with(None).await, SERVICE, ACCOUNT, None);
        assert_eq!(selector.resolve().await, AuthContext::Ambient);
    }

    #[tokio::test]
    async fn empty_blob_counts_as_absent() {
        let selector = AuthSelector::new(store_with(Some(b"")).await, SERVICE, ACCOUNT, None);
        assert_eq!(selector.resolve().await, AuthContext::Ambient);
    }

    #[tokio::test]
    async fn unreadable_store_falls_through() {
        let selector = AuthSelector::new(Arc::new(BrokenStore), SERVICE, ACCOUNT, Some(TARGET.into()));
        assert_eq!(selector.resolve().await.strategy(), "delegated");
    }

    #[tokio::test]
    async fn resolve_is_not_cached() {
        let store = Arc::new(MemoryCredentialStore::default());
        let selector = AuthSelector::new(store.clone(), SERVICE, ACCOUNT, None);
        assert_eq!(selector.resolve().await, AuthContext::Ambient);

        store.put(SERVICE, ACCOUNT, b"rotated").await.unwrap();
        assert_eq!(selector.resolve().await, AuthContext::StoredKey(b"rotated".to_vec()));
    }

    #[test]
    fn debug_redacts_key_material() {
        let ctx = AuthContext::StoredKey(b"private_key".to_vec());
        let shown = format!("{ctx:?}");
        assert!(!shown.contains("private_key"));
        assert!(shown.contains("11 bytes"));
    }
}
