//! Authentication for object-store access.
//!
//! Three strategies, tried in priority order on every upload attempt:
//!
//! 1. **Stored key**: a service-account key blob kept in a local
//!    [`CredentialStore`] (macOS Keychain or a `0600` file).
//! 2. **Delegation**: a configured target identity, exchanged for a
//!    short-lived token scoped to object read/write.
//! 3. **Ambient**: whatever default credentials the environment provides.
//!
//! [`AuthSelector::resolve`] picks the strategy; [`token_source`] turns the
//! resulting [`AuthContext`] into something that yields bearer tokens.

mod credentials;
mod selector;
mod token;

#[cfg(target_os = "macos")]
pub use credentials::KeychainStore;
pub use credentials::{
    CredentialFuture, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    default_credential_store,
};
pub use selector::{AuthContext, AuthSelector};
pub use token::{
    AccessTokenSource, AnonymousSource, ImpersonatedTokenSource, ProviderTokenSource,
    TokenFuture, token_source,
};

/// OAuth scope for object read/write.
pub const STORAGE_READ_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// OAuth scope the ambient identity needs to mint delegated tokens.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Errors produced by credential storage and token acquisition.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Google auth error: {0}")]
    Gcp(#[from] gcp_auth::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delegation to {target} failed ({status}): {message}")]
    Delegation {
        target: String,
        status: u16,
        message: String,
    },
}
