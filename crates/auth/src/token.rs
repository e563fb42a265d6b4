//! Bearer-token sources for each auth strategy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::selector::AuthContext;
use crate::{AuthError, CLOUD_PLATFORM_SCOPE, STORAGE_READ_WRITE_SCOPE};

/// Future returned by [`AccessTokenSource::access_token`].
///
/// `Ok(None)` means requests go out without an `Authorization` header.
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<String>, AuthError>> + Send + 'a>>;

/// Something that yields bearer tokens for object-store requests.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> TokenFuture<'_>;
}

/// IAM Credentials endpoint template for minting delegated tokens.
const GENERATE_ACCESS_TOKEN_URL: &str =
    "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/{target}:generateAccessToken";

/// Requested lifetime of a delegated token.
const DELEGATED_TOKEN_LIFETIME: &str = "3600s";

/// Re-mint a delegated token this long before it expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Builds the token source for `ctx`.
///
/// Delegation is exercised once here, so a misconfigured target fails this
/// attempt instead of silently falling back to ambient credentials. A missing
/// ambient identity only warns; requests then go out unauthenticated.
pub async fn token_source(
    ctx: &AuthContext,
    http: &reqwest::Client,
) -> Result<Arc<dyn AccessTokenSource>, AuthError> {
    match ctx {
        AuthContext::StoredKey(blob) => {
            let json = std::str::from_utf8(blob)
                .map_err(|e| AuthError::InvalidKey(format!("key is not UTF-8: {e}")))?;
            let account = CustomServiceAccount::from_json(json)
                .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
            Ok(Arc::new(ProviderTokenSource::new(Arc::new(account))))
        }
        AuthContext::Delegated { target } => {
            let base = gcp_auth::provider().await?;
            let source = ImpersonatedTokenSource::new(http.clone(), base, target.clone());
            source.access_token().await?;
            Ok(Arc::new(source))
        }
        AuthContext::Ambient => match gcp_auth::provider().await {
            Ok(provider) => Ok(Arc::new(ProviderTokenSource::new(provider))),
            Err(e) => {
                tracing::warn!(error = %e, "no ambient credentials found, sending unauthenticated requests");
                Ok(Arc::new(AnonymousSource))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// ProviderTokenSource
// ---------------------------------------------------------------------------

/// Wraps a `gcp_auth` provider (service-account key or ambient credentials).
pub struct ProviderTokenSource {
    provider: Arc<dyn TokenProvider>,
}

impl ProviderTokenSource {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

impl AccessTokenSource for ProviderTokenSource {
    fn access_token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let token = self.provider.token(&[STORAGE_READ_WRITE_SCOPE]).await?;
            Ok(Some(token.as_str().to_string()))
        })
    }
}

// ---------------------------------------------------------------------------
// AnonymousSource
// ---------------------------------------------------------------------------

/// No credentials at all.
#[derive(Debug, Default)]
pub struct AnonymousSource;

impl AccessTokenSource for AnonymousSource {
    fn access_token(&self) -> TokenFuture<'_> {
        Box::pin(async { Ok(None) })
    }
}

// ---------------------------------------------------------------------------
// ImpersonatedTokenSource
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: [&'a str; 1],
    lifetime: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    expire_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Short-lived tokens for `target`, minted with the ambient identity.
///
/// [`token_source`] builds one per attempt, so the cache only spans the
/// requests of that attempt; the next attempt mints a fresh token.
pub struct ImpersonatedTokenSource {
    http: reqwest::Client,
    base: Arc<dyn TokenProvider>,
    target: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ImpersonatedTokenSource {
    pub fn new(http: reqwest::Client, base: Arc<dyn TokenProvider>, target: String) -> Self {
        Self {
            http,
            base,
            target,
            cached: Mutex::new(None),
        }
    }

    async fn mint(&self) -> Result<CachedToken, AuthError> {
        let base_token = self.base.token(&[CLOUD_PLATFORM_SCOPE]).await?;
        let url = GENERATE_ACCESS_TOKEN_URL.replace("{target}", &self.target);

        let response = self
            .http
            .post(url)
            .bearer_auth(base_token.as_str())
            .json(&GenerateAccessTokenRequest {
                scope: [STORAGE_READ_WRITE_SCOPE],
                lifetime: DELEGATED_TOKEN_LIFETIME,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Delegation {
                target: self.target.clone(),
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateAccessTokenResponse = response.json().await?;
        tracing::debug!(target_principal = %self.target, expires_at = %body.expire_time, "delegated token minted");
        Ok(CachedToken {
            token: body.access_token,
            expires_at: body.expire_time,
        })
    }
}

impl AccessTokenSource for ImpersonatedTokenSource {
    fn access_token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let mut cached = self.cached.lock().await;
            if let Some(token) = cached.as_ref()
                && token.is_fresh(Utc::now())
            {
                return Ok(Some(token.token.clone()));
            }
            let fresh = self.mint().await?;
            let token = fresh.token.clone();
            *cached = Some(fresh);
            Ok(Some(token))
        })
    }
}
