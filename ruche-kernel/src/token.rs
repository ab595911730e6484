//! Access token provider for the cloud API
//!
//! Caches the bearer token and refreshes it via a client-credentials
//! exchange before expiry. The whole lookup+exchange runs under one async
//! mutex, so concurrent callers hitting the refresh window produce exactly
//! one exchange.

use crate::config::KernelConfig;
use crate::gateway::CloudError;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tracing::info;

/// Marge de sécurité avant l'expiration réelle du token.
pub const EXPIRY_MARGIN_SECONDS: i64 = 30;

const MOCK_TOKEN: &str = "mock-token";

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: OffsetDateTime,
}

impl CachedToken {
    fn is_valid(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

pub struct TokenProvider {
    api_base: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    org_id: Option<String>,
    mock: bool,
    client: reqwest::Client,
    cache: tokio::sync::Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(cfg: &KernelConfig) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            org_id: cfg.org_id.clone(),
            mock: cfg.mock_mode(),
            client: reqwest::Client::new(),
            cache: tokio::sync::Mutex::new(None),
        }
    }

    /// Retourne le token en cache tant qu'il est valide, sinon relance un
    /// échange client-credentials et remplace le cache en bloc.
    pub async fn get_token(&self) -> Result<String, CloudError> {
        if self.mock {
            return Ok(MOCK_TOKEN.to_string());
        }

        let mut cache = self.cache.lock().await;
        let now = OffsetDateTime::now_utc();
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid(now) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn exchange(&self) -> Result<CachedToken, CloudError> {
        let (client_id, client_secret) = self
            .client_id
            .as_deref()
            .zip(self.client_secret.as_deref())
            .ok_or(CloudError::Credentials)?;

        let url = format!("{}/v1/clients/token", self.api_base);
        let mut request = self.client.post(&url).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("audience", self.api_base.as_str()),
        ]);
        if let Some(org) = &self.org_id {
            request = request.header("X-Organization", org);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Auth { status: status.as_u16(), body });
        }

        let payload: TokenResponse = response.json().await?;
        let expires_at = compute_expiry(OffsetDateTime::now_utc(), payload.expires_in);
        info!("access token renouvelé (valide jusqu'à {expires_at})");

        Ok(CachedToken { token: payload.access_token, expires_at })
    }
}

/// Expiration en cache : maintenant + expires_in - 30s de marge.
fn compute_expiry(now: OffsetDateTime, expires_in_seconds: i64) -> OffsetDateTime {
    now + Duration::seconds(expires_in_seconds - EXPIRY_MARGIN_SECONDS)
}
