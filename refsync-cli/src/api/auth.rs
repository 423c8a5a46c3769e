//! OAuth2 client-credentials authentication for Dynamics 365

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::Environment;

const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Token response from Microsoft identity platform
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Access token with its absolute expiry
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenInfo {
    /// True when the token expires within `grace`
    pub fn is_expired(&self, grace: Duration) -> bool {
        Utc::now() + grace >= self.expires_at
    }
}

/// Acquires and caches tokens for one environment
#[derive(Debug)]
pub struct AuthManager {
    environment: Environment,
    http: reqwest::Client,
    token: RwLock<Option<TokenInfo>>,
    grace: Duration,
}

impl AuthManager {
    pub fn new(environment: Environment, http: reqwest::Client) -> Self {
        Self {
            environment,
            http,
            token: RwLock::new(None),
            grace: Duration::minutes(1),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", LOGIN_ENDPOINT, self.environment.tenant_id)
    }

    /// A valid access token, refreshed when close to expiry
    pub async fn token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| !t.is_expired(self.grace)) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.acquire().await?;
        let access_token = token.access_token.clone();
        *self.token.write().await = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call authenticates again
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    async fn acquire(&self) -> Result<TokenInfo> {
        log::debug!("Requesting access token for {}", self.environment.name);

        let scope = format!("{}/.default", self.environment.url);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.environment.client_id.as_str()),
            ("client_secret", self.environment.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .with_context(|| format!("Token request for {} failed", self.environment.name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Authentication against {} failed with HTTP {}: {}",
                self.environment.name,
                status,
                body
            );
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in);

        log::debug!(
            "Acquired token for {}, expires at {}",
            self.environment.name,
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(TokenInfo {
            access_token: token.access_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment() -> Environment {
        Environment {
            name: "dev".to_string(),
            url: "https://dev.crm4.dynamics.com".to_string(),
            tenant_id: "contoso-tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_token_expiry_grace() {
        let token = TokenInfo {
            access_token: "t".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        assert!(!token.is_expired(Duration::minutes(1)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[test]
    fn test_token_url_uses_tenant() {
        let auth = AuthManager::new(environment(), reqwest::Client::new());
        assert_eq!(
            auth.token_url(),
            "https://login.microsoftonline.com/contoso-tenant/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let auth = AuthManager::new(environment(), reqwest::Client::new());
        *auth.token.write().await = Some(TokenInfo {
            access_token: "cached".to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
        });
        assert_eq!(auth.token().await.unwrap(), "cached");
    }
}
