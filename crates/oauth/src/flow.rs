use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    Error, Result,
    types::{Credential, DEFAULT_EXPIRES_IN_SECS, OAuthConfig},
};

/// Default upper bound for a token endpoint round trip.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest provider error body echoed back in an error.
const MAX_ERROR_BODY: usize = 200;

/// Talks to the Pipedream authorization server: builds consent URLs and runs
/// the authorization-code and refresh-token grants.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

/// Result of starting an authorization.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    /// `{user_id}:{nonce}`, as sent to the provider.
    pub state: String,
    pub nonce: String,
}

/// Token endpoint payload, before it is stamped with an absolute expiry.
#[derive(Clone)]
pub struct TokenResponse {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into a stored credential. `previous_refresh` is kept when the
    /// provider didn't rotate the refresh token.
    pub fn into_credential(self, now: u64, previous_refresh: Option<Secret<String>>) -> Credential {
        let refresh_token = self
            .refresh_token
            .filter(|rt| !rt.expose_secret().is_empty())
            .or(previous_refresh);
        Credential {
            access_token: self.access_token,
            refresh_token,
            expires_at: now.saturating_add(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
            scope: self.scope,
        }
    }

    pub fn rotated_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|rt| !rt.expose_secret().is_empty())
    }
}

#[derive(Clone, Copy)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn failure(self, status: Option<u16>, detail: String) -> Error {
        match self {
            Self::AuthorizationCode => Error::TokenExchange { status, detail },
            Self::RefreshToken => Error::TokenRefresh { status, detail },
        }
    }
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_timeout(config, DEFAULT_TOKEN_TIMEOUT)
    }

    pub fn with_timeout(config: OAuthConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client for token requests");
                reqwest::Client::new()
            });
        Self { config, client }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the consent URL for `state`. Falls back to the configured scopes
    /// when `scopes` is empty.
    pub fn authorization_url(&self, state: &str, scopes: &[String]) -> Result<String> {
        let scope = if scopes.is_empty() {
            self.config.scopes.join(" ")
        } else {
            scopes.join(" ")
        };

        let mut url = Url::parse(&self.config.auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("scope", &scope)
            .append_pair("redirect_uri", &self.config.redirect_uri);

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(&self, code: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        self.request_tokens(Grant::AuthorizationCode, &form).await
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("refresh_token", refresh_token),
        ];
        self.request_tokens(Grant::RefreshToken, &form).await
    }

    async fn request_tokens(&self, grant: Grant, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| grant.failure(None, transport_detail(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = status.canonical_reason().unwrap_or("error");
            let detail = match truncate(body.trim()) {
                "" => format!("{} {reason}", status.as_u16()),
                body => format!("{} {reason}: {body}", status.as_u16()),
            };
            debug!(status = status.as_u16(), "token endpoint rejected request");
            return Err(grant.failure(Some(status.as_u16()), detail));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| grant.failure(Some(status.as_u16()), format!("invalid JSON: {e}")))?;
        parse_token_response(&body).map_err(|detail| grant.failure(Some(status.as_u16()), detail))
    }
}

fn transport_detail(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "token endpoint timed out".into()
    } else {
        e.to_string()
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn parse_token_response(resp: &serde_json::Value) -> std::result::Result<TokenResponse, String> {
    let access_token = resp["access_token"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing access_token in response".to_string())?;

    Ok(TokenResponse {
        access_token: Secret::new(access_token.to_string()),
        refresh_token: resp["refresh_token"]
            .as_str()
            .map(|s| Secret::new(s.to_string())),
        expires_in: resp["expires_in"].as_u64(),
        token_type: resp["token_type"].as_str().map(String::from),
        scope: resp["scope"].as_str().map(String::from),
    })
}
