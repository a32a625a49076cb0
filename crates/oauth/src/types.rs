use {
    pipebridge_config::PipedreamConfig,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// OAuth 2.0 client configuration for the Pipedream authorization server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    /// Scopes requested when the caller passes none.
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    /// Build the endpoint pair from a provider base URL
    /// (`{base}/oauth/authorize` and `{base}/oauth/token`).
    pub fn from_base_url(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            client_id: client_id.into(),
            client_secret,
            auth_url: format!("{base}/oauth/authorize"),
            token_url: format!("{base}/oauth/token"),
            redirect_uri: redirect_uri.into(),
            scopes,
        }
    }
}

impl TryFrom<&PipedreamConfig> for OAuthConfig {
    type Error = Error;

    fn try_from(cfg: &PipedreamConfig) -> Result<Self> {
        let client_id = cfg
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::missing("PIPEDREAM_CLIENT_ID"))?;
        let client_secret = cfg
            .client_secret
            .clone()
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| Error::missing("PIPEDREAM_CLIENT_SECRET"))?;
        Ok(Self::from_base_url(
            &cfg.base_url,
            client_id,
            client_secret,
            cfg.redirect_uri.clone(),
            cfg.default_scopes.clone(),
        ))
    }
}

/// A user's stored OAuth credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Credential {
    /// Has a non-empty refresh token.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|rt| !rt.expose_secret().is_empty())
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Expired, or expiring within `buffer_secs`.
    pub fn needs_refresh(&self, now: u64, buffer_secs: u64) -> bool {
        now.saturating_add(buffer_secs) >= self.expires_at
    }

    /// Expired with no way to renew it.
    pub fn is_terminal(&self, now: u64) -> bool {
        self.is_expired(now) && !self.can_refresh()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A state nonce waiting for its authorization callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub user_id: String,
    /// Unix timestamp (seconds) when the authorization URL was issued.
    pub issued_at: u64,
}

impl PendingAuthorization {
    pub fn is_stale(&self, now: u64, ttl_secs: u64) -> bool {
        now.saturating_sub(self.issued_at) > ttl_secs
    }
}

/// One row of the persisted table: user ids map to credentials,
/// `state:{nonce}` keys map to pending authorizations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredRecord {
    Credential(Credential),
    Pending(PendingAuthorization),
}

impl StoredRecord {
    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Self::Credential(c) => Some(c),
            Self::Pending(_) => None,
        }
    }

    pub fn into_pending(self) -> Option<PendingAuthorization> {
        match self {
            Self::Pending(p) => Some(p),
            Self::Credential(_) => None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through storage.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
