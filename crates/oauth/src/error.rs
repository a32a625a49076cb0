/// Errors raised by the credential lifecycle.
///
/// Every variant owns plain data so one outcome can be handed to every caller
/// waiting on a shared refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A required identifier or argument was missing. Raised before any I/O.
    #[error("{message}")]
    Validation { message: String },
    /// No stored credential, or the stored one is expired and can't be renewed.
    #[error("user '{user_id}' is not authenticated with Pipedream")]
    AuthRequired { user_id: String },
    /// Missing, unknown, stale, or mismatched CSRF state.
    #[error("invalid state parameter: {reason}")]
    AuthState { reason: String },
    #[error("token exchange failed: {detail}")]
    TokenExchange { status: Option<u16>, detail: String },
    #[error("token refresh failed: {detail}")]
    TokenRefresh { status: Option<u16>, detail: String },
    #[error("credential persistence failed: {detail}")]
    Persistence { detail: String },
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// `{field} is required`.
    #[must_use]
    pub fn missing(field: &str) -> Self {
        Self::Validation {
            message: format!("{field} is required"),
        }
    }

    #[must_use]
    pub fn auth_required(user_id: impl Into<String>) -> Self {
        Self::AuthRequired {
            user_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn auth_state(reason: impl Into<String>) -> Self {
        Self::AuthState {
            reason: reason.into(),
        }
    }

    /// True when the caller should send the user through authorization again.
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
