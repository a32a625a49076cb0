use std::error::Error as StdError;

use pipebridge_common::FromMessage;

use crate::types::McpTransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    OAuth(#[from] pipebridge_oauth::Error),
    #[error(transparent)]
    Transport(#[from] McpTransportError),
    /// The remote endpoint for `app` failed; raw transport detail is folded
    /// into `detail`.
    #[error("{app}: {detail}")]
    Remote {
        app: String,
        detail: String,
        unauthorized: bool,
        session_lost: bool,
    },
    /// The connection was closed by a disconnect while it was being opened.
    #[error("connection for user '{user_id}' to '{app}' was closed")]
    Disconnected { user_id: String, app: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wrap any non-credential failure as a typed remote failure for `app`.
    /// Credential and local errors pass through unchanged.
    #[must_use]
    pub fn into_remote(self, app: &str) -> Self {
        match self {
            Self::OAuth(_)
            | Self::Remote { .. }
            | Self::Disconnected { .. }
            | Self::Cancelled => self,
            other => Self::Remote {
                app: app.to_string(),
                detail: other.to_string(),
                unauthorized: other.is_unauthorized(),
                session_lost: other.loses_session(),
            },
        }
    }

    /// The remote endpoint rejected our bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Transport(McpTransportError::Unauthorized { .. })
                | Self::Remote {
                    unauthorized: true,
                    ..
                }
        )
    }

    /// The session that produced this error can't be trusted for another
    /// call: rejected token, timeout, dropped connection, or the remote no
    /// longer knowing the session (404) or failing outright (5xx).
    pub fn loses_session(&self) -> bool {
        match self {
            Self::Transport(McpTransportError::Http { status, .. }) => {
                *status == 404 || *status >= 500
            },
            Self::Transport(McpTransportError::Rpc { .. }) => false,
            Self::Transport(_) | Self::Io(_) | Self::Reqwest(_) | Self::External { .. } => true,
            Self::Remote { session_lost, .. } => *session_lost,
            _ => false,
        }
    }

    /// The user must (re)authorize before this can succeed.
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::OAuth(e) if e.requires_auth())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::OAuth(e) if e.is_validation())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pipebridge_common::impl_context!(Error);
