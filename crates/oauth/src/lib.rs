//! Pipedream OAuth credential lifecycle: consent URLs, code exchange,
//! refresh with a five minute buffer, persistence and expiry sweeps.

pub mod error;
pub mod flow;
pub mod manager;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod types;

pub use {
    error::{Error, Result},
    flow::{AuthorizationRequest, OAuthFlow, TokenResponse},
    manager::{REFRESH_BUFFER_SECS, TokenManager, validate_user_id},
    storage::{CredentialStore, FileStore, MemoryStore, SharedStore, TOKEN_FILE_NAME},
    sweeper::{STATE_TTL_SECS, SweepReport},
    types::{
        Credential, OAuthConfig, PendingAuthorization, StoredRecord, serialize_option_secret,
        serialize_secret,
    },
};
