use std::sync::Arc;

use {
    dashmap::DashMap,
    pipebridge_common::{SharedClock, SystemClock},
    secrecy::ExposeSecret,
    tokio::sync::OnceCell,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    flow::{AuthorizationRequest, OAuthFlow},
    state::{STATE_KEY_PREFIX, compose_state, generate_nonce, split_state, state_key},
    storage::SharedStore,
    sweeper::{self, STATE_TTL_SECS, SweepReport},
    types::{Credential, PendingAuthorization, StoredRecord},
};

/// Credentials expiring within this window are refreshed before use.
pub const REFRESH_BUFFER_SECS: u64 = 5 * 60;

type RefreshFlight = Arc<OnceCell<Result<Credential>>>;

/// Owns the per-user credential lifecycle: authorization, code exchange,
/// refresh and expiry.
pub struct TokenManager {
    flow: OAuthFlow,
    store: SharedStore,
    clock: SharedClock,
    /// One shared refresh per user while it is in flight.
    inflight: DashMap<String, RefreshFlight>,
}

/// Reject blank ids and ids that would collide with state nonce keys.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::missing("User ID"));
    }
    if user_id.starts_with(STATE_KEY_PREFIX) {
        return Err(Error::Validation {
            message: format!("User ID must not start with '{STATE_KEY_PREFIX}'"),
        });
    }
    Ok(())
}

impl TokenManager {
    pub fn new(flow: OAuthFlow, store: SharedStore) -> Self {
        Self {
            flow,
            store,
            clock: Arc::new(SystemClock),
            inflight: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Issue a consent URL for `user_id` and remember its state nonce.
    pub async fn begin_authorization(
        &self,
        user_id: &str,
        scopes: &[String],
    ) -> Result<AuthorizationRequest> {
        validate_user_id(user_id)?;

        let nonce = generate_nonce();
        let state = compose_state(user_id, &nonce);
        let url = self.flow.authorization_url(&state, scopes)?;

        self.store
            .set(
                &state_key(&nonce),
                StoredRecord::Pending(PendingAuthorization {
                    user_id: user_id.to_string(),
                    issued_at: self.clock.now(),
                }),
            )
            .await;

        info!(user_id, "authorization started");
        Ok(AuthorizationRequest { url, state, nonce })
    }

    /// Complete an authorization: validate `state`, trade `code` for tokens,
    /// store the credential. Unknown or mismatched state leaves the store
    /// untouched. The nonce is consumed only when the exchange succeeds.
    pub async fn exchange(&self, code: &str, state: &str) -> Result<Credential> {
        if code.trim().is_empty() {
            return Err(Error::missing("Authorization code"));
        }
        if state.trim().is_empty() {
            return Err(Error::missing("State parameter"));
        }
        let (user_id, nonce) =
            split_state(state).ok_or_else(|| Error::auth_state("malformed state"))?;
        let key = state_key(nonce);

        let pending = match self.store.get(&key).await {
            Some(StoredRecord::Pending(p)) => p,
            _ => {
                warn!(user_id, "callback with unknown state");
                return Err(Error::auth_state("unknown or already used state"));
            },
        };
        if pending.user_id != user_id {
            warn!(user_id, "callback state issued to a different user");
            return Err(Error::auth_state("state does not match user"));
        }
        if pending.is_stale(self.clock.now(), STATE_TTL_SECS) {
            return Err(Error::auth_state("state has expired"));
        }

        // Claim the nonce. A concurrent callback with the same state loses here.
        if self.store.delete(&key).await.is_none() {
            return Err(Error::auth_state("unknown or already used state"));
        }

        let tokens = match self.flow.exchange(code).await {
            Ok(t) => t,
            Err(e) => {
                warn!(user_id, error = %e, "token exchange failed");
                self.store.set(&key, StoredRecord::Pending(pending)).await;
                return Err(e);
            },
        };

        let credential = tokens.into_credential(self.clock.now(), None);
        self.store
            .set(user_id, StoredRecord::Credential(credential.clone()))
            .await;
        info!(
            user_id,
            expires_at = credential.expires_at,
            refreshable = credential.can_refresh(),
            "user authenticated"
        );
        Ok(credential)
    }

    /// Stored credential for `user_id`, as is.
    pub async fn credential(&self, user_id: &str) -> Option<Credential> {
        self.store
            .get(user_id)
            .await
            .and_then(StoredRecord::into_credential)
    }

    /// Force a refresh. Joins one already in flight for the same user.
    pub async fn refresh(&self, user_id: &str) -> Result<Credential> {
        validate_user_id(user_id)?;
        self.shared_refresh(user_id, true).await
    }

    /// A credential that stays valid for at least [`REFRESH_BUFFER_SECS`],
    /// refreshing first if needed.
    pub async fn valid_credential(&self, user_id: &str) -> Result<Credential> {
        validate_user_id(user_id)?;
        let credential = self
            .credential(user_id)
            .await
            .ok_or_else(|| Error::auth_required(user_id))?;

        if !credential.needs_refresh(self.clock.now(), REFRESH_BUFFER_SECS) {
            return Ok(credential);
        }
        if !credential.can_refresh() {
            debug!(user_id, "credential expiring with no refresh token");
            return Err(Error::auth_required(user_id));
        }
        self.shared_refresh(user_id, false).await
    }

    /// Whether a credential is stored for the user. An expired, unrefreshable
    /// credential still counts until the sweeper removes it.
    pub async fn is_authenticated(&self, user_id: &str) -> bool {
        validate_user_id(user_id).is_ok() && self.credential(user_id).await.is_some()
    }

    /// Delete the user's credential. Returns whether one existed.
    pub async fn forget(&self, user_id: &str) -> Result<bool> {
        validate_user_id(user_id)?;
        let removed = self.store.delete(user_id).await.is_some();
        if removed {
            info!(user_id, "credential deleted");
        }
        Ok(removed)
    }

    /// Drop stale state nonces and unrecoverable credentials.
    pub async fn sweep(&self) -> SweepReport {
        sweeper::sweep(self.store.as_ref(), self.clock.now()).await
    }

    /// Without `force`, a flight that finds the stored credential already
    /// outside the buffer returns it instead of refreshing again.
    async fn shared_refresh(&self, user_id: &str, force: bool) -> Result<Credential> {
        let flight = {
            let entry = self
                .inflight
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(entry.value())
        };

        let outcome = flight
            .get_or_init(|| self.refresh_now(user_id, force))
            .await
            .clone();

        self.inflight
            .remove_if(user_id, |_, current| Arc::ptr_eq(current, &flight));
        outcome
    }

    async fn refresh_now(&self, user_id: &str, force: bool) -> Result<Credential> {
        let current = self
            .credential(user_id)
            .await
            .ok_or_else(|| Error::auth_required(user_id))?;
        if !force && !current.needs_refresh(self.clock.now(), REFRESH_BUFFER_SECS) {
            debug!(user_id, "credential was refreshed by an earlier caller");
            return Ok(current);
        }
        let Some(refresh_token) = current.refresh_token.clone().filter(|_| current.can_refresh())
        else {
            return Err(Error::auth_required(user_id));
        };

        debug!(user_id, "refreshing access token");
        let tokens = self
            .flow
            .refresh(refresh_token.expose_secret())
            .await
            .inspect_err(|e| warn!(user_id, error = %e, "token refresh failed"))?;
        let rotated = tokens.rotated_refresh_token();

        // A disconnect while the request was in flight wins.
        let updated = tokens.into_credential(self.clock.now(), Some(refresh_token));
        if !self
            .store
            .replace(user_id, StoredRecord::Credential(updated.clone()))
            .await
        {
            info!(user_id, "discarding refresh for disconnected user");
            return Err(Error::auth_required(user_id));
        }
        info!(
            user_id,
            expires_at = updated.expires_at,
            rotated,
            "access token refreshed"
        );
        Ok(updated)
    }
}
