//! Per-user, per-app cache of open MCP sessions.

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    pipebridge_oauth::{Credential, TokenManager, validate_user_id},
    secrecy::{ExposeSecret, Secret},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    client::McpClientState,
    traits::{ClientFactory, SharedClient},
    types::McpTransportError,
};

/// Default bound on opening a session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub user_id: String,
    pub app: String,
}

impl ConnectionKey {
    pub fn new(user_id: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            app: app.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.app)
    }
}

/// A cached session plus the access token it was opened with.
#[derive(Clone)]
pub struct ClientHandle {
    key: ConnectionKey,
    client: SharedClient,
    bound_token: Secret<String>,
}

impl ClientHandle {
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    fn is_bound_to(&self, credential: &Credential) -> bool {
        self.bound_token.expose_secret() == credential.access_token.expose_secret()
    }

    fn is_ready(&self) -> bool {
        self.client.state() == McpClientState::Ready
    }
}

type Slot = Arc<Mutex<Option<ClientHandle>>>;

/// Reuses sessions across tool calls. At most one live session per key.
/// Only the cache closes sessions.
pub struct ConnectionCache {
    tokens: Arc<TokenManager>,
    factory: Arc<dyn ClientFactory>,
    connect_timeout: Duration,
    slots: DashMap<ConnectionKey, Slot>,
    apps: DashMap<String, BTreeSet<String>>,
}

/// Reject blank user ids and app slugs.
pub fn validate_key(user_id: &str, app: &str) -> Result<()> {
    validate_user_id(user_id)?;
    if app.trim().is_empty() {
        return Err(pipebridge_oauth::Error::missing("App").into());
    }
    Ok(())
}

impl ConnectionCache {
    pub fn new(tokens: Arc<TokenManager>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            tokens,
            factory,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            slots: DashMap::new(),
            apps: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Return the live session for (user, app), opening one if there is none
    /// or the cached one was opened with an older access token.
    pub async fn get_or_create(&self, user_id: &str, app: &str) -> Result<ClientHandle> {
        validate_key(user_id, app)?;

        let credential = match self.tokens.valid_credential(user_id).await {
            Ok(c) => c,
            Err(e) => {
                if e.requires_auth() {
                    self.invalidate(user_id, app).await;
                }
                return Err(e.into());
            },
        };

        let key = ConnectionKey::new(user_id, app);
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        if let Some(handle) = guard.as_ref() {
            if !handle.is_bound_to(&credential) {
                debug!(user_id, app, "access token changed, reopening MCP session");
            } else if !handle.is_ready() {
                debug!(user_id, app, "cached MCP session is no longer ready, reopening");
            } else {
                return Ok(handle.clone());
            }
            if let Some(stale) = guard.take() {
                stale.client.shutdown().await;
            }
        }

        let connected = match tokio::time::timeout(
            self.connect_timeout,
            self.factory.connect(&key, &credential.access_token),
        )
        .await
        {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => {
                warn!(user_id, app, error = %e, "failed to open MCP session");
                Err(e)
            },
            Err(_) => {
                warn!(user_id, app, "timed out opening MCP session");
                Err(McpTransportError::Timeout {
                    method: "initialize".into(),
                    secs: self.connect_timeout.as_secs(),
                }
                .into())
            },
        };
        let client = match connected {
            Ok(client) => client,
            Err(e) => {
                drop(guard);
                self.release_unused(&key, &slot);
                return Err(e);
            },
        };

        // A disconnect may have dropped this slot while we were connecting.
        if !self.is_current(&key, &slot) {
            client.shutdown().await;
            return Err(Error::Disconnected {
                user_id: user_id.to_string(),
                app: app.to_string(),
            });
        }

        let handle = ClientHandle {
            key,
            client,
            bound_token: credential.access_token,
        };
        *guard = Some(handle.clone());
        self.apps
            .entry(user_id.to_string())
            .or_default()
            .insert(app.to_string());
        info!(user_id, app, "MCP session opened");
        Ok(handle)
    }

    /// Close and forget one session, e.g. after the remote rejected its token.
    pub async fn invalidate(&self, user_id: &str, app: &str) -> bool {
        let key = ConnectionKey::new(user_id, app);
        let Some((_, slot)) = self.slots.remove(&key) else {
            return false;
        };
        let closed = close_slot(&slot).await;
        if closed {
            debug!(user_id, app, "MCP session invalidated");
        }
        closed
    }

    /// Close every session of `user_id` and clear their available apps.
    /// Returns how many sessions were closed.
    pub async fn close_all(&self, user_id: &str) -> usize {
        let keys: Vec<ConnectionKey> = self
            .slots
            .iter()
            .filter(|entry| entry.key().user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect();
        let closed = self.close_keys(keys).await;
        self.apps.remove(user_id);
        if closed > 0 {
            info!(user_id, closed, "closed MCP sessions for user");
        }
        closed
    }

    /// Close every session.
    pub async fn shutdown(&self) -> usize {
        let keys: Vec<ConnectionKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        let closed = self.close_keys(keys).await;
        self.apps.clear();
        info!(closed, "MCP connection cache shut down");
        closed
    }

    /// Apps this user has opened a session to, sorted.
    pub fn available_apps(&self, user_id: &str) -> Vec<String> {
        self.apps
            .get(user_id)
            .map(|apps| apps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of open sessions. Keys still connecting or left empty by a
    /// failed connect are not counted.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut open = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                open += 1;
            }
        }
        open
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of keys tracked, open or not.
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, key: &ConnectionKey) -> Slot {
        let entry = self.slots.entry(key.clone()).or_default();
        Arc::clone(entry.value())
    }

    /// Forget an empty slot after a failed connect, unless another caller
    /// is already waiting on it.
    fn release_unused(&self, key: &ConnectionKey, slot: &Slot) {
        self.slots.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) == 2
                && current.try_lock().is_ok_and(|guard| guard.is_none())
        });
    }

    fn is_current(&self, key: &ConnectionKey, slot: &Slot) -> bool {
        self.slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    async fn close_keys(&self, keys: Vec<ConnectionKey>) -> usize {
        let mut closed = 0;
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key)
                && close_slot(&slot).await
            {
                closed += 1;
            }
        }
        closed
    }
}

async fn close_slot(slot: &Slot) -> bool {
    let handle = slot.lock().await.take();
    match handle {
        Some(handle) => {
            handle.client.shutdown().await;
            true
        },
        None => false,
    }
}
