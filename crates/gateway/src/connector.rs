//! The long-lived service object: token lifecycle, session cache and tool
//! bridge wired together once at start-up and shared by `Arc`.

use std::{sync::Arc, time::Duration};

use {
    pipebridge_config::PipebridgeConfig,
    pipebridge_mcp::{
        AppCatalog, BridgeTimeouts, ConnectionCache, HttpClientFactory, Result, StaticAppCatalog,
        ToolBridge, ToolDescriptor, ToolExecution,
    },
    pipebridge_oauth::{
        AuthorizationRequest, FileStore, OAuthConfig, OAuthFlow, SweepReport, TokenManager,
    },
    serde_json::Value,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

pub struct Connector {
    tokens: Arc<TokenManager>,
    cache: Arc<ConnectionCache>,
    bridge: ToolBridge,
}

impl Connector {
    pub fn new(tokens: Arc<TokenManager>, cache: Arc<ConnectionCache>, bridge: ToolBridge) -> Self {
        Self {
            tokens,
            cache,
            bridge,
        }
    }

    /// Wire the production stack from config: file-backed store in the data
    /// dir, HTTP token flow, streamable-HTTP sessions.
    pub fn from_config(config: &PipebridgeConfig) -> Result<Self> {
        let oauth = OAuthConfig::try_from(&config.pipedream)?;
        let timeouts = &config.timeouts;

        let flow = OAuthFlow::with_timeout(oauth, Duration::from_secs(timeouts.token_request_secs));
        let store = Arc::new(FileStore::in_dir(&pipebridge_config::data_dir(config)));
        let tokens = Arc::new(TokenManager::new(flow, store));

        let factory = Arc::new(HttpClientFactory::new(
            config.pipedream.mcp_server_url.clone(),
            config.pipedream.project_id.clone(),
            config.pipedream.environment.clone(),
            Duration::from_secs(timeouts.tool_call_secs.max(timeouts.discover_secs)),
        ));
        let cache = Arc::new(
            ConnectionCache::new(Arc::clone(&tokens), factory)
                .with_connect_timeout(Duration::from_secs(timeouts.connect_secs)),
        );

        let catalog: Arc<dyn AppCatalog> =
            Arc::new(StaticAppCatalog::new(config.pipedream.apps.clone()));
        let bridge = ToolBridge::new(Arc::clone(&cache), catalog).with_timeouts(BridgeTimeouts {
            discover: Duration::from_secs(timeouts.discover_secs),
            tool_call: Duration::from_secs(timeouts.tool_call_secs),
        });

        Ok(Self::new(tokens, cache, bridge))
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    pub fn bridge(&self) -> &ToolBridge {
        &self.bridge
    }

    /// Issue a consent URL. Empty `scopes` means the configured defaults.
    pub async fn start_authorization(
        &self,
        user_id: &str,
        scopes: &[String],
    ) -> Result<AuthorizationRequest> {
        Ok(self.tokens.begin_authorization(user_id, scopes).await?)
    }

    /// Finish the redirect leg: validate `state`, trade `code`, store the
    /// credential. Returns the user the credential now belongs to.
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<String> {
        let (user_id, _) = pipebridge_oauth::state::split_state(state)
            .ok_or_else(|| pipebridge_oauth::Error::auth_state("malformed state"))?;
        let user_id = user_id.to_string();
        self.tokens.exchange(code, state).await?;
        Ok(user_id)
    }

    pub async fn is_authenticated(&self, user_id: &str) -> bool {
        self.tokens.is_authenticated(user_id).await
    }

    pub async fn discover_tools(&self, user_id: &str, app: &str) -> Result<Vec<ToolDescriptor>> {
        self.bridge.discover_tools(user_id, app).await
    }

    pub async fn execute_tool(
        &self,
        user_id: &str,
        app: &str,
        tool_name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolExecution> {
        self.bridge
            .execute_tool(user_id, app, tool_name, args, cancel)
            .await
    }

    pub async fn list_connected_apps(&self, user_id: &str) -> Vec<String> {
        self.bridge.list_connected_apps(user_id).await
    }

    /// Close every session of the user, then delete their credential.
    /// Returns whether a credential existed.
    pub async fn disconnect(&self, user_id: &str) -> Result<bool> {
        pipebridge_oauth::validate_user_id(user_id)?;
        let closed = self.cache.close_all(user_id).await;
        let removed = self.tokens.forget(user_id).await?;
        info!(user_id, closed, removed, "user disconnected from Pipedream");
        Ok(removed)
    }

    /// Purge stale nonces and dead credentials; close the sessions of every
    /// user whose credential went away.
    pub async fn sweep(&self) -> SweepReport {
        let report = self.tokens.sweep().await;
        for user_id in &report.removed_users {
            self.cache.close_all(user_id).await;
        }
        if !report.is_empty() {
            info!(
                expired_states = report.expired_states,
                expired_credentials = report.expired_credentials,
                "sweep removed stale entries"
            );
        }
        report
    }

    /// Run [`Connector::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let connector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            debug!(interval_secs = interval.as_secs(), "sweeper started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        connector.sweep().await;
                    },
                }
            }
            debug!("sweeper stopped");
        })
    }

    /// Close every open session.
    pub async fn shutdown(&self) {
        let closed = self.cache.shutdown().await;
        if closed > 0 {
            warn!(closed, "closed MCP sessions on shutdown");
        }
    }
}
