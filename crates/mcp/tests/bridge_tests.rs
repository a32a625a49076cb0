#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    pipebridge_common::ManualClock,
    pipebridge_mcp::{
        BridgeTimeouts, ClientFactory, ConnectionCache, ConnectionKey, Error, McpClientState,
        McpClientTrait, SharedClient, StaticAppCatalog, ToolBridge,
        types::{McpToolDef, McpTransportError, ToolContent, ToolsCallResult},
    },
    pipebridge_oauth::{
        Credential, MemoryStore, OAuthConfig, OAuthFlow, StoredRecord, TokenManager,
    },
    secrecy::{ExposeSecret, Secret},
    serde_json::json,
    tokio_util::sync::CancellationToken,
};

const NOW: u64 = 1_700_000_000;

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Ok,
    ToolError,
    Unauthorized,
    SessionGone,
    Slow,
}

struct FakeClient {
    app: String,
    token: String,
    behavior: Behavior,
    closed: AtomicBool,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl McpClientTrait for FakeClient {
    fn server_name(&self) -> &str {
        &self.app
    }

    fn state(&self) -> McpClientState {
        if self.closed.load(Ordering::SeqCst) {
            McpClientState::Closed
        } else {
            McpClientState::Ready
        }
    }

    async fn list_tools(&self) -> pipebridge_mcp::Result<Vec<McpToolDef>> {
        if self.behavior == Behavior::Unauthorized {
            return Err(McpTransportError::Unauthorized {
                www_authenticate: None,
            }
            .into());
        }
        Ok(vec![
            McpToolDef {
                name: "send_message".into(),
                description: Some("Send a message".into()),
                input_schema: json!({"type": "object"}),
            },
            McpToolDef {
                name: "list_channels".into(),
                description: None,
                input_schema: json!({"type": "object"}),
            },
        ])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> pipebridge_mcp::Result<ToolsCallResult> {
        match self.behavior {
            Behavior::Ok => Ok(ToolsCallResult {
                content: vec![ToolContent::Text {
                    text: json!({"tool": name, "args": arguments, "token": self.token})
                        .to_string(),
                }],
                is_error: false,
            }),
            Behavior::ToolError => Ok(ToolsCallResult {
                content: vec![ToolContent::Text {
                    text: "channel not found".into(),
                }],
                is_error: true,
            }),
            Behavior::Unauthorized => Err(McpTransportError::Unauthorized {
                www_authenticate: None,
            }
            .into()),
            Behavior::SessionGone => Err(McpTransportError::Http {
                method: "tools/call".into(),
                status: 404,
                body: "Session not found".into(),
            }
            .into()),
            Behavior::Slow => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(Error::message("unreachable"))
            },
        }
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct FakeFactory {
    behavior: Behavior,
    connect_delay: Duration,
    connects: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
    fail_connect: AtomicBool,
    seen_tokens: Mutex<Vec<String>>,
}

impl FakeFactory {
    fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    fn with_delay(behavior: Behavior, connect_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            connect_delay,
            connects: AtomicUsize::new(0),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            fail_connect: AtomicBool::new(false),
            seen_tokens: Mutex::new(Vec::new()),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(
        &self,
        key: &ConnectionKey,
        access_token: &Secret<String>,
    ) -> pipebridge_mcp::Result<SharedClient> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::message("connection refused"));
        }
        self.seen_tokens
            .lock()
            .unwrap()
            .push(access_token.expose_secret().clone());
        Ok(Arc::new(FakeClient {
            app: key.app.clone(),
            token: access_token.expose_secret().clone(),
            behavior: self.behavior,
            closed: AtomicBool::new(false),
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}

fn tokens(token_url_base: &str) -> Arc<TokenManager> {
    let flow = OAuthFlow::new(OAuthConfig::from_base_url(
        token_url_base,
        "cid",
        Secret::new("cs".into()),
        "http://localhost/cb",
        vec![],
    ));
    Arc::new(
        TokenManager::new(flow, Arc::new(MemoryStore::new()))
            .with_clock(Arc::new(ManualClock::new(NOW))),
    )
}

async fn authenticate(tokens: &TokenManager, user: &str, access: &str) {
    tokens
        .store()
        .set(
            user,
            StoredRecord::Credential(Credential {
                access_token: Secret::new(access.into()),
                refresh_token: Some(Secret::new("rt".into())),
                expires_at: NOW + 3_600,
                token_type: "Bearer".into(),
                scope: None,
            }),
        )
        .await;
}

fn setup(behavior: Behavior) -> (Arc<TokenManager>, Arc<FakeFactory>, Arc<ConnectionCache>) {
    let tokens = tokens("http://127.0.0.1:9");
    let factory = FakeFactory::new(behavior);
    let cache = Arc::new(ConnectionCache::new(Arc::clone(&tokens), factory.clone()));
    (tokens, factory, cache)
}

fn bridge(cache: &Arc<ConnectionCache>) -> ToolBridge {
    ToolBridge::new(Arc::clone(cache), Arc::new(StaticAppCatalog::new(vec![
        "slack".into(),
        "gmail".into(),
    ])))
}

// ── Connection cache ────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_first_access_opens_one_session() {
    let tokens = tokens("http://127.0.0.1:9");
    let factory = FakeFactory::with_delay(Behavior::Ok, Duration::from_millis(50));
    let cache = Arc::new(ConnectionCache::new(Arc::clone(&tokens), factory.clone()));
    authenticate(&tokens, "u1", "at-1").await;

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_create("u1", "slack").await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }
    assert_eq!(factory.connects(), 1);
    let first = handles[0].client();
    assert!(handles.iter().all(|h| Arc::ptr_eq(h.client(), first)));
    assert_eq!(cache.available_apps("u1"), vec!["slack".to_string()]);
}

#[tokio::test]
async fn session_is_reused_while_token_is_unchanged() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;

    let a = cache.get_or_create("u1", "slack").await.unwrap();
    let b = cache.get_or_create("u1", "slack").await.unwrap();
    assert!(Arc::ptr_eq(a.client(), b.client()));
    assert_eq!(factory.connects(), 1);

    // Different app, different session.
    cache.get_or_create("u1", "gmail").await.unwrap();
    assert_eq!(factory.connects(), 2);
    assert_eq!(cache.available_apps("u1"), vec!["gmail".to_string(), "slack".to_string()]);
}

#[tokio::test]
async fn new_access_token_replaces_stale_session() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    let old = cache.get_or_create("u1", "slack").await.unwrap();

    authenticate(&tokens, "u1", "at-2").await;
    let new = cache.get_or_create("u1", "slack").await.unwrap();

    assert!(!Arc::ptr_eq(old.client(), new.client()));
    assert_eq!(old.client().state(), McpClientState::Closed);
    assert_eq!(factory.shutdowns(), 1);
    assert_eq!(*factory.seen_tokens.lock().unwrap(), vec!["at-1", "at-2"]);
}

#[tokio::test]
async fn missing_credential_closes_cached_session() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    let handle = cache.get_or_create("u1", "slack").await.unwrap();

    tokens.store().delete("u1").await;
    let err = cache.get_or_create("u1", "slack").await.err().unwrap();
    assert!(err.requires_auth());
    assert_eq!(handle.client().state(), McpClientState::Closed);
    assert_eq!(factory.shutdowns(), 1);
}

#[tokio::test]
async fn close_all_only_touches_one_user() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    authenticate(&tokens, "u2", "at-2").await;
    cache.get_or_create("u1", "slack").await.unwrap();
    cache.get_or_create("u1", "gmail").await.unwrap();
    let other = cache.get_or_create("u2", "slack").await.unwrap();

    assert_eq!(cache.close_all("u1").await, 2);
    assert!(cache.available_apps("u1").is_empty());
    assert_eq!(cache.available_apps("u2"), vec!["slack".to_string()]);
    assert_eq!(other.client().state(), McpClientState::Ready);
    assert_eq!(factory.shutdowns(), 2);

    assert_eq!(cache.shutdown().await, 1);
    assert_eq!(factory.shutdowns(), 3);
}

#[tokio::test]
async fn disconnect_during_connect_discards_new_session() {
    let tokens = tokens("http://127.0.0.1:9");
    let factory = FakeFactory::with_delay(Behavior::Ok, Duration::from_millis(200));
    let cache = Arc::new(ConnectionCache::new(Arc::clone(&tokens), factory.clone()));
    authenticate(&tokens, "u1", "at-1").await;

    let pending = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_create("u1", "slack").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.close_all("u1").await;

    let err = pending.await.unwrap().err().unwrap();
    assert!(matches!(err, Error::Disconnected { .. }));
    assert_eq!(factory.shutdowns(), 1);
    assert!(cache.available_apps("u1").is_empty());
}

#[tokio::test]
async fn failed_connect_is_retried_next_time() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;

    factory.fail_connect.store(true, Ordering::SeqCst);
    assert!(cache.get_or_create("u1", "slack").await.is_err());
    assert_eq!(cache.tracked_keys(), 0);
    assert!(cache.is_empty().await);

    factory.fail_connect.store(false, Ordering::SeqCst);
    assert!(cache.get_or_create("u1", "slack").await.is_ok());
    assert_eq!(factory.connects(), 2);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn failed_connects_do_not_accumulate_keys() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    factory.fail_connect.store(true, Ordering::SeqCst);

    for app in ["no-such-app-1", "no-such-app-2", "no-such-app-3"] {
        assert!(cache.get_or_create("u1", app).await.is_err());
    }
    assert_eq!(cache.tracked_keys(), 0);
    assert!(cache.available_apps("u1").is_empty());
}

#[tokio::test]
async fn closed_session_is_reopened() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;

    let first = cache.get_or_create("u1", "slack").await.unwrap();
    first.client().shutdown().await;

    let second = cache.get_or_create("u1", "slack").await.unwrap();
    assert!(!Arc::ptr_eq(first.client(), second.client()));
    assert_eq!(second.client().state(), McpClientState::Ready);
    assert_eq!(factory.connects(), 2);
}

#[tokio::test]
async fn blank_ids_are_rejected() {
    let (_tokens, factory, cache) = setup(Behavior::Ok);
    assert!(cache.get_or_create("", "slack").await.err().unwrap().is_validation());
    assert!(cache.get_or_create("u1", " ").await.err().unwrap().is_validation());
    assert_eq!(factory.connects(), 0);
}

// ── Tool bridge ─────────────────────────────────────────────────────

#[tokio::test]
async fn discover_requires_authentication() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    let bridge = bridge(&cache);

    let err = bridge.discover_tools("u1", "slack").await.unwrap_err();
    assert!(err.requires_auth());
    assert_eq!(factory.connects(), 0);

    authenticate(&tokens, "u1", "at-1").await;
    let tools = bridge.discover_tools("u1", "slack").await.unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].full_name, "pipedream-slack-send_message");
    assert_eq!(tools[1].description, "slack tool: list_channels");
}

#[tokio::test]
async fn discover_unauthorized_is_remote_error_and_drops_session() {
    let (tokens, factory, cache) = setup(Behavior::Unauthorized);
    authenticate(&tokens, "u1", "at-1").await;
    let bridge = bridge(&cache);

    let err = bridge.discover_tools("u1", "slack").await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref app, .. } if app == "slack"));
    assert!(err.is_unauthorized());
    assert_eq!(factory.shutdowns(), 1);

    // Next call opens a fresh session.
    let _ = bridge.discover_tools("u1", "slack").await;
    assert_eq!(factory.connects(), 2);
}

#[tokio::test]
async fn expired_remote_session_is_dropped_and_reopened() {
    let (tokens, factory, cache) = setup(Behavior::SessionGone);
    authenticate(&tokens, "u1", "at-1").await;
    let bridge = bridge(&cache);

    for _ in 0..3 {
        let result = bridge
            .execute_tool("u1", "slack", "send_message", json!({}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Session not found"));
    }
    // Every failure closed its session, so each call opened a new one.
    assert_eq!(factory.connects(), 3);
    assert_eq!(factory.shutdowns(), 3);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn tool_errors_keep_the_session() {
    let (tokens, factory, cache) = setup(Behavior::ToolError);
    authenticate(&tokens, "u1", "at-1").await;
    let bridge = bridge(&cache);

    for _ in 0..2 {
        let result = bridge
            .execute_tool("u1", "slack", "send_message", json!({}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
    }
    assert_eq!(factory.connects(), 1);
    assert_eq!(factory.shutdowns(), 0);
}

#[tokio::test]
async fn execute_returns_parsed_data() {
    let (tokens, _factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    let bridge = bridge(&cache);

    let result = bridge
        .execute_tool(
            "u1",
            "slack",
            "send_message",
            json!({"text": "hi"}),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["tool"], "send_message");
    assert_eq!(data["args"]["text"], "hi");
}

#[tokio::test]
async fn execute_defaults_null_args_to_object() {
    let (tokens, _factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    let result = bridge(&cache)
        .execute_tool("u1", "slack", "list_channels", json!(null), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.data.unwrap()["args"], json!({}));
}

#[tokio::test]
async fn execute_captures_tool_errors() {
    let (tokens, _factory, cache) = setup(Behavior::ToolError);
    authenticate(&tokens, "u1", "at-1").await;

    let result = bridge(&cache)
        .execute_tool("u1", "slack", "send_message", json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.data.is_none());
    assert_eq!(result.error.as_deref(), Some("channel not found"));
}

#[tokio::test]
async fn execute_captures_connection_failures() {
    let (tokens, factory, cache) = setup(Behavior::Ok);
    authenticate(&tokens, "u1", "at-1").await;
    factory.fail_connect.store(true, Ordering::SeqCst);

    let result = bridge(&cache)
        .execute_tool("u1", "slack", "send_message", json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn execute_preconditions_are_raised() {
    let (_tokens, _factory, cache) = setup(Behavior::Ok);
    let bridge = bridge(&cache);
    let cancel = CancellationToken::new();

    let err = bridge
        .execute_tool("u1", "slack", "send_message", json!({}), &cancel)
        .await
        .unwrap_err();
    assert!(err.requires_auth());

    let err = bridge
        .execute_tool("u1", "slack", "", json!({}), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn execute_times_out() {
    let (tokens, _factory, cache) = setup(Behavior::Slow);
    authenticate(&tokens, "u1", "at-1").await;
    let bridge = bridge(&cache).with_timeouts(BridgeTimeouts {
        discover: Duration::from_secs(1),
        tool_call: Duration::from_millis(50),
    });

    let result = bridge
        .execute_tool("u1", "slack", "send_message", json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn execute_honors_cancellation() {
    let (tokens, _factory, cache) = setup(Behavior::Slow);
    authenticate(&tokens, "u1", "at-1").await;
    let bridge = bridge(&cache);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = bridge
        .execute_tool("u1", "slack", "send_message", json!({}), &cancel)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("operation cancelled"));
}

#[tokio::test]
async fn connected_apps_merge_catalog_and_sessions() {
    let (tokens, _factory, cache) = setup(Behavior::Ok);
    let bridge = bridge(&cache);
    assert!(bridge.list_connected_apps("u1").await.is_empty());

    authenticate(&tokens, "u1", "at-1").await;
    cache.get_or_create("u1", "notion").await.unwrap();
    cache.get_or_create("u1", "slack").await.unwrap();

    let apps = bridge.list_connected_apps("u1").await;
    assert_eq!(apps, vec!["slack", "gmail", "notion"]);
}

#[tokio::test]
async fn refresh_near_expiry_reopens_session_with_new_token() {
    let mut server = mockito::Server::new_async().await;
    let refresh = server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let clock = Arc::new(ManualClock::new(NOW));
    let flow = OAuthFlow::new(OAuthConfig::from_base_url(
        &server.url(),
        "cid",
        Secret::new("cs".into()),
        "http://localhost/cb",
        vec![],
    ));
    let tokens = Arc::new(
        TokenManager::new(flow, Arc::new(MemoryStore::new())).with_clock(clock.clone()),
    );
    let factory = FakeFactory::new(Behavior::Ok);
    let cache = Arc::new(ConnectionCache::new(Arc::clone(&tokens), factory.clone()));
    authenticate(&tokens, "u1", "at-1").await;

    let bridge = bridge(&cache);
    let cancel = CancellationToken::new();
    let first = bridge
        .execute_tool("u1", "slack", "send_message", json!({}), &cancel)
        .await
        .unwrap();
    assert_eq!(first.data.unwrap()["token"], "at-1");

    // 3595s later the credential is five seconds from expiry.
    clock.advance(3_595);
    let second = bridge
        .execute_tool("u1", "slack", "send_message", json!({}), &cancel)
        .await
        .unwrap();
    assert_eq!(second.data.unwrap()["token"], "at-2");
    assert_eq!(factory.connects(), 2);
    assert_eq!(factory.shutdowns(), 1);
    refresh.assert_async().await;
}
