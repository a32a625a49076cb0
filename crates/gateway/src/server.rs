use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context as _,
    axum::Router,
    pipebridge_config::PipebridgeConfig,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    connector::Connector,
    routes::{SharedService, pipedream_router},
    services::{LivePipedreamService, NoopPipedreamService},
};

/// The service to mount, plus the connector behind it when configured.
pub struct Wiring {
    pub service: SharedService,
    pub connector: Option<Arc<Connector>>,
}

/// Build the boundary service. Missing client credentials fall back to the
/// no-op service; any other wiring failure is returned.
pub fn build_service(config: &PipebridgeConfig) -> anyhow::Result<Wiring> {
    if !config.pipedream.is_configured() {
        warn!("PIPEDREAM_CLIENT_ID / PIPEDREAM_CLIENT_SECRET not set, Pipedream routes disabled");
        return Ok(Wiring {
            service: Arc::new(NoopPipedreamService),
            connector: None,
        });
    }
    let connector = Arc::new(Connector::from_config(config)?);
    Ok(Wiring {
        service: Arc::new(LivePipedreamService::new(Arc::clone(&connector))),
        connector: Some(connector),
    })
}

pub fn build_app(service: SharedService) -> Router {
    pipedream_router(service)
}

/// Bind, run the sweeper, serve until `shutdown` fires, then close every
/// open MCP session.
pub async fn serve(config: &PipebridgeConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let wiring = build_service(config)?;

    let sweeper = match (&wiring.connector, config.sweeper.enabled) {
        (Some(connector), true) => Some(connector.spawn_sweeper(
            Duration::from_secs(config.sweeper.interval_secs.max(1)),
            shutdown.child_token(),
        )),
        _ => None,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        configured = wiring.service.is_configured(),
        "pipebridge gateway listening"
    );

    let app = build_app(Arc::clone(&wiring.service));
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    if let Some(connector) = wiring.connector {
        connector.shutdown().await;
    }
    info!("pipebridge gateway stopped");
    Ok(())
}
