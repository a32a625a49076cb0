use std::sync::Arc;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    pipebridge_config::PipebridgeConfig,
    pipebridge_gateway::Connector,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Print an authorization URL for a user.
    Start {
        #[arg(long)]
        user: String,
        /// Scope to request; repeat for several. Defaults to the configured scopes.
        #[arg(long)]
        scope: Vec<String>,
    },
    /// Show whether a user has a stored credential and which apps they can reach.
    Status {
        #[arg(long)]
        user: String,
    },
    /// Close a user's sessions and delete their credential.
    Disconnect {
        #[arg(long)]
        user: String,
    },
}

fn connector(config: &PipebridgeConfig) -> Result<Arc<Connector>> {
    if !config.pipedream.is_configured() {
        bail!("Pipedream is not configured: set PIPEDREAM_CLIENT_ID and PIPEDREAM_CLIENT_SECRET");
    }
    Ok(Arc::new(Connector::from_config(config)?))
}

pub async fn handle_auth(config: &PipebridgeConfig, action: AuthAction) -> Result<()> {
    let connector = connector(config)?;
    match action {
        AuthAction::Start { user, scope } => {
            let request = connector.start_authorization(&user, &scope).await?;
            println!("Open this URL to authorize Pipedream access for {user}:\n{}", request.url);
            println!("The link is valid for one hour.");
        },
        AuthAction::Status { user } => {
            if connector.is_authenticated(&user).await {
                let apps = connector.list_connected_apps(&user).await;
                println!("{user}: authenticated");
                println!("apps: {}", apps.join(", "));
            } else {
                println!("{user}: not authenticated");
            }
        },
        AuthAction::Disconnect { user } => {
            if connector.disconnect(&user).await? {
                println!("{user} disconnected from Pipedream");
            } else {
                println!("{user} had no stored credential");
            }
        },
    }
    Ok(())
}

pub async fn sweep(config: &PipebridgeConfig) -> Result<()> {
    let report = connector(config)?.sweep().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
