//! Which apps a user can reach.

use async_trait::async_trait;

/// Source of the apps a user has connected on the platform side.
#[async_trait]
pub trait AppCatalog: Send + Sync {
    async fn list_connected_apps(&self, user_id: &str) -> Vec<String>;
}

/// A fixed list of popular apps, offered to every authenticated user.
pub struct StaticAppCatalog {
    apps: Vec<String>,
}

impl StaticAppCatalog {
    pub fn new(apps: Vec<String>) -> Self {
        Self { apps }
    }
}

impl Default for StaticAppCatalog {
    fn default() -> Self {
        Self::new(pipebridge_config::PipedreamConfig::default().apps)
    }
}

#[async_trait]
impl AppCatalog for StaticAppCatalog {
    async fn list_connected_apps(&self, _user_id: &str) -> Vec<String> {
        self.apps.clone()
    }
}
