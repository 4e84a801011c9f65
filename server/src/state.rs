use std::sync::Arc;

use devtrack_auth::{AuthService, ProviderConfig};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// Backend-tier provider configuration, secrets included; the token
    /// relay looks providers up here
    providers: Arc<Vec<ProviderConfig>>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, providers: Vec<ProviderConfig>) -> Self {
        Self {
            auth,
            providers: Arc::new(providers),
            http: reqwest::Client::new(),
        }
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}
