use std::sync::Arc;
use std::time::Instant;

use crate::activity::ActivityLogger;
use crate::auth::jwt::TokenKeys;
use crate::config::AppConfig;
use crate::db::Store;

/// Shared handler state. Cloned per request; everything inside is `Arc`ed.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenKeys>,
    pub activity: ActivityLogger,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig) -> Self {
        let tokens = TokenKeys::new(&config.jwt_secret, config.jwt_expiry_days);
        Self {
            activity: ActivityLogger::new(store.clone()),
            store,
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            started_at: Instant::now(),
        }
    }
}
