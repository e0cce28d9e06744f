pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod effects;
pub mod error;
pub mod gc;
pub mod idempotency;
pub mod model;
pub mod moderation;
pub mod storage;
pub mod submission;

use std::sync::Arc;

use auth::TokenVerifier;
use config::Config;
use db::Database;
use effects::EffectContext;
use storage::BlobStorage;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct AppState {
    pub db: Database,
    pub storage: Arc<dyn BlobStorage>,
    pub tokens: TokenVerifier,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, db: Database, storage: Arc<dyn BlobStorage>) -> Self {
        Self {
            tokens: TokenVerifier::new(&config.jwt_secret),
            db,
            storage,
            config,
        }
    }

    pub fn effects(&self) -> EffectContext {
        EffectContext {
            db: self.db.clone(),
            storage: self.storage.clone(),
        }
    }
}
