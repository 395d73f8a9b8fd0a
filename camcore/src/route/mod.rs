use std::sync::Arc;

use auth::claims::Claims;

use crate::config::Config;
use crate::consumer::ConsumerRegistry;
use crate::db::DatabaseService;
use crate::error::AppError;
use crate::extract::ExtractionPool;
use crate::hls::RecordingStore;
use crate::result::Result;
use crate::sfu::SfuClient;
use crate::stream::manager::StreamManager;

#[cfg(test)]
mod tests;

pub mod auth_token;
pub mod bookmark;
pub mod consumer;
pub mod device;
pub mod health;
pub mod hls;
pub mod snapshot;
pub mod stream;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseService,
    pub sfu: SfuClient,
    pub streams: Arc<StreamManager>,
    pub consumers: Arc<ConsumerRegistry>,
    pub extractor: Arc<ExtractionPool>,
    pub recordings: RecordingStore,
}

pub fn require_scope(claims: &Claims, scope: &str) -> Result<()> {
    if claims.has_scope(scope) {
        Ok(())
    } else {
        Err(AppError::InsufficientScope(scope.to_string()))
    }
}

pub fn page_limits(limit: Option<u64>, offset: Option<u64>) -> (u64, u64) {
    (limit.unwrap_or(50).clamp(1, 100), offset.unwrap_or(0))
}
