use crate::db::DbPool;
use crate::server::broadcast::BroadcastManager;
use crate::server::registry::SessionRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub registry: Arc<SessionRegistry>,
    pub broadcast: Arc<BroadcastManager>,
}
