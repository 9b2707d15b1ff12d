//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::filter::TableFilter;
use crate::snapshot::SnapshotStore;
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Durable snapshot store
    pub store: Arc<SnapshotStore>,

    /// Pool for the database being crawled, if one is configured
    pub source: Option<Pool>,

    /// Compiled table filter applied to every crawl
    pub filter: TableFilter,

    pub crawl_schema: String,
}

impl AppState {
    pub fn new(store: Arc<SnapshotStore>, source: Option<Pool>, filter: TableFilter, crawl_schema: String) -> Self {
        Self {
            store,
            source,
            filter,
            crawl_schema,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
