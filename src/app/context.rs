use crate::cache::EntityCache;
use crate::storage::Repository;
use std::sync::Arc;

/// State shared with every request handler
#[derive(Clone)]
pub struct AppContext {
    pub repository: Arc<dyn Repository>,
    pub cache: Arc<EntityCache>,
}

impl AppContext {
    pub fn new(repository: Arc<dyn Repository>, cache: Arc<EntityCache>) -> Self {
        Self { repository, cache }
    }
}
