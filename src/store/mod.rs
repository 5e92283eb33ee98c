pub mod config_versions;
pub mod folder_cursors;
pub mod incidents;
pub mod learning;
pub mod maintenance;
pub mod notifications;
pub mod raw_emails;
pub mod reliability;
pub mod types;

use sqlx::PgPool;

/// Transactional persistence abstraction over every table in the schema. One
/// instance is constructed from the managed pool and cloned (cheap — it just
/// clones the pool handle) into every component that needs storage.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
