//! Postgres-backed repository implementations.

mod scores;
mod util;

pub use scores::ScopeFilter;
pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query,
};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    scope_filter: ScopeFilter,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool, scope_filter: ScopeFilter) -> Self {
        Self {
            pool: Arc::new(pool),
            scope_filter,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn scope_filter(&self) -> ScopeFilter {
        self.scope_filter
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
