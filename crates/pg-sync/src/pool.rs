//! Postgres connection pooling (spec.md §5: "the backing-store
//! connection/transaction is a scoped resource acquired per batch"),
//! grounded on `agent-sql`'s bare `sqlx::PgPool` usage.

use sqlx::postgres::PgPoolOptions;
use url::Url;

/// Connects a bounded connection pool. `max_connections` defaults to a
/// small number since each flush holds exactly one connection for the
/// duration of its transaction (spec.md §5 "single backing connection").
pub async fn connect(database_url: &Url, max_connections: u32) -> Result<sqlx::PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url.as_str())
        .await
}
