use sqlx::PgPool;

/// Runs the SQLx migration set against `pool`. Idempotent: migrations already
/// applied are skipped, tracked in SQLx's own migrations table.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    log::info!("database migrations completed");
    Ok(())
}
