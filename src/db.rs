use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("alert_engine_db")]
pub struct EngineDb(sqlx::PgPool);
