#[macro_use]
extern crate rocket;

pub mod adapters;
pub mod config;
pub mod config_versioning;
pub mod correlator;
pub mod db;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod fingerprint;
pub mod idempotency;
pub mod intake;
pub mod maintenance;
pub mod migrations;
pub mod notifier;
pub mod parser;
pub mod redactor;
pub mod request_logger;
pub mod routes;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use rocket_db_pools::Database;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::db::EngineDb;
use crate::enrichment::EnrichmentClient;
use crate::intake::IntakeContext;
use crate::notifier::Notifier;
use crate::parser::learning::LearningExtractor;
use crate::parser::registry::ParserRegistry;
use crate::redactor::Redactor;
use crate::request_logger::RequestLogger;
use crate::store::Store;

static LOGGER: std::sync::Once = std::sync::Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();
    log::info!("starting alert noise-reduction engine");

    rocket::build()
        .attach(RequestLogger)
        .attach(EngineDb::init())
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match EngineDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match migrations::run_migrations(&pool).await {
                        Ok(_) => Ok(rocket),
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Init Pipeline State", |rocket| async move {
            let pool = match EngineDb::fetch(&rocket) {
                Some(db) => (**db).clone(),
                None => {
                    log::error!("database pool not available for pipeline state");
                    return Err(rocket);
                }
            };

            let settings = match Settings::from_env() {
                Ok(settings) => settings,
                Err(err) => {
                    log::error!("failed to load settings: {}", err);
                    return Err(rocket);
                }
            };

            let store = Store::new(pool);
            let redactor = match Redactor::load_active_or_seed(&store, settings.redaction_patterns.as_deref()).await {
                Ok(redactor) => redactor,
                Err(err) => {
                    log::error!("failed to load redaction pattern config: {}", err);
                    return Err(rocket);
                }
            };
            let parser_registry = match ParserRegistry::load_active_or_seed(&store).await {
                Ok(registry) => registry,
                Err(err) => {
                    log::error!("failed to load parser registry config: {}", err);
                    return Err(rocket);
                }
            };

            let learning_extractor = if settings.llm_parsing_enabled {
                match &settings.llm_endpoint {
                    Some(endpoint) => Some(LearningExtractor::new(endpoint.clone(), redactor.clone())),
                    None => {
                        log::warn!("LLM_PARSING_ENABLED is set but LLM_ENDPOINT is missing; learning extractor disabled");
                        None
                    }
                }
            } else {
                None
            };

            let enrichment_client = if settings.rag_enabled {
                match &settings.rag_endpoint {
                    Some(endpoint) => Some(EnrichmentClient::new(
                        endpoint.clone(),
                        settings.rag_timeout(),
                        redactor.clone(),
                    )),
                    None => {
                        log::warn!("RAG_ENABLED is set but RAG_ENDPOINT is missing; enrichment disabled");
                        None
                    }
                }
            } else {
                None
            };

            let notifier = Notifier::new(settings.notification_digest_interval_minutes);

            let ctx = Arc::new(IntakeContext {
                parser_registry,
                learning_extractor,
                redactor,
                notifier: notifier.clone(),
            });

            let cancel = CancellationToken::new();

            Ok(rocket
                .manage(store)
                .manage(settings)
                .manage(ctx)
                .manage(enrichment_client)
                .manage(notifier)
                .manage(cancel))
        }))
        .attach(AdHoc::on_liftoff("Spawn Email Adapter", |rocket| {
            Box::pin(async move {
                let (Some(store), Some(settings), Some(ctx), Some(cancel)) = (
                    rocket.state::<Store>().cloned(),
                    rocket.state::<Settings>().cloned(),
                    rocket.state::<Arc<IntakeContext>>().cloned(),
                    rocket.state::<CancellationToken>().cloned(),
                ) else {
                    log::error!("failed to spawn email adapter: pipeline state unavailable");
                    return;
                };

                let adapter = match adapters::build_adapter(&settings) {
                    Ok(adapter) => adapter,
                    Err(err) => {
                        log::error!("failed to build email adapter: {}", err);
                        return;
                    }
                };

                tokio::spawn(async move {
                    adapters::run_adapter_loop(adapter, store, cancel, move |store, message| {
                        let settings = settings.clone();
                        let ctx = ctx.clone();
                        async move {
                            intake::process_message(&store, &settings, &ctx, message).await;
                        }
                    })
                    .await;
                });
            })
        }))
        .attach(AdHoc::on_liftoff("Spawn Scheduler", |rocket| {
            Box::pin(async move {
                let (Some(store), Some(settings), Some(ctx), Some(enrichment_client), Some(notifier), Some(cancel)) = (
                    rocket.state::<Store>().cloned(),
                    rocket.state::<Settings>().cloned(),
                    rocket.state::<Arc<IntakeContext>>().cloned(),
                    rocket.state::<Option<EnrichmentClient>>().cloned(),
                    rocket.state::<Notifier>().cloned(),
                    rocket.state::<CancellationToken>().cloned(),
                ) else {
                    log::error!("failed to spawn scheduler: pipeline state unavailable");
                    return;
                };

                tokio::spawn(async move {
                    scheduler::run(store, settings, enrichment_client, notifier, ctx, cancel).await;
                });
            })
        }))
        .attach(AdHoc::on_shutdown("Cancel Background Tasks", |rocket| {
            Box::pin(async move {
                if let Some(cancel) = rocket.state::<CancellationToken>() {
                    cancel.cancel();
                }
            })
        }))
        .mount(
            "/api/v1",
            routes![
                routes::health::live_health,
                routes::health::ready_health,
                routes::stats::pipeline_stats,
            ],
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use sqlx::{self, PgPool};

    pub use database::{TestDatabase, TestDatabaseError};

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{core::WaitFor, GenericImage, ImageExt};
        use testcontainers_modules::testcontainers::{
            core::error::TestcontainersError, runners::AsyncRunner, ContainerAsync,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests: launches a
        /// disposable Postgres container and creates a fresh database inside it.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                Self::new().await
            }

            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine").with_wait_for(
                    WaitFor::message_on_stdout("database system is ready to accept connections"),
                );

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            pub async fn reset(&self) -> Result<(), TestDatabaseError> {
                MIGRATOR.run(self.pool()).await?;
                Ok(())
            }

            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ =
                                        drop_database_with_fallback(admin_options.clone(), &db_name)
                                            .await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
    }

    impl TestRocketBuilder {
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
            }
        }

        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                let store = crate::store::Store::new(pool);
                rocket = rocket.manage(store);
            }

            rocket
        }

        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
