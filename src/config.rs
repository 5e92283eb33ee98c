use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    Imap,
    Graph,
    File,
    Outlook,
}

impl EmailProvider {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "imap" => Some(Self::Imap),
            "graph" => Some(Self::Graph),
            "file" => Some(Self::File),
            "outlook" => Some(Self::Outlook),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

/// Typed settings loaded once from the environment at startup. Named accessors
/// and defaults mirror the env surface exactly; `database_url` missing is the
/// only fatal case, everything else falls back to a documented default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,

    pub rag_endpoint: Option<String>,
    pub rag_enabled: bool,
    pub rag_timeout_seconds: u64,

    pub llm_endpoint: Option<String>,
    pub llm_parsing_enabled: bool,

    pub dedupe_window_minutes: i64,
    pub flap_quiet_time_minutes: i64,
    pub incident_auto_resolve_hours: i64,
    pub raw_email_retention_days: i64,
    pub rrule_expansion_horizon_days: i64,
    pub dlq_retention_days: i64,
    pub dlq_retry_batch_size: i64,
    pub dlq_max_retries: i32,
    pub enrichment_batch_size: i64,

    pub redaction_patterns: Option<String>,

    pub email_provider: EmailProvider,

    pub imap_host: Option<String>,
    pub imap_port: u16,
    pub imap_ssl: bool,
    pub imap_user: Option<String>,
    pub imap_password: Option<String>,
    pub imap_folders: Vec<String>,
    pub imap_poll_interval_seconds: u64,
    pub imap_initial_backfill_days: i64,

    pub graph_tenant_id: Option<String>,
    pub graph_client_id: Option<String>,
    pub graph_client_secret: Option<String>,
    pub graph_mailbox: Option<String>,
    pub graph_folder_id: Option<String>,
    pub graph_poll_interval_seconds: u64,

    pub file_watch_path: Option<String>,
    pub file_poll_interval_seconds: u64,

    pub outlook_folders: Vec<String>,

    pub notification_digest_interval_minutes: i64,
    pub scheduler_interval_seconds: u64,

    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let email_provider = std::env::var("EMAIL_PROVIDER")
            .ok()
            .map(|v| {
                EmailProvider::parse(&v)
                    .ok_or_else(|| ConfigError::Invalid("EMAIL_PROVIDER", v.clone()))
            })
            .transpose()?
            .unwrap_or(EmailProvider::Imap);

        Ok(Self {
            database_url,

            rag_endpoint: std::env::var("RAG_ENDPOINT").ok(),
            rag_enabled: env_bool("RAG_ENABLED", false),
            rag_timeout_seconds: env_parse_or("RAG_TIMEOUT_SECONDS", 30),

            llm_endpoint: std::env::var("LLM_ENDPOINT").ok(),
            llm_parsing_enabled: env_bool("LLM_PARSING_ENABLED", false),

            dedupe_window_minutes: env_parse_or("DEDUPE_WINDOW_MINUTES", 10),
            flap_quiet_time_minutes: env_parse_or("FLAP_QUIET_TIME_MINUTES", 30),
            incident_auto_resolve_hours: env_parse_or("INCIDENT_AUTO_RESOLVE_HOURS", 24),
            raw_email_retention_days: env_parse_or("RAW_EMAIL_RETENTION_DAYS", 90),
            rrule_expansion_horizon_days: env_parse_or("RRULE_EXPANSION_HORIZON_DAYS", 90),
            dlq_retention_days: env_parse_or("DLQ_RETENTION_DAYS", 30),
            dlq_retry_batch_size: env_parse_or("DLQ_RETRY_BATCH_SIZE", 20),
            dlq_max_retries: env_parse_or("DLQ_MAX_RETRIES", 5),
            enrichment_batch_size: env_parse_or("ENRICHMENT_BATCH_SIZE", 10),

            redaction_patterns: std::env::var("REDACTION_PATTERNS").ok(),

            email_provider,

            imap_host: std::env::var("IMAP_HOST").ok(),
            imap_port: env_parse_or("IMAP_PORT", 993),
            imap_ssl: env_bool("IMAP_SSL", true),
            imap_user: std::env::var("IMAP_USER").ok(),
            imap_password: std::env::var("IMAP_PASSWORD").ok(),
            imap_folders: env_csv("IMAP_FOLDERS", &["INBOX"]),
            imap_poll_interval_seconds: env_parse_or("IMAP_POLL_INTERVAL_SECONDS", 60),
            imap_initial_backfill_days: env_parse_or("IMAP_INITIAL_BACKFILL_DAYS", 7),

            graph_tenant_id: std::env::var("GRAPH_TENANT_ID").ok(),
            graph_client_id: std::env::var("GRAPH_CLIENT_ID").ok(),
            graph_client_secret: std::env::var("GRAPH_CLIENT_SECRET").ok(),
            graph_mailbox: std::env::var("GRAPH_MAILBOX").ok(),
            graph_folder_id: std::env::var("GRAPH_FOLDER_ID").ok(),
            graph_poll_interval_seconds: env_parse_or("GRAPH_POLL_INTERVAL_SECONDS", 60),

            file_watch_path: std::env::var("FILE_WATCH_PATH").ok(),
            file_poll_interval_seconds: env_parse_or("FILE_POLL_INTERVAL_SECONDS", 15),

            outlook_folders: env_csv("OUTLOOK_FOLDERS", &["Inbox"]),

            notification_digest_interval_minutes: env_parse_or(
                "NOTIFICATION_DIGEST_INTERVAL_MINUTES",
                15,
            ),
            scheduler_interval_seconds: env_parse_or("SCHEDULER_INTERVAL_SECONDS", 60),

            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn dedupe_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.dedupe_window_minutes)
    }

    pub fn flap_quiet_time(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.flap_quiet_time_minutes)
    }

    pub fn incident_auto_resolve(&self) -> chrono::Duration {
        chrono::Duration::hours(self.incident_auto_resolve_hours)
    }

    pub fn rag_timeout(&self) -> Duration {
        Duration::from_secs(self.rag_timeout_seconds)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_seconds)
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_provider_parses_case_insensitively() {
        assert_eq!(EmailProvider::parse("IMAP"), Some(EmailProvider::Imap));
        assert_eq!(EmailProvider::parse("graph"), Some(EmailProvider::Graph));
        assert_eq!(EmailProvider::parse("bogus"), None);
    }

    #[test]
    fn env_csv_falls_back_to_default() {
        std::env::remove_var("TEST_ENGINE_CSV_UNSET");
        assert_eq!(
            env_csv("TEST_ENGINE_CSV_UNSET", &["INBOX"]),
            vec!["INBOX".to_string()]
        );
    }
}
