use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Canonical rank for escalation comparisons and sorting: info < low < medium < high < critical.
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// One rank lower, for maintenance windows with `suppress_mode = downgrade`.
    /// `Info` stays `Info` — there's nowhere lower to route it.
    pub fn downgraded(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low => Severity::Info,
            Severity::Info => Severity::Info,
        }
    }

    /// Maps a raw tool-reported severity string onto the canonical scale.
    pub fn normalize(raw: &str) -> Self {
        match raw.to_lowercase().trim() {
            "critical" | "crit" | "emergency" | "alert" | "red" => Severity::Critical,
            "excessive" | "firing" | "high" | "major" | "error" => Severity::High,
            "warning" | "warn" | "medium" | "yellow" => Severity::Medium,
            "minor" | "low" => Severity::Low,
            "info" | "informational" | "ok" | "resolved" | "recovery" | "green" => Severity::Info,
            _ => Severity::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "alert_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Firing,
    Resolved,
    Unknown,
}

impl AlertState {
    pub fn normalize(raw: &str) -> Self {
        match raw.to_lowercase().trim() {
            "ok" | "resolved" | "recovery" | "green" | "closed" | "clear" => AlertState::Resolved,
            "problem" | "critical" | "warning" | "firing" | "red" | "yellow" | "triggered" | "open" => {
                AlertState::Firing
            }
            _ => AlertState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "incident_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolving,
    Resolved,
    Suppressed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "resolution_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    ExplicitClear,
    QuietPeriod,
    Manual,
    Maintenance,
    Stale,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "parse_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Pending,
    Success,
    Failed,
    Quarantine,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "quarantine_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    LowConfidence,
    ValidationFailed,
    MissingRequiredFields,
    SuspiciousContent,
    LlmError,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "quarantine_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuarantineAction {
    Approved,
    Rejected,
    Edited,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "extraction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExtractionType {
    CachedMatch,
    LearnedNew,
    LowConfidence,
    Quarantined,
    LlmFailed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "dlq_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    Pending,
    Retrying,
    Resolved,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "idempotency_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "suppress_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuppressMode {
    Mute,
    Downgrade,
    Digest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "maintenance_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceSource {
    Email,
    Manual,
    Graph,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "notification_channel_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannelType {
    Slack,
    Webhook,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Immediate,
    Digest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "notification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_rank_orders_as_expected() {
        assert!(Severity::Info.rank() < Severity::Low.rank());
        assert!(Severity::Low.rank() < Severity::Medium.rank());
        assert!(Severity::Medium.rank() < Severity::High.rank());
        assert!(Severity::High.rank() < Severity::Critical.rank());
    }

    #[test]
    fn severity_normalizes_common_aliases() {
        assert_eq!(Severity::normalize("CRIT"), Severity::Critical);
        assert_eq!(Severity::normalize("warn"), Severity::Medium);
        assert_eq!(Severity::normalize("unknown-thing"), Severity::Medium);
    }

    #[test]
    fn severity_downgrades_one_step() {
        assert_eq!(Severity::Critical.downgraded(), Severity::High);
        assert_eq!(Severity::High.downgraded(), Severity::Medium);
        assert_eq!(Severity::Medium.downgraded(), Severity::Low);
        assert_eq!(Severity::Low.downgraded(), Severity::Info);
    }

    #[test]
    fn severity_downgrade_floors_at_info() {
        assert_eq!(Severity::Info.downgraded(), Severity::Info);
    }

    #[test]
    fn alert_state_normalizes_common_aliases() {
        assert_eq!(AlertState::normalize("OK"), AlertState::Resolved);
        assert_eq!(AlertState::normalize("triggered"), AlertState::Firing);
        assert_eq!(AlertState::normalize("whatever"), AlertState::Unknown);
    }
}
