use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::redactor::Redactor;
use crate::store::incidents::RecentEventRow;
use crate::store::types::IncidentRow;
use crate::store::Store;

const MAX_RECENT_EVENTS: i64 = 5;
const RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Serialize)]
struct EnrichmentRequest {
    incident: IncidentSummary,
    recent_events: Vec<EventSummary>,
}

#[derive(Debug, Serialize)]
struct IncidentSummary {
    id: Uuid,
    title: String,
    source_tool: Option<String>,
    environment: Option<String>,
    region: Option<String>,
    host: Option<String>,
    check_name: Option<String>,
    service: Option<String>,
    severity: String,
}

#[derive(Debug, Serialize)]
struct EventSummary {
    source_tool: Option<String>,
    host: Option<String>,
    check_name: Option<String>,
    severity: String,
    state: String,
    occurred_at: chrono::DateTime<chrono::Utc>,
    subject: Option<String>,
    body_excerpt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Runbook {
    pub id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentResponse {
    pub summary: String,
    pub category: Option<String>,
    pub owner_team: Option<String>,
    #[serde(default)]
    pub recommended_checks: Vec<String>,
    #[serde(default)]
    pub suggested_runbooks: Vec<Runbook>,
    #[serde(default)]
    pub safe_actions: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub labels: serde_json::Value,
}

/// Calls the external advisory service for incidents that need a fresh
/// (or first) enrichment pass, redacting free-text fields before they leave
/// the process.
#[derive(Clone)]
pub struct EnrichmentClient {
    http_client: reqwest::Client,
    endpoint: String,
    redactor: Redactor,
}

impl EnrichmentClient {
    pub fn new(endpoint: String, timeout: Duration, redactor: Redactor) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a simple timeout");
        Self {
            http_client,
            endpoint,
            redactor,
        }
    }

    /// Enriches one incident, writing the response back through `store` on
    /// success. Returns `Ok(false)` (not an error) when every attempt fails
    /// or times out — the caller logs and moves to the next incident.
    pub async fn enrich(&self, store: &Store, incident: &IncidentRow) -> Result<bool, PipelineError> {
        let recent_events = store.recent_events_for_incident(incident.id, MAX_RECENT_EVENTS).await?;
        let payload = self.build_payload(incident, &recent_events);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(&payload).await {
                Ok(response) => {
                    store
                        .store_enrichment(
                            incident.id,
                            &response.summary,
                            response.category.as_deref(),
                            response.owner_team.as_deref(),
                            &json!(response.recommended_checks),
                            &json!(response.suggested_runbooks),
                            &json!(response.safe_actions),
                            response.confidence,
                            &json!(response.evidence),
                        )
                        .await?;
                    return Ok(true);
                }
                Err(err) if attempt < RETRY_ATTEMPTS => {
                    log::warn!(
                        "enrichment attempt {}/{} failed for incident {}: {}",
                        attempt, RETRY_ATTEMPTS, incident.id, err
                    );
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
                Err(err) => {
                    log::error!(
                        "enrichment gave up for incident {} after {} attempts: {}",
                        incident.id, RETRY_ATTEMPTS, err
                    );
                    return Ok(false);
                }
            }
        }
    }

    async fn post_once(&self, payload: &EnrichmentRequest) -> Result<EnrichmentResponse, PipelineError> {
        let response = self
            .http_client
            .post(format!("{}/enrich", self.endpoint))
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::ValidationFailed(format!(
                "advisory endpoint returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    fn build_payload(&self, incident: &IncidentRow, recent_events: &[RecentEventRow]) -> EnrichmentRequest {
        EnrichmentRequest {
            incident: IncidentSummary {
                id: incident.id,
                title: self.redactor.redact(&incident.title),
                source_tool: incident.source_tool.clone(),
                environment: incident.environment.clone(),
                region: incident.region.clone(),
                host: incident.host.clone(),
                check_name: incident.check_name.clone(),
                service: incident.service.clone(),
                severity: incident.severity_current.to_string(),
            },
            recent_events: recent_events
                .iter()
                .map(|event| EventSummary {
                    source_tool: event.source_tool.clone(),
                    host: event.host.clone(),
                    check_name: event.check_name.clone().or_else(|| event.service.clone()),
                    severity: event.severity.to_string(),
                    state: format!("{:?}", event.state).to_lowercase(),
                    occurred_at: event.occurred_at,
                    subject: event.subject.as_deref().map(|s| self.redactor.redact(s)),
                    body_excerpt: event
                        .body_text
                        .as_deref()
                        .map(|b| self.redactor.redact(&b.chars().take(1000).collect::<String>())),
                })
                .collect(),
        }
    }
}
