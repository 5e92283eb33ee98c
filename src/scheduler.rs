use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::enrichment::EnrichmentClient;
use crate::intake::IntakeContext;
use crate::maintenance;
use crate::notifier::Notifier;
use crate::store::Store;

/// Background loop that drives every subsystem that isn't triggered directly
/// by an inbound email: stale auto-resolve, maintenance matching, enrichment,
/// DLQ retry, digest flush, and retention housekeeping.
///
/// Runs until `cancel` fires, then lets the current cycle finish and returns.
pub async fn run(
    store: Store,
    settings: Settings,
    enrichment_client: Option<EnrichmentClient>,
    notifier: Notifier,
    ctx: Arc<IntakeContext>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.scheduler_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("scheduler received shutdown signal, exiting");
                return;
            }
            _ = ticker.tick() => {
                run_cycle(&store, &settings, enrichment_client.as_ref(), &notifier, &ctx).await;
            }
        }
    }
}

async fn run_cycle(
    store: &Store,
    settings: &Settings,
    enrichment_client: Option<&EnrichmentClient>,
    notifier: &Notifier,
    ctx: &IntakeContext,
) {
    match store.auto_resolve_stale(settings.incident_auto_resolve()).await {
        Ok(count) if count > 0 => log::info!("auto-resolved {} stale incidents", count),
        Ok(_) => {}
        Err(err) => log::error!("auto-resolve-stale phase failed: {}", err),
    }

    match maintenance::run_match_pass(store, settings.rrule_expansion_horizon_days).await {
        Ok(count) if count > 0 => log::info!("matched {} incidents against maintenance windows", count),
        Ok(_) => {}
        Err(err) => log::error!("maintenance match pass failed: {}", err),
    }
    match maintenance::run_clear_pass(store, settings.rrule_expansion_horizon_days).await {
        Ok(count) if count > 0 => log::info!("cleared maintenance flag on {} incidents", count),
        Ok(_) => {}
        Err(err) => log::error!("maintenance clear pass failed: {}", err),
    }

    if let Some(client) = enrichment_client {
        run_enrichment_phase(store, settings, client).await;
    }

    run_dlq_retry_phase(store, settings, ctx).await;

    match notifier.flush_digests(store).await {
        Ok(count) if count > 0 => log::info!("flushed {} queued digest notifications", count),
        Ok(_) => {}
        Err(err) => log::error!("digest flush phase failed: {}", err),
    }

    run_housekeeping_phase(store, settings).await;
}

async fn run_enrichment_phase(store: &Store, settings: &Settings, client: &EnrichmentClient) {
    let incidents = match store
        .list_incidents_needing_enrichment(settings.enrichment_batch_size)
        .await
    {
        Ok(rows) => rows,
        Err(err) => {
            log::error!("failed to list incidents needing enrichment: {}", err);
            return;
        }
    };

    for incident in incidents {
        match client.enrich(store, &incident).await {
            Ok(true) => log::debug!("enriched incident {}", incident.id),
            Ok(false) => log::warn!("enrichment exhausted retries for incident {}", incident.id),
            Err(err) => log::error!("enrichment phase failed for incident {}: {}", incident.id, err),
        }
        // Yield between calls so one slow advisory service doesn't starve the cycle budget.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
}

async fn run_dlq_retry_phase(store: &Store, settings: &Settings, ctx: &IntakeContext) {
    let claimed = match store.claim_dead_letters_for_retry(settings.dlq_retry_batch_size).await {
        Ok(rows) => rows,
        Err(err) => {
            log::error!("failed to claim dead letter entries: {}", err);
            return;
        }
    };

    for entry in claimed {
        match crate::intake::retry_dead_letter(store, settings, ctx, &entry.event_type, &entry.payload).await {
            Ok(()) => {
                if let Err(err) = store.resolve_dead_letter(entry.id).await {
                    log::error!("failed to mark dead letter {} resolved: {}", entry.id, err);
                }
            }
            Err(err) => {
                log::warn!(
                    "dead letter {} ({}) retry {} failed: {}",
                    entry.id, entry.event_type, entry.retry_count + 1, err
                );
                let backoff = chrono::Duration::minutes(2i64.pow((entry.retry_count + 1).max(0) as u32));
                if let Err(db_err) = store.backoff_dead_letter(entry.id, backoff).await {
                    log::error!("failed to back off dead letter {}: {}", entry.id, db_err);
                }
            }
        }
    }
}

async fn run_housekeeping_phase(store: &Store, settings: &Settings) {
    match store.expire_idempotency_keys().await {
        Ok(count) if count > 0 => log::debug!("expired {} idempotency keys", count),
        Ok(_) => {}
        Err(err) => log::error!("idempotency key expiry failed: {}", err),
    }

    let dlq_cutoff = Utc::now() - chrono::Duration::days(settings.dlq_retention_days);
    match store.prune_dead_letters_before(dlq_cutoff).await {
        Ok(count) if count > 0 => log::debug!("pruned {} resolved/failed dead letter entries", count),
        Ok(_) => {}
        Err(err) => log::error!("dead letter pruning failed: {}", err),
    }

    match store.prune_raw_emails_older_than(settings.raw_email_retention_days).await {
        Ok(count) if count > 0 => log::debug!("pruned {} raw emails past retention", count),
        Ok(_) => {}
        Err(err) => log::error!("raw email pruning failed: {}", err),
    }
}
