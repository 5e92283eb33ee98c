use chrono::{DateTime, Duration, Utc};
use rrule::RRuleSet;

use crate::error::PipelineError;

/// Expands an RRULE anchored at `dtstart` into concrete occurrence start
/// times between now and now + `horizon`, each paired with `duration` to
/// form a discrete matching interval. Deterministic given the same rule and
/// horizon, so windows never need to store expanded occurrences.
pub fn expand_occurrences(
    rule: &str,
    dtstart: DateTime<Utc>,
    duration: Duration,
    horizon: Duration,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, PipelineError> {
    let spec = format!(
        "DTSTART:{}\n{}",
        dtstart.format("%Y%m%dT%H%M%SZ"),
        normalize_rrule_line(rule)
    );
    let set: RRuleSet = spec
        .parse()
        .map_err(|e| PipelineError::IcsParse(format!("invalid RRULE '{}': {:?}", rule, e)))?;

    let window_end = Utc::now() + horizon;
    let occurrences = set
        .after(Utc::now().into())
        .before(window_end.into())
        .all(10_000)
        .dates;

    Ok(occurrences
        .into_iter()
        .map(|start| {
            let start_utc: DateTime<Utc> = start.with_timezone(&Utc);
            (start_utc, start_utc + duration)
        })
        .collect())
}

fn normalize_rrule_line(rule: &str) -> String {
    if rule.trim_start().starts_with("RRULE:") {
        rule.trim().to_string()
    } else {
        format!("RRULE:{}", rule.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expands_daily_rule_within_horizon() {
        let dtstart = Utc::now() - Duration::days(1);
        let occurrences = expand_occurrences("FREQ=DAILY;COUNT=5", dtstart, Duration::hours(1), Duration::days(10))
            .expect("rule parses");
        assert!(!occurrences.is_empty());
    }

    #[test]
    fn rejects_malformed_rule() {
        let dtstart = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let result = expand_occurrences("NOT_A_RULE", dtstart, Duration::hours(1), Duration::days(10));
        assert!(result.is_err());
    }
}
