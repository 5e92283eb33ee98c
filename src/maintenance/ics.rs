use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, CalendarComponent, Component, DatePerhapsTime, CalendarDateTime};

use crate::error::PipelineError;

/// What one VEVENT in an inbound .ics part resolved to: either a concrete
/// announcement (create/update a window) or a cancellation of an existing one.
pub enum IcsOutcome {
    Announce(IcsWindow),
    Cancel { external_event_id: String },
}

pub struct IcsWindow {
    pub external_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub organizer: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub timezone: String,
    pub recurrence_rule: Option<String>,
}

/// Parses the `text/calendar` body of a maintenance-announcement email and
/// returns the outcome for each VEVENT found.
pub fn parse_ics(content: &str) -> Result<Vec<IcsOutcome>, PipelineError> {
    let calendar: Calendar = content
        .parse()
        .map_err(|e| PipelineError::IcsParse(format!("{:?}", e)))?;

    let mut outcomes = Vec::new();
    for component in calendar.components.iter() {
        let CalendarComponent::Event(event) = component else {
            continue;
        };

        let uid = event.get_uid().map(str::to_string).unwrap_or_default();
        if uid.is_empty() {
            continue;
        }

        let status = event.property_value("STATUS").map(str::to_uppercase);
        if status.as_deref() == Some("CANCELLED") {
            outcomes.push(IcsOutcome::Cancel {
                external_event_id: uid,
            });
            continue;
        }

        let timezone = resolve_timezone(event);
        let Some(starts_at) = event.get_start().and_then(|dt| resolve_datetime(&dt, &timezone)) else {
            continue;
        };
        let ends_at = event
            .get_end()
            .and_then(|dt| resolve_datetime(&dt, &timezone))
            .unwrap_or(starts_at + Duration::hours(2));

        outcomes.push(IcsOutcome::Announce(IcsWindow {
            external_event_id: uid,
            title: event.get_summary().unwrap_or("Maintenance window").to_string(),
            description: event.get_description().map(str::to_string),
            organizer: event.get_organizer().map(|o| o.to_string()),
            starts_at,
            ends_at,
            timezone: timezone.name().to_string(),
            recurrence_rule: event.property_value("RRULE").map(str::to_string),
        }));
    }

    Ok(outcomes)
}

/// Resolves the governing timezone from `DTSTART`'s TZID parameter, falling
/// back to UTC when absent or unrecognized.
fn resolve_timezone(event: &icalendar::Event) -> Tz {
    event
        .properties()
        .get("DTSTART")
        .and_then(|prop| prop.params().get("TZID"))
        .and_then(|tzid| tzid.value().parse::<Tz>().ok())
        .unwrap_or(Tz::UTC)
}

fn resolve_datetime(value: &DatePerhapsTime, timezone: &Tz) -> Option<DateTime<Utc>> {
    match value {
        DatePerhapsTime::DateTime(dt) => match dt {
            CalendarDateTime::Utc(utc) => Some(*utc),
            CalendarDateTime::Floating(naive) => timezone
                .from_local_datetime(naive)
                .single()
                .map(|d| d.with_timezone(&Utc)),
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                let tz: Tz = tzid.parse().unwrap_or(*timezone);
                tz.from_local_datetime(date_time).single().map(|d| d.with_timezone(&Utc))
            }
        },
        DatePerhapsTime::Date(date) => date_to_start_of_day(*date, timezone),
    }
}

fn date_to_start_of_day(date: NaiveDate, timezone: &Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    timezone.from_local_datetime(&naive).single().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:evt-123\r\nSUMMARY:DB failover drill\r\nDTSTART:20260801T010000Z\r\nDTEND:20260801T030000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    const CANCELLED_ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:evt-123\r\nSTATUS:CANCELLED\r\nDTSTART:20260801T010000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn parses_basic_window() {
        let outcomes = parse_ics(SAMPLE_ICS).expect("parses");
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            IcsOutcome::Announce(window) => {
                assert_eq!(window.external_event_id, "evt-123");
                assert_eq!(window.title, "DB failover drill");
            }
            IcsOutcome::Cancel { .. } => panic!("expected announce"),
        }
    }

    #[test]
    fn recognizes_cancellation() {
        let outcomes = parse_ics(CANCELLED_ICS).expect("parses");
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            IcsOutcome::Cancel { external_event_id } => assert_eq!(external_event_id, "evt-123"),
            IcsOutcome::Announce(_) => panic!("expected cancel"),
        }
    }
}
