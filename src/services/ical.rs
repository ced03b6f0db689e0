//! iCal calendar import.
//!
//! Pulls VEVENTs from a property's external calendar feed and mirrors them as
//! bookings so allocation sees channel reservations too. Manual bookings win:
//! an imported event that would overlap one is skipped.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::ownership::db_pool;
use crate::repository::table_service::{create_row, list_rows, update_row};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub struct IcalEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

pub async fn sync_property_calendar(state: &AppState, property: &Value) -> AppResult<Value> {
    let pool = db_pool(state)?;
    let property_id = property
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let feed_url = property
        .get("ical_import_url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("Property has no ical_import_url configured.".to_string())
        })?;

    let text = fetch_feed(state, feed_url).await?;
    let events = parse_events(&text);

    let mut filters = Map::new();
    filters.insert(
        "property_id".to_string(),
        Value::String(property_id.clone()),
    );
    let existing = list_rows(pool, "bookings", Some(&filters), 1000, 0, "starts_at", true).await?;

    let mut imported = 0_u32;
    let mut updated = 0_u32;
    let mut skipped = 0_u32;

    for event in &events {
        if event.ends_at <= event.starts_at {
            skipped += 1;
            continue;
        }

        let by_uid = existing.iter().find(|row| {
            row.get("external_ref").and_then(Value::as_str) == Some(event.uid.as_str())
        });

        if let Some(row) = by_uid {
            let booking_id = row.get("id").and_then(Value::as_str).unwrap_or_default();
            let unchanged = booking_timestamp(row, "starts_at") == Some(event.starts_at)
                && booking_timestamp(row, "ends_at") == Some(event.ends_at);
            if unchanged || booking_id.is_empty() {
                skipped += 1;
                continue;
            }
            let mut patch = Map::new();
            patch.insert(
                "starts_at".to_string(),
                Value::String(event.starts_at.to_rfc3339()),
            );
            patch.insert(
                "ends_at".to_string(),
                Value::String(event.ends_at.to_rfc3339()),
            );
            update_row(pool, "bookings", booking_id, &patch, "id").await?;
            updated += 1;
            continue;
        }

        let collides = existing.iter().any(|row| {
            let status = row.get("status").and_then(Value::as_str).unwrap_or_default();
            if status == "cancelled" {
                return false;
            }
            match (
                booking_timestamp(row, "starts_at"),
                booking_timestamp(row, "ends_at"),
            ) {
                (Some(from), Some(to)) => event.starts_at < to && event.ends_at > from,
                _ => false,
            }
        });
        if collides {
            skipped += 1;
            continue;
        }

        let mut record = Map::new();
        record.insert(
            "property_id".to_string(),
            Value::String(property_id.clone()),
        );
        record.insert(
            "guest_name".to_string(),
            Value::String(
                event
                    .summary
                    .clone()
                    .unwrap_or_else(|| "Calendar import".to_string()),
            ),
        );
        record.insert(
            "starts_at".to_string(),
            Value::String(event.starts_at.to_rfc3339()),
        );
        record.insert(
            "ends_at".to_string(),
            Value::String(event.ends_at.to_rfc3339()),
        );
        record.insert("status".to_string(), Value::String("upcoming".to_string()));
        record.insert("source".to_string(), Value::String("ical".to_string()));
        record.insert(
            "external_ref".to_string(),
            Value::String(event.uid.clone()),
        );
        create_row(pool, "bookings", &record).await?;
        imported += 1;
    }

    Ok(json!({
        "events": events.len(),
        "imported": imported,
        "updated": updated,
        "skipped": skipped,
    }))
}

async fn fetch_feed(state: &AppState, url: &str) -> AppResult<String> {
    let response = state
        .http_client
        .get(url)
        .send()
        .await
        .map_err(|error| AppError::Dependency(format!("Calendar feed request failed: {error}")))?;
    if !response.status().is_success() {
        return Err(AppError::Dependency(format!(
            "Calendar feed returned HTTP {}.",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|error| AppError::Dependency(format!("Calendar feed read failed: {error}")))
}

fn booking_timestamp(row: &Value, field: &str) -> Option<DateTime<Utc>> {
    row.get(field)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

pub fn parse_events(ics_text: &str) -> Vec<IcalEvent> {
    let mut events = Vec::new();
    let mut current: Option<Map<String, Value>> = None;

    for line in unfold_lines(ics_text) {
        let upper = line.to_ascii_uppercase();
        if upper == "BEGIN:VEVENT" {
            current = Some(Map::new());
            continue;
        }
        if upper == "END:VEVENT" {
            if let Some(properties) = current.take() {
                if let Some(event) = event_from_properties(&properties) {
                    events.push(event);
                }
            }
            continue;
        }
        let Some(properties) = current.as_mut() else {
            continue;
        };
        let Some((name_part, value)) = line.split_once(':') else {
            continue;
        };
        // Parameters (e.g. DTSTART;VALUE=DATE) don't change the date shapes we
        // accept, so only the property name is kept.
        let name = name_part
            .split(';')
            .next()
            .unwrap_or(name_part)
            .trim()
            .to_ascii_uppercase();
        properties.insert(name, Value::String(value.trim().to_string()));
    }

    events
}

fn event_from_properties(properties: &Map<String, Value>) -> Option<IcalEvent> {
    let uid = properties
        .get("UID")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?
        .to_string();
    let starts_at = parse_ical_datetime(properties.get("DTSTART")?.as_str()?)?;
    let ends_at = parse_ical_datetime(properties.get("DTEND")?.as_str()?)?;
    let summary = properties
        .get("SUMMARY")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    Some(IcalEvent {
        uid,
        summary,
        starts_at,
        ends_at,
    })
}

/// Accepts the two shapes channel feeds use: `YYYYMMDDTHHMMSSZ` and the
/// all-day `YYYYMMDD` (interpreted as UTC midnight; DTEND stays exclusive).
fn parse_ical_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(stamp) = NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%SZ") {
        return Some(stamp.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn unfold_lines(text: &str) -> Vec<String> {
    let mut unfolded: Vec<String> = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if (line.starts_with(' ') || line.starts_with('\t')) && !unfolded.is_empty() {
            if let Some(last) = unfolded.last_mut() {
                last.push_str(line.trim_start());
            }
        } else {
            unfolded.push(line.to_string());
        }
    }
    unfolded
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::{parse_events, parse_ical_datetime};

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_timestamp_and_all_day_shapes() {
        assert_eq!(
            parse_ical_datetime("20260401T140000Z"),
            Some(ts("2026-04-01T14:00:00Z"))
        );
        assert_eq!(
            parse_ical_datetime("20260401"),
            Some(ts("2026-04-01T00:00:00Z"))
        );
        assert_eq!(parse_ical_datetime("April 1st"), None);
    }

    #[test]
    fn parses_events_with_folded_lines() {
        let ics = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:abc-123@channel.example\r\nSUMMARY:Reserved - Ja\r\n ne Doe\r\nDTSTART;VALUE=DATE:20260410\r\nDTEND;VALUE=DATE:20260414\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        let events = parse_events(ics);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "abc-123@channel.example");
        assert_eq!(events[0].summary.as_deref(), Some("Reserved - Jane Doe"));
        assert_eq!(events[0].starts_at, ts("2026-04-10T00:00:00Z"));
        assert_eq!(events[0].ends_at, ts("2026-04-14T00:00:00Z"));
    }

    #[test]
    fn events_without_uid_or_dates_are_dropped() {
        let ics = "BEGIN:VEVENT\nSUMMARY:No dates\nEND:VEVENT\nBEGIN:VEVENT\nUID:x\nDTSTART:20260401\nEND:VEVENT\n";
        assert!(parse_events(ics).is_empty());
    }
}
