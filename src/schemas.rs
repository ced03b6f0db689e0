use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::error::AppError;

pub const BOOKING_STATUSES: &[&str] = &["upcoming", "active", "completed", "cancelled"];
pub const CLEANING_STATUSES: &[&str] = &["scheduled", "completed", "cancelled"];
pub const EXPENSE_FREQUENCIES: &[&str] = &["monthly", "yearly"];

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_timezone_utc() -> String {
    "UTC".to_string()
}
fn default_booking_status() -> String {
    "upcoming".to_string()
}
fn default_cleaning_status() -> String {
    "scheduled".to_string()
}
fn default_frequency_monthly() -> String {
    "monthly".to_string()
}
fn default_false() -> bool {
    false
}

// ---------------------------------------------------------------------------
// Create / update inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default = "default_timezone_utc")]
    pub timezone: String,
    #[validate(range(min = 0))]
    pub price_per_kwh_cents: Option<i64>,
    #[validate(url)]
    pub ical_import_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub timezone: Option<String>,
    #[validate(range(min = 0))]
    pub price_per_kwh_cents: Option<i64>,
    #[validate(url)]
    pub ical_import_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBookingInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 255))]
    pub guest_name: String,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(default = "default_booking_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateBookingInput {
    #[validate(length(min = 1, max = 255))]
    pub guest_name: Option<String>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateExpenseInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(range(min = 0))]
    pub amount_cents: i64,
    #[serde(default = "default_frequency_monthly")]
    pub frequency: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateExpenseInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(range(min = 0))]
    pub amount_cents: Option<i64>,
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateMeterReadingInput {
    pub property_id: String,
    #[validate(range(min = 0))]
    pub reading_wh: i64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateMeterReadingInput {
    #[validate(range(min = 0))]
    pub reading_wh: Option<i64>,
    pub recorded_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateCleaningEventInput {
    pub property_id: String,
    pub booking_id: Option<String>,
    pub scheduled_at: String,
    #[validate(range(min = 0))]
    pub cost_cents: i64,
    #[serde(default = "default_cleaning_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateCleaningEventInput {
    pub booking_id: Option<String>,
    pub scheduled_at: Option<String>,
    #[validate(range(min = 0))]
    pub cost_cents: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateGuestPageInput {
    pub property_id: String,
    pub slug: String,
    #[serde(default = "default_false")]
    pub published: bool,
    #[serde(default)]
    pub blocks: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateGuestPageInput {
    pub slug: Option<String>,
    pub blocks: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanInput {
    pub slug: String,
    pub user_agent: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RecomputeAllocationsInput {
    pub property_id: String,
    pub month: String,
}

// ---------------------------------------------------------------------------
// List queries (all paginated via raw page/page_size strings)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingsQuery {
    pub property_id: String,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpensesQuery {
    pub property_id: String,
    pub frequency: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterReadingsQuery {
    pub property_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleaningEventsQuery {
    pub property_id: String,
    pub status: Option<String>,
    pub month: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestPagesQuery {
    pub property_id: String,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationsQuery {
    pub property_id: String,
    pub month: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

// ---------------------------------------------------------------------------
// Path params
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyPath {
    pub property_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingPath {
    pub booking_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpensePath {
    pub expense_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterReadingPath {
    pub reading_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleaningEventPath {
    pub cleaning_event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestPagePath {
    pub guest_page_id: String,
}

// ---------------------------------------------------------------------------
// Helpers shared by route modules
// ---------------------------------------------------------------------------

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn require_uuid(field: &str, value: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(value.trim())
        .map_err(|_| AppError::UnprocessableEntity(format!("{field}: must be a UUID.")))
}

pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| {
            AppError::UnprocessableEntity(format!(
                "{field}: must be an RFC 3339 date-time (e.g. 2026-03-01T14:00:00Z)."
            ))
        })
}

/// Parse a `YYYY-MM` allocation period label into (year, month).
pub fn parse_month(value: &str) -> Result<(i32, u32), AppError> {
    let parsed = NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
        .map_err(|_| AppError::UnprocessableEntity("month: must be formatted YYYY-MM.".to_string()))?;
    use chrono::Datelike;
    Ok((parsed.year(), parsed.month()))
}

/// Normalize a status/frequency value against its closed set.
pub fn require_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<String, AppError> {
    let normalized = value.trim().to_ascii_lowercase();
    if allowed.contains(&normalized.as_str()) {
        return Ok(normalized);
    }
    Err(AppError::UnprocessableEntity(format!(
        "{field}: must be one of {}.",
        allowed.join(", ")
    )))
}

/// Slugs are lowercase alphanumerics and hyphens, 3-64 chars, no leading or
/// trailing hyphen.
pub fn require_slug(value: &str) -> Result<String, AppError> {
    let slug = value.trim().to_ascii_lowercase();
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if slug.len() < 3
        || slug.len() > 64
        || !valid_chars
        || slug.starts_with('-')
        || slug.ends_with('-')
    {
        return Err(AppError::UnprocessableEntity(
            "slug: must be 3-64 lowercase letters, digits or hyphens.".to_string(),
        ));
    }
    Ok(slug)
}

pub fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{parse_month, parse_timestamp, require_one_of, require_slug, BOOKING_STATUSES};

    #[test]
    fn month_labels_parse() {
        assert_eq!(parse_month("2026-03").unwrap(), (2026, 3));
        assert!(parse_month("2026-13").is_err());
        assert!(parse_month("march").is_err());
    }

    #[test]
    fn timestamps_must_be_rfc3339() {
        assert!(parse_timestamp("starts_at", "2026-03-01T14:00:00Z").is_ok());
        assert!(parse_timestamp("starts_at", "2026-03-01 14:00").is_err());
    }

    #[test]
    fn statuses_normalize_case() {
        assert_eq!(
            require_one_of("status", "UPCOMING", BOOKING_STATUSES).unwrap(),
            "upcoming"
        );
        assert!(require_one_of("status", "paused", BOOKING_STATUSES).is_err());
    }

    #[test]
    fn slug_rules() {
        assert_eq!(require_slug("Loft-12").unwrap(), "loft-12");
        assert!(require_slug("ab").is_err());
        assert!(require_slug("-loft").is_err());
        assert!(require_slug("loft_12").is_err());
    }
}
