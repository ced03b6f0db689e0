//! Cost allocation: distributes a billing period's metered and fixed costs
//! across the bookings that occupied the property during that period.
//!
//! The arithmetic is all integer cents. Shares are computed with
//! largest-remainder rounding so the cents handed out always sum to the
//! rounded total for the period; leftover cents go to the longest-staying
//! booking first.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row_tx, delete_rows_tx};

#[derive(Debug, Clone)]
pub struct AllocationPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `YYYY-MM` label the allocation rows are keyed by.
    pub label: String,
}

impl AllocationPeriod {
    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }
}

/// Calendar-month bounds in the property's timezone, expressed as UTC
/// instants. Falls back to UTC when the stored timezone name is invalid.
pub fn month_period(year: i32, month: u32, timezone: &str) -> Result<AllocationPeriod, AppError> {
    if !(1..=12).contains(&month) {
        return Err(AppError::UnprocessableEntity(
            "month: must be between 01 and 12.".to_string(),
        ));
    }
    let tz: Tz = timezone.trim().parse().unwrap_or(chrono_tz::UTC);
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    let start = local_midnight(tz, year, month)?;
    let end = local_midnight(tz, next_year, next_month)?;
    Ok(AllocationPeriod {
        start,
        end,
        label: format!("{year:04}-{month:02}"),
    })
}

fn local_midnight(tz: Tz, year: i32, month: u32) -> Result<DateTime<Utc>, AppError> {
    tz.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| AppError::Internal("Could not resolve period boundary.".to_string()))
}

#[derive(Debug, Clone)]
pub struct StayInput {
    pub booking_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodCosts {
    pub consumption_cents: i64,
    pub fixed_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayAllocation {
    pub booking_id: Uuid,
    pub occupied_seconds: i64,
    pub consumption_cents: i64,
    pub fixed_cents: i64,
    pub cleaning_cents: i64,
    pub total_cents: i64,
}

/// Consumption delta for the period: last reading minus first reading among
/// readings taken inside the period. Fewer than two readings means no
/// measurable consumption.
pub fn consumption_delta_wh(readings: &[(DateTime<Utc>, i64)], period: &AllocationPeriod) -> i64 {
    let mut in_period = readings
        .iter()
        .filter(|(at, _)| *at >= period.start && *at < period.end)
        .collect::<Vec<_>>();
    in_period.sort_by_key(|(at, _)| *at);

    if in_period.len() < 2 {
        return 0;
    }
    let first = in_period.first().map(|(_, value)| *value).unwrap_or(0);
    let last = in_period.last().map(|(_, value)| *value).unwrap_or(0);
    (last - first).max(0)
}

/// Cost of `delta_wh` at a per-kWh price, rounded half-up to the nearest cent.
pub fn consumption_cost_cents(price_per_kwh_cents: i64, delta_wh: i64) -> i64 {
    if price_per_kwh_cents <= 0 || delta_wh <= 0 {
        return 0;
    }
    let numerator = price_per_kwh_cents as i128 * delta_wh as i128;
    ((numerator * 2 + 1000) / 2000) as i64
}

/// Monthly equivalent of a recurring expense amount.
pub fn monthly_equivalent_cents(amount_cents: i64, frequency: &str) -> i64 {
    match frequency.trim().to_ascii_lowercase().as_str() {
        "yearly" => ((amount_cents as i128 * 2 + 12) / 24) as i64,
        _ => amount_cents,
    }
}

/// Cleaning costs keyed by booking, restricted to events scheduled inside the
/// period. A booking spanning a month boundary carries its cleaning cost only
/// in the month the cleaning happens, never in both.
pub fn cleaning_costs_in_period(
    events: &[(Uuid, DateTime<Utc>, i64)],
    period: &AllocationPeriod,
) -> HashMap<Uuid, i64> {
    let mut by_booking = HashMap::new();
    for (booking_id, scheduled_at, cost_cents) in events {
        if *scheduled_at >= period.start && *scheduled_at < period.end {
            *by_booking.entry(*booking_id).or_insert(0) += cost_cents;
        }
    }
    by_booking
}

/// Allocate the period's costs across stays.
///
/// Each stay is clipped to the period; its share of each cost pool is its
/// clipped duration over the full period duration. Overlapping stays are a
/// precondition violation (the booking invariant forbids them) and are
/// rejected rather than double-counted.
pub fn allocate_period(
    period: &AllocationPeriod,
    stays: &[StayInput],
    costs: PeriodCosts,
    cleaning_by_booking: &HashMap<Uuid, i64>,
) -> Result<Vec<StayAllocation>, AppError> {
    reject_overlaps(stays)?;

    let period_seconds = period.seconds();
    let mut clipped: Vec<(Uuid, DateTime<Utc>, i64)> = Vec::new();
    for stay in stays {
        let from = stay.starts_at.max(period.start);
        let to = stay.ends_at.min(period.end);
        let occupied = (to - from).num_seconds();
        if occupied > 0 {
            clipped.push((stay.booking_id, stay.starts_at, occupied));
        }
    }
    if clipped.is_empty() || period_seconds == 0 {
        return Ok(Vec::new());
    }

    let weights = clipped
        .iter()
        .map(|(_, _, occupied)| *occupied)
        .collect::<Vec<_>>();
    let consumption = distribute(costs.consumption_cents, &weights, period_seconds, &clipped);
    let fixed = distribute(costs.fixed_cents, &weights, period_seconds, &clipped);

    let mut allocations = Vec::with_capacity(clipped.len());
    for (index, (booking_id, _, occupied)) in clipped.iter().enumerate() {
        let cleaning = cleaning_by_booking.get(booking_id).copied().unwrap_or(0);
        allocations.push(StayAllocation {
            booking_id: *booking_id,
            occupied_seconds: *occupied,
            consumption_cents: consumption[index],
            fixed_cents: fixed[index],
            cleaning_cents: cleaning,
            total_cents: consumption[index] + fixed[index] + cleaning,
        });
    }
    Ok(allocations)
}

fn reject_overlaps(stays: &[StayInput]) -> Result<(), AppError> {
    let mut ordered = stays.to_vec();
    ordered.sort_by_key(|stay| stay.starts_at);
    for pair in ordered.windows(2) {
        if pair[0].ends_at > pair[1].starts_at {
            return Err(AppError::Conflict(format!(
                "Bookings {} and {} overlap; allocation requires non-overlapping bookings.",
                pair[0].booking_id, pair[1].booking_id
            )));
        }
    }
    Ok(())
}

/// Split `pool` cents across stays proportional to occupied seconds over the
/// period length. Floors every exact share, then hands the residual cents out
/// by largest remainder; ties prefer the longer stay, then the earlier start.
fn distribute(
    pool: i64,
    weights: &[i64],
    period_seconds: i64,
    clipped: &[(Uuid, DateTime<Utc>, i64)],
) -> Vec<i64> {
    if pool <= 0 || period_seconds <= 0 {
        return vec![0; weights.len()];
    }

    let denominator = period_seconds as i128;
    let total_weight: i128 = weights.iter().map(|w| *w as i128).sum();

    // Total cents that should leave the pool, rounded half-up. Equals the pool
    // exactly when the stays cover the whole period.
    let target = ((pool as i128 * total_weight * 2 + denominator) / (denominator * 2)) as i64;

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, i128)> = Vec::with_capacity(weights.len());
    let mut floored_total = 0_i64;
    for (index, weight) in weights.iter().enumerate() {
        let numerator = pool as i128 * *weight as i128;
        let floor = (numerator / denominator) as i64;
        shares.push(floor);
        floored_total += floor;
        remainders.push((index, numerator % denominator));
    }

    let mut residual = target - floored_total;
    remainders.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| clipped[b.0].2.cmp(&clipped[a.0].2))
            .then_with(|| clipped[a.0].1.cmp(&clipped[b.0].1))
            .then_with(|| clipped[a.0].0.cmp(&clipped[b.0].0))
    });
    for (index, _) in remainders {
        if residual <= 0 {
            break;
        }
        shares[index] += 1;
        residual -= 1;
    }
    shares
}

// ---------------------------------------------------------------------------
// Persisted recompute
// ---------------------------------------------------------------------------

/// Recompute and persist all allocation rows for a property and period.
///
/// The delete + insert runs in one transaction behind an advisory lock keyed
/// on (property, period), so concurrent recomputes for the same period
/// serialize while other properties proceed unhindered.
pub async fn recompute_property_period(
    pool: &PgPool,
    property: &Value,
    year: i32,
    month: u32,
) -> AppResult<Vec<Value>> {
    let property_id = property
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let timezone = property
        .get("timezone")
        .and_then(Value::as_str)
        .unwrap_or("UTC");
    let price_per_kwh_cents = property
        .get("price_per_kwh_cents")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let period = month_period(year, month, timezone)?;

    let mut tx = pool.begin().await.map_err(|error| {
        tracing::error!(error = %error, "Could not open allocation transaction");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(advisory_lock_key(&property_id, &period.label))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Could not take allocation lock");
            AppError::Dependency("Database operation failed.".to_string())
        })?;

    // All reads happen behind the lock so a stalled recompute cannot commit
    // rows derived from data older than a recompute that beat it to the lock.
    let stays = load_period_stays(&mut tx, &property_id, &period).await?;
    let readings = load_period_readings(&mut tx, &property_id, &period).await?;
    let fixed_cents = load_monthly_fixed_cents(&mut tx, &property_id).await?;
    let cleaning_events = load_cleaning_events(&mut tx, &property_id).await?;
    let cleaning_by_booking = cleaning_costs_in_period(&cleaning_events, &period);

    let delta_wh = consumption_delta_wh(&readings, &period);
    let costs = PeriodCosts {
        consumption_cents: consumption_cost_cents(price_per_kwh_cents, delta_wh),
        fixed_cents,
    };

    let allocations = allocate_period(&period, &stays, costs, &cleaning_by_booking)?;

    let mut filters = Map::new();
    filters.insert(
        "property_id".to_string(),
        Value::String(property_id.clone()),
    );
    filters.insert("period".to_string(), Value::String(period.label.clone()));
    delete_rows_tx(&mut tx, "cost_allocations", &filters).await?;

    let mut created = Vec::with_capacity(allocations.len());
    for allocation in &allocations {
        let mut record = Map::new();
        record.insert(
            "property_id".to_string(),
            Value::String(property_id.clone()),
        );
        record.insert(
            "booking_id".to_string(),
            Value::String(allocation.booking_id.to_string()),
        );
        record.insert("period".to_string(), Value::String(period.label.clone()));
        record.insert(
            "occupied_seconds".to_string(),
            json!(allocation.occupied_seconds),
        );
        record.insert(
            "consumption_cost_cents".to_string(),
            json!(allocation.consumption_cents),
        );
        record.insert("fixed_cost_cents".to_string(), json!(allocation.fixed_cents));
        record.insert(
            "cleaning_cost_cents".to_string(),
            json!(allocation.cleaning_cents),
        );
        record.insert("total_cents".to_string(), json!(allocation.total_cents));
        created.push(create_row_tx(&mut tx, "cost_allocations", &record).await?);
    }

    tx.commit().await.map_err(|error| {
        tracing::error!(error = %error, "Could not commit allocation transaction");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    Ok(created)
}

/// Stable i64 lock key derived from the property id and period label.
fn advisory_lock_key(property_id: &str, label: &str) -> i64 {
    let digest = Sha256::digest(format!("{property_id}:{label}").as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

async fn load_period_stays(
    conn: &mut PgConnection,
    property_id: &str,
    period: &AllocationPeriod,
) -> AppResult<Vec<StayInput>> {
    let rows = sqlx::query(
        "SELECT id, starts_at, ends_at
         FROM bookings
         WHERE property_id = $1::uuid
           AND status <> 'cancelled'
           AND starts_at < $3
           AND ends_at > $2",
    )
    .bind(property_id)
    .bind(period.start)
    .bind(period.end)
    .fetch_all(&mut *conn)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Booking load for allocation failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let mut stays = Vec::with_capacity(rows.len());
    for row in rows {
        stays.push(StayInput {
            booking_id: row.try_get::<Uuid, _>("id").map_err(internal_row_error)?,
            starts_at: row
                .try_get::<DateTime<Utc>, _>("starts_at")
                .map_err(internal_row_error)?,
            ends_at: row
                .try_get::<DateTime<Utc>, _>("ends_at")
                .map_err(internal_row_error)?,
        });
    }
    Ok(stays)
}

async fn load_period_readings(
    conn: &mut PgConnection,
    property_id: &str,
    period: &AllocationPeriod,
) -> AppResult<Vec<(DateTime<Utc>, i64)>> {
    let rows = sqlx::query(
        "SELECT recorded_at, reading_wh
         FROM meter_readings
         WHERE property_id = $1::uuid
           AND recorded_at >= $2
           AND recorded_at < $3
         ORDER BY recorded_at ASC",
    )
    .bind(property_id)
    .bind(period.start)
    .bind(period.end)
    .fetch_all(&mut *conn)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Meter reading load for allocation failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let mut readings = Vec::with_capacity(rows.len());
    for row in rows {
        readings.push((
            row.try_get::<DateTime<Utc>, _>("recorded_at")
                .map_err(internal_row_error)?,
            row.try_get::<i64, _>("reading_wh")
                .map_err(internal_row_error)?,
        ));
    }
    Ok(readings)
}

async fn load_monthly_fixed_cents(conn: &mut PgConnection, property_id: &str) -> AppResult<i64> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT amount_cents, frequency::text
         FROM expenses
         WHERE property_id = $1::uuid",
    )
    .bind(property_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Expense load for allocation failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    Ok(rows
        .iter()
        .map(|(amount, frequency)| monthly_equivalent_cents(*amount, frequency))
        .sum())
}

async fn load_cleaning_events(
    conn: &mut PgConnection,
    property_id: &str,
) -> AppResult<Vec<(Uuid, DateTime<Utc>, i64)>> {
    let rows: Vec<(Uuid, DateTime<Utc>, i64)> = sqlx::query_as(
        "SELECT booking_id, scheduled_at, cost_cents
         FROM cleaning_events
         WHERE property_id = $1::uuid
           AND booking_id IS NOT NULL
           AND status <> 'cancelled'",
    )
    .bind(property_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Cleaning cost load for allocation failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    Ok(rows)
}

fn internal_row_error(error: sqlx::Error) -> AppError {
    tracing::error!(error = %error, "Unexpected row shape");
    AppError::Internal("Unexpected row shape.".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::{
        allocate_period, cleaning_costs_in_period, consumption_cost_cents, consumption_delta_wh,
        month_period, monthly_equivalent_cents, AllocationPeriod, PeriodCosts, StayInput,
    };

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn booking(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn april() -> AllocationPeriod {
        // 30 days, UTC
        month_period(2026, 4, "UTC").unwrap()
    }

    fn stay(id: u128, from: &str, to: &str) -> StayInput {
        StayInput {
            booking_id: booking(id),
            starts_at: ts(from),
            ends_at: ts(to),
        }
    }

    #[test]
    fn month_bounds_respect_timezone() {
        let utc = month_period(2026, 4, "UTC").unwrap();
        assert_eq!(utc.start, ts("2026-04-01T00:00:00Z"));
        assert_eq!(utc.end, ts("2026-05-01T00:00:00Z"));
        assert_eq!(utc.label, "2026-04");

        let berlin = month_period(2026, 4, "Europe/Berlin").unwrap();
        assert_eq!(berlin.start, ts("2026-03-31T22:00:00Z"));

        // Unknown timezone falls back to UTC rather than failing.
        let fallback = month_period(2026, 4, "Mars/Olympus").unwrap();
        assert_eq!(fallback.start, utc.start);
    }

    #[test]
    fn delta_needs_two_readings_inside_the_period() {
        let period = april();
        assert_eq!(consumption_delta_wh(&[], &period), 0);
        assert_eq!(
            consumption_delta_wh(&[(ts("2026-04-10T00:00:00Z"), 500)], &period),
            0
        );
        let readings = vec![
            (ts("2026-03-30T00:00:00Z"), 100), // outside, ignored
            (ts("2026-04-02T00:00:00Z"), 1_000),
            (ts("2026-04-15T00:00:00Z"), 40_000),
            (ts("2026-04-29T00:00:00Z"), 101_000),
        ];
        assert_eq!(consumption_delta_wh(&readings, &period), 100_000);
    }

    #[test]
    fn consumption_cost_rounds_half_up() {
        // 30 cents/kWh * 100,000 Wh = 3,000 cents exactly
        assert_eq!(consumption_cost_cents(30, 100_000), 3_000);
        // 25 cents/kWh * 1,500 Wh = 37.5 -> 38
        assert_eq!(consumption_cost_cents(25, 1_500), 38);
        assert_eq!(consumption_cost_cents(0, 100_000), 0);
    }

    #[test]
    fn yearly_expenses_convert_to_monthly() {
        assert_eq!(monthly_equivalent_cents(1_200, "monthly"), 1_200);
        assert_eq!(monthly_equivalent_cents(1_200, "yearly"), 100);
        // 1,000 / 12 = 83.33 -> 83
        assert_eq!(monthly_equivalent_cents(1_000, "YEARLY"), 83);
    }

    #[test]
    fn full_coverage_sums_exactly_to_the_pool() {
        let period = april();
        // Three stays covering all 30 days: 7 + 11 + 12.
        let stays = vec![
            stay(1, "2026-04-01T00:00:00Z", "2026-04-08T00:00:00Z"),
            stay(2, "2026-04-08T00:00:00Z", "2026-04-19T00:00:00Z"),
            stay(3, "2026-04-19T00:00:00Z", "2026-05-01T00:00:00Z"),
        ];
        let costs = PeriodCosts {
            consumption_cents: 10_001, // does not divide evenly by 30
            fixed_cents: 9_999,
        };
        let allocations = allocate_period(&period, &stays, costs, &HashMap::new()).unwrap();
        assert_eq!(allocations.len(), 3);

        let consumption_total: i64 = allocations.iter().map(|a| a.consumption_cents).sum();
        let fixed_total: i64 = allocations.iter().map(|a| a.fixed_cents).sum();
        assert_eq!(consumption_total, 10_001);
        assert_eq!(fixed_total, 9_999);
    }

    #[test]
    fn partial_coverage_allocates_the_occupied_fraction() {
        let period = april();
        // One booking occupying 10 of 30 days gets a third of the pool.
        let stays = vec![stay(1, "2026-04-05T00:00:00Z", "2026-04-15T00:00:00Z")];
        let costs = PeriodCosts {
            consumption_cents: 3_000,
            fixed_cents: 0,
        };
        let allocations = allocate_period(&period, &stays, costs, &HashMap::new()).unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].consumption_cents, 1_000);
        assert_eq!(allocations[0].occupied_seconds, 10 * 86_400);
    }

    #[test]
    fn stays_are_clipped_to_period_bounds() {
        let period = april();
        let stays = vec![stay(1, "2026-03-25T00:00:00Z", "2026-04-04T00:00:00Z")];
        let allocations =
            allocate_period(&period, &stays, PeriodCosts::default(), &HashMap::new()).unwrap();
        assert_eq!(allocations[0].occupied_seconds, 3 * 86_400);
    }

    #[test]
    fn overlapping_stays_are_rejected_not_double_counted() {
        let period = april();
        let stays = vec![
            stay(1, "2026-04-01T00:00:00Z", "2026-04-10T00:00:00Z"),
            stay(2, "2026-04-09T00:00:00Z", "2026-04-12T00:00:00Z"),
        ];
        let result = allocate_period(
            &period,
            &stays,
            PeriodCosts {
                consumption_cents: 100,
                fixed_cents: 0,
            },
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_period_allocates_nothing_without_division_faults() {
        let period = april();
        let allocations = allocate_period(
            &period,
            &[],
            PeriodCosts {
                consumption_cents: 50_000,
                fixed_cents: 10_000,
            },
            &HashMap::new(),
        )
        .unwrap();
        assert!(allocations.is_empty());

        // A stay entirely outside the period is equivalent to no stay.
        let outside = vec![stay(1, "2026-06-01T00:00:00Z", "2026-06-05T00:00:00Z")];
        let allocations = allocate_period(
            &period,
            &outside,
            PeriodCosts {
                consumption_cents: 50_000,
                fixed_cents: 0,
            },
            &HashMap::new(),
        )
        .unwrap();
        assert!(allocations.is_empty());
    }

    #[test]
    fn residual_cent_goes_to_the_longest_stay() {
        let period = april();
        // 15 + 15 days, pool of 101 cents: 50.5 cents each exactly. The target
        // total is 101; remainders tie, so the longer-or-earlier stay wins the
        // extra cent deterministically.
        let stays = vec![
            stay(2, "2026-04-16T00:00:00Z", "2026-05-01T00:00:00Z"),
            stay(1, "2026-04-01T00:00:00Z", "2026-04-16T00:00:00Z"),
        ];
        let costs = PeriodCosts {
            consumption_cents: 101,
            fixed_cents: 0,
        };
        let allocations = allocate_period(&period, &stays, costs, &HashMap::new()).unwrap();
        let by_id: HashMap<_, _> = allocations
            .iter()
            .map(|a| (a.booking_id, a.consumption_cents))
            .collect();
        assert_eq!(by_id[&booking(1)] + by_id[&booking(2)], 101);
        // Equal lengths: earlier start breaks the tie.
        assert_eq!(by_id[&booking(1)], 51);
        assert_eq!(by_id[&booking(2)], 50);
    }

    #[test]
    fn boundary_spanning_booking_pays_cleaning_once() {
        let april = april();
        let may = month_period(2026, 5, "UTC").unwrap();
        // Booking runs Apr 25 - May 5; its 5,000-cent cleaning is scheduled in
        // May. Recomputing both months must charge the cleaning exactly once.
        let stay = stay(1, "2026-04-25T00:00:00Z", "2026-05-05T00:00:00Z");
        let events = vec![(booking(1), ts("2026-05-05T11:00:00Z"), 5_000_i64)];

        let april_cleaning = cleaning_costs_in_period(&events, &april);
        let may_cleaning = cleaning_costs_in_period(&events, &may);
        assert!(april_cleaning.is_empty());
        assert_eq!(may_cleaning[&booking(1)], 5_000);

        let april_rows = allocate_period(
            &april,
            std::slice::from_ref(&stay),
            PeriodCosts::default(),
            &april_cleaning,
        )
        .unwrap();
        let may_rows =
            allocate_period(&may, std::slice::from_ref(&stay), PeriodCosts::default(), &may_cleaning)
                .unwrap();
        let total_cleaning: i64 = april_rows
            .iter()
            .chain(may_rows.iter())
            .map(|a| a.cleaning_cents)
            .sum();
        assert_eq!(total_cleaning, 5_000);
    }

    #[test]
    fn cleaning_costs_attach_to_their_booking() {
        let period = april();
        let stays = vec![
            stay(1, "2026-04-01T00:00:00Z", "2026-04-11T00:00:00Z"),
            stay(2, "2026-04-11T00:00:00Z", "2026-04-21T00:00:00Z"),
        ];
        let cleaning = HashMap::from([(booking(2), 4_500_i64)]);
        let allocations = allocate_period(
            &period,
            &stays,
            PeriodCosts {
                consumption_cents: 600,
                fixed_cents: 0,
            },
            &cleaning,
        )
        .unwrap();
        let second = allocations
            .iter()
            .find(|a| a.booking_id == booking(2))
            .unwrap();
        assert_eq!(second.cleaning_cents, 4_500);
        assert_eq!(
            second.total_cents,
            second.consumption_cents + second.fixed_cents + 4_500
        );
    }
}
