use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod allocations;
pub mod bookings;
pub mod cleaning_events;
pub mod expenses;
pub mod guest_pages;
pub mod health;
pub mod identity;
pub mod meter_readings;
pub mod properties;
pub mod scan;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/me", get(identity::me))
        .merge(properties::router())
        .merge(bookings::router())
        .merge(expenses::router())
        .merge(meter_readings::router())
        .merge(cleaning_events::router())
        .merge(guest_pages::router())
        .merge(allocations::router())
        .merge(scan::router())
}
