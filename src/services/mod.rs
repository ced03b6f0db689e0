pub mod allocation;
pub mod audit;
pub mod ical;
