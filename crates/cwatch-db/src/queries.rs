//! Database query functions organized by table.

pub mod contact_events;
pub mod observations;
pub mod settings;
pub mod signed_reports;
