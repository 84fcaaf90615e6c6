//! Slot scheduling and booking engine for barbers.
//!
//! Barbers publish non-overlapping time slots per day. Customers pick a slot
//! and a set of services; the booking consumes as much of the day as the
//! services take, and the following slots are deleted or moved up so the next
//! bookable slot starts exactly when the booking ends.

pub mod availability;
pub mod catalog;
pub mod configuration;
pub mod configuration_handler;
pub mod coordinator;
pub mod database_interface;
pub mod error;
pub mod http;
pub mod identity;
pub mod local_slots;
pub mod recalculation;
pub mod repository;
pub mod restoration;
pub mod schedule;
pub mod schema;
pub mod sync;
#[cfg(test)]
mod testutils;
pub mod types;
