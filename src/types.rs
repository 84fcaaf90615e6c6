use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::schedule::minutes_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
        }
    }
}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SlotStatus::Available),
            "booked" => Ok(SlotStatus::Booked),
            _ => Err(format!("Unknown slot status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub barber_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
}

impl Slot {
    pub fn start_minutes(&self) -> i64 {
        minutes_of(self.start_time)
    }

    pub fn end_minutes(&self) -> i64 {
        minutes_of(self.end_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        self.end_minutes() - self.start_minutes()
    }

    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Available
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// A slot that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSlot {
    pub barber_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl NewSlot {
    /// Rejects zero-length and inverted slots.
    pub fn check_range(&self) -> Result<(), RepositoryError> {
        if self.end_time <= self.start_time {
            return Err(RepositoryError::InvalidRange {
                start: self.start_time,
                end: self.end_time,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TimeRange {
    /// Half-open intervals, touching ranges don't overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// A slot moved from one position of its day to another, duration kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMove {
    pub slot_id: Uuid,
    pub from: TimeRange,
    pub to: TimeRange,
}

impl SlotMove {
    pub fn reversed(&self) -> SlotMove {
        SlotMove {
            slot_id: self.slot_id,
            from: self.to,
            to: self.from,
        }
    }
}

/// The part of a day's partition a booking consumed, kept with the booking
/// so a cancellation can put it back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub anchor: Option<TimeRange>,
    pub deleted: Vec<TimeRange>,
    pub shifted: Vec<SlotMove>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingSource {
    Online,
    Manual,
    Guest,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingSource::Online => "online",
            BookingSource::Manual => "manual",
            BookingSource::Guest => "guest",
        }
    }
}

impl FromStr for BookingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(BookingSource::Online),
            "manual" => Ok(BookingSource::Manual),
            "guest" => Ok(BookingSource::Guest),
            _ => Err(format!("Unknown booking source: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomerIdentity {
    Registered { customer_id: Uuid },
    WalkIn { name: String, phone: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "canceled" => Ok(BookingStatus::Canceled),
            _ => Err(format!("Unknown booking status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub barber_id: Uuid,
    pub slot_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: u32,
    pub service_selection: Vec<String>,
    pub total_price_cents: i64,
    pub customer: CustomerIdentity,
    pub source: BookingSource,
    pub status: BookingStatus,
    pub released_partition: PartitionSnapshot,
}

/// One offering of a barber, as resolved by the service catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub duration_minutes: u32,
    pub price_cents: i64,
}

/// Signal that something changed for a barber on a date. `version` is the
/// per-day change counter after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub barber_id: Uuid,
    pub date: NaiveDate,
    pub version: u64,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{} ({})",
            self.date,
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M"),
            self.status.as_str()
        )
    }
}
