use chrono::{NaiveDate, NaiveTime, Timelike};
use uuid::Uuid;

use crate::types::NewSlot;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Minutes since local midnight.
pub fn minutes_of(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Inverse of [`minutes_of`]. `None` outside of the day.
pub fn time_at(minutes: i64) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minutes) {
        return None;
    }
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
}

/// Fixed-length slots covering `[opening, closing)`. A trailing remainder
/// shorter than `slot_minutes` is not published.
pub fn generate_slots(
    barber_id: Uuid,
    date: NaiveDate,
    opening: NaiveTime,
    closing: NaiveTime,
    slot_minutes: u32,
) -> Vec<NewSlot> {
    let mut slots = Vec::new();
    if slot_minutes == 0 {
        return slots;
    }

    let step = i64::from(slot_minutes);
    let closing = minutes_of(closing);
    let mut current = minutes_of(opening);

    while current + step <= closing {
        match (time_at(current), time_at(current + step)) {
            (Some(start_time), Some(end_time)) => slots.push(NewSlot {
                barber_id,
                date,
                start_time,
                end_time,
            }),
            _ => break,
        }
        current += step;
    }
    slots
}
