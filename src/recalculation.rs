//! Re-partitioning of a day after a booking consumed time.

use chrono::NaiveTime;
use uuid::Uuid;

use crate::error::RecalculationError;
use crate::schedule::{minutes_of, time_at};
use crate::types::{Slot, SlotMove, SlotStatus, TimeRange};

/// Write-set derived from a booking. Slots not mentioned stay untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recalculation {
    pub booking_end: NaiveTime,
    pub deletions: Vec<Slot>,
    pub shifts: Vec<SlotMove>,
}

impl Recalculation {
    pub fn deleted_ids(&self) -> Vec<Uuid> {
        self.deletions.iter().map(|slot| slot.id).collect()
    }

    pub fn is_noop(&self) -> bool {
        self.deletions.is_empty() && self.shifts.is_empty()
    }
}

/// Decides which slots following a booking are deleted or moved so the next
/// bookable slot starts exactly when the booking ends.
///
/// `slots` is the day of the booking without the anchor slot. Slots starting
/// before `anchor_start` are ignored. Available slots starting before the
/// booking end are consumed. A later slot leaving a gap shorter than
/// `minimum_service_minutes` is deleted; a larger gap is closed by moving the
/// slot forward with its length kept. Booked slots after the booking never
/// move; slots behind one are closed up against its end instead.
pub fn recalculate(
    anchor_start: NaiveTime,
    duration_minutes: u32,
    minimum_service_minutes: u32,
    slots: &[Slot],
) -> Result<Recalculation, RecalculationError> {
    let start = minutes_of(anchor_start);
    let booking_end = start + i64::from(duration_minutes);
    let booking_end_time = time_at(booking_end).ok_or(RecalculationError::OutOfDay)?;
    let minimum = i64::from(minimum_service_minutes);

    let mut following: Vec<&Slot> = slots
        .iter()
        .filter(|slot| slot.start_minutes() >= start)
        .collect();
    following.sort_unstable_by_key(|slot| slot.start_time);

    let mut recalculation = Recalculation {
        booking_end: booking_end_time,
        deletions: Vec::new(),
        shifts: Vec::new(),
    };
    let mut next_expected = booking_end;

    for slot in following {
        if slot.status == SlotStatus::Booked {
            if slot.start_minutes() < booking_end {
                return Err(RecalculationError::OverlapsBooked(slot.id));
            }
            next_expected = next_expected.max(slot.end_minutes());
            continue;
        }

        if slot.start_minutes() < booking_end {
            recalculation.deletions.push(slot.clone());
            continue;
        }

        let gap = slot.start_minutes() - next_expected;
        if gap == 0 {
            next_expected = slot.end_minutes();
        } else if gap < minimum || gap < 0 {
            recalculation.deletions.push(slot.clone());
        } else {
            let new_end = next_expected + slot.duration_minutes();
            let (Some(start_time), Some(end_time)) = (time_at(next_expected), time_at(new_end))
            else {
                return Err(RecalculationError::OutOfDay);
            };
            recalculation.shifts.push(SlotMove {
                slot_id: slot.id,
                from: slot.range(),
                to: TimeRange {
                    start_time,
                    end_time,
                },
            });
            next_expected = new_end;
        }
    }

    Ok(recalculation)
}
