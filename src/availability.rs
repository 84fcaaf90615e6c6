//! Which slots of a day can start a booking of a given length.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::minutes_of;
use crate::types::{Slot, SlotStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Selectability {
    Selectable { free_window: i64 },
    Booked,
    WindowTooShort { free_window: i64 },
    /// Client-side overlay while the viewer's own booking is in flight.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub slot_id: Uuid,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub selectability: Selectability,
}

impl SlotAvailability {
    pub fn booked(&self) -> bool {
        self.selectability == Selectability::Booked
    }

    pub fn selectable(&self) -> bool {
        matches!(self.selectability, Selectability::Selectable { .. })
    }
}

/// Single precedence rule for a slot's state: booked beats everything, then
/// the free window decides. A zero duration fits any free slot.
fn selectability(status: SlotStatus, free_window: i64, duration: i64) -> Selectability {
    match status {
        SlotStatus::Booked => Selectability::Booked,
        SlotStatus::Available if duration == 0 || free_window >= duration => {
            Selectability::Selectable { free_window }
        }
        SlotStatus::Available => Selectability::WindowTooShort { free_window },
    }
}

/// Computes per-slot availability for one barber and date.
///
/// `slots` must be sorted by start time. The free window of an available slot
/// runs until the start of the next booked slot, or, if there is none, until
/// the later of the last slot's end and `end_of_day`.
pub fn compute_availability(
    slots: &[Slot],
    duration_minutes: u32,
    end_of_day: NaiveTime,
) -> Vec<SlotAvailability> {
    let Some(last) = slots.last() else {
        return Vec::new();
    };

    let duration = i64::from(duration_minutes);
    let mut next_blocked = last.end_minutes().max(minutes_of(end_of_day));
    let mut availability: Vec<SlotAvailability> = slots
        .iter()
        .rev()
        .map(|slot| {
            let free_window = next_blocked - slot.start_minutes();
            let entry = SlotAvailability {
                slot_id: slot.id,
                start_time: slot.start_time,
                end_time: slot.end_time,
                selectability: selectability(slot.status, free_window, duration),
            };
            if slot.status == SlotStatus::Booked {
                next_blocked = slot.start_minutes();
            }
            entry
        })
        .collect();
    availability.reverse();
    availability
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::{slot, time};
    use crate::types::SlotStatus::{Available, Booked};
    use test_case::test_case;

    fn morning() -> Vec<Slot> {
        vec![
            slot((9, 0), (9, 30), Available),
            slot((9, 30), (10, 0), Available),
            slot((10, 0), (10, 30), Booked),
            slot((10, 30), (11, 0), Available),
        ]
    }

    #[test]
    fn test_empty_day() {
        assert!(compute_availability(&[], 30, time(18, 0)).is_empty());
    }

    #[test_case(30, vec![true, true, false, true])]
    #[test_case(60, vec![true, false, false, false])]
    #[test_case(90, vec![false, false, false, false])]
    fn test_window_bounded_by_booked_slot(duration: u32, expected: Vec<bool>) {
        // end of day before the last slot's end, the last end wins
        let availability = compute_availability(&morning(), duration, time(10, 45));
        let selectable: Vec<bool> = availability.iter().map(|a| a.selectable()).collect();
        assert_eq!(selectable, expected);
        assert!(availability[2].booked());
        assert!(!availability[0].booked());
    }

    #[test]
    fn test_end_of_day_extends_sparse_schedule() {
        let slots = vec![slot((9, 0), (9, 30), Available)];

        let availability = compute_availability(&slots, 120, time(18, 0));
        assert_eq!(
            availability[0].selectability,
            Selectability::Selectable { free_window: 540 }
        );

        let availability = compute_availability(&slots, 120, time(9, 0));
        assert_eq!(
            availability[0].selectability,
            Selectability::WindowTooShort { free_window: 30 }
        );
    }

    #[test]
    fn test_zero_duration_selects_every_free_slot() {
        let slots = vec![
            slot((9, 0), (9, 30), Available),
            slot((9, 30), (10, 0), Booked),
            slot((10, 0), (10, 30), Available),
        ];
        let availability = compute_availability(&slots, 0, time(10, 30));
        let selectable: Vec<bool> = availability.iter().map(|a| a.selectable()).collect();
        assert_eq!(selectable, vec![true, false, true]);
    }

    #[test]
    fn test_duration_longer_than_day() {
        let availability = compute_availability(&morning(), 24 * 60, time(23, 59));
        assert!(availability.iter().all(|a| !a.selectable()));
    }

    #[test]
    fn test_repeated_calls_agree() {
        let slots = morning();
        let first = compute_availability(&slots, 45, time(12, 0));
        let second = compute_availability(&slots, 45, time(12, 0));
        assert_eq!(first, second);
        assert_eq!(first.len(), slots.len());
        for (entry, slot) in first.iter().zip(&slots) {
            assert_eq!(entry.slot_id, slot.id);
        }
    }
}
