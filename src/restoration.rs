//! Reverse of [`crate::recalculation`]: gives the time of a canceled booking
//! back to the day it was taken from.

use chrono::NaiveTime;
use uuid::Uuid;

use crate::types::{PartitionSnapshot, Slot, SlotMove, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorRelease {
    pub slot_id: Uuid,
    pub end_time: NaiveTime,
}

/// Writes that put a canceled booking's time back, in application order:
/// shift-backs, then the anchor release, then re-inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restoration {
    pub shift_backs: Vec<SlotMove>,
    pub anchor_release: Option<AnchorRelease>,
    pub inserts: Vec<TimeRange>,
}

struct Partition {
    ranges: Vec<(Uuid, TimeRange)>,
}

impl Partition {
    fn is_free(&self, range: &TimeRange, except: Uuid) -> bool {
        !self
            .ranges
            .iter()
            .any(|(id, other)| *id != except && other.overlaps(range))
    }

    fn set(&mut self, id: Uuid, range: TimeRange) {
        match self.ranges.iter_mut().find(|(other, _)| *other == id) {
            Some(entry) => entry.1 = range,
            None => self.ranges.push((id, range)),
        }
    }
}

/// Plans how to give back the time recorded in `snapshot`, taken by the
/// booked slot `anchor_id`, against the current `day`.
///
/// With an unchanged day the result is the exact partition from before the
/// booking. Changes made since then win: a moved slot that was booked or
/// moved again stays put, the anchor is cut short where its original time is
/// taken, and deleted slots are only re-created where their time is free.
pub fn plan_restoration(
    anchor_id: Uuid,
    snapshot: &PartitionSnapshot,
    day: &[Slot],
) -> Restoration {
    let mut partition = Partition {
        ranges: day
            .iter()
            .filter(|slot| slot.id != anchor_id)
            .map(|slot| (slot.id, slot.range()))
            .collect(),
    };
    let mut restoration = Restoration::default();

    let mut shifted = snapshot.shifted.clone();
    shifted.sort_unstable_by_key(|movement| std::cmp::Reverse(movement.from.start_time));
    for movement in shifted {
        let still_in_place = day.iter().any(|slot| {
            slot.id == movement.slot_id && slot.is_available() && slot.range() == movement.to
        });
        if still_in_place && partition.is_free(&movement.from, movement.slot_id) {
            partition.set(movement.slot_id, movement.from);
            restoration.shift_backs.push(movement.reversed());
        }
    }

    let anchor = day
        .iter()
        .find(|slot| slot.id == anchor_id && !slot.is_available());
    if let (Some(anchor), Some(original)) = (anchor, snapshot.anchor) {
        let end_time = partition
            .ranges
            .iter()
            .map(|(_, range)| range.start_time)
            .filter(|start| *start > anchor.start_time && *start < original.end_time)
            .min()
            .unwrap_or(original.end_time);
        partition.set(
            anchor.id,
            TimeRange {
                start_time: anchor.start_time,
                end_time,
            },
        );
        restoration.anchor_release = Some(AnchorRelease {
            slot_id: anchor.id,
            end_time,
        });
    }

    for range in &snapshot.deleted {
        let placeholder = Uuid::new_v4();
        if partition.is_free(range, placeholder) {
            partition.set(placeholder, *range);
            restoration.inserts.push(*range);
        }
    }

    restoration
}
