use crate::error::RepositoryError;
use crate::repository::SlotRepository;
use crate::types::{
    Booking, BookingStatus, ChangeNotice, NewSlot, Slot, SlotMove, SlotStatus, TimeRange,
};
use chrono::{NaiveDate, NaiveTime};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Store {
    slots: HashMap<Uuid, Slot>,
    bookings: HashMap<Uuid, Booking>,
    versions: HashMap<(Uuid, NaiveDate), u64>,
}

impl Store {
    fn overlaps_other(&self, barber_id: Uuid, date: NaiveDate, range: &TimeRange, except: Uuid) -> bool {
        self.slots.values().any(|slot| {
            slot.id != except
                && slot.barber_id == barber_id
                && slot.date == date
                && slot.range().overlaps(range)
        })
    }

    fn bump_version(&mut self, barber_id: Uuid, date: NaiveDate) -> u64 {
        let version = self.versions.entry((barber_id, date)).or_default();
        *version += 1;
        *version
    }
}

/// In-memory slot repository. Used when no database is configured and in tests.
#[derive(Debug, Clone)]
pub struct LocalSlots {
    store: Arc<Mutex<Store>>,
    sender: Sender<Option<ChangeNotice>>,
}

impl Default for LocalSlots {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            store: Arc::new(Mutex::default()),
            sender,
        }
    }
}

impl LocalSlots {
    fn store(&self) -> Result<MutexGuard<'_, Store>, RepositoryError> {
        self.store.lock().map_err(|err| {
            error!(?err, "Slot store lock poisoned");
            RepositoryError::Unavailable("slot store lock poisoned".into())
        })
    }

    fn notify(&self, store: &mut Store, barber_id: Uuid, date: NaiveDate) {
        let version = store.bump_version(barber_id, date);
        self.sender.send_replace(Some(ChangeNotice {
            barber_id,
            date,
            version,
        }));
    }
}

impl SlotRepository for LocalSlots {
    fn slots(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, RepositoryError> {
        let mut slots: Vec<Slot> = self
            .store()?
            .slots
            .values()
            .filter(|slot| slot.barber_id == barber_id && slot.date >= from && slot.date <= to)
            .cloned()
            .collect();
        slots.sort_unstable_by_key(|slot| (slot.date, slot.start_time));
        Ok(slots)
    }

    fn slot(&self, id: Uuid) -> Result<Option<Slot>, RepositoryError> {
        Ok(self.store()?.slots.get(&id).cloned())
    }

    fn insert_slot(&self, new_slot: NewSlot) -> Result<Slot, RepositoryError> {
        new_slot.check_range()?;
        let slot = Slot {
            id: Uuid::new_v4(),
            barber_id: new_slot.barber_id,
            date: new_slot.date,
            start_time: new_slot.start_time,
            end_time: new_slot.end_time,
            status: SlotStatus::Available,
        };

        let mut store = self.store()?;
        if store.overlaps_other(slot.barber_id, slot.date, &slot.range(), slot.id) {
            error!(%slot, "Slot overlaps an existing slot");
            return Err(RepositoryError::Overlap);
        }
        store.slots.insert(slot.id, slot.clone());
        self.notify(&mut store, slot.barber_id, slot.date);
        info!(%slot, "Slot added");
        Ok(slot)
    }

    fn mark_booked(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError> {
        let mut store = self.store()?;
        let Some(slot) = store.slots.get(&id) else {
            return Ok(false);
        };
        let range = TimeRange {
            start_time: slot.start_time,
            end_time,
        };
        if !slot.is_available()
            || end_time <= slot.start_time
            || store.overlaps_other(slot.barber_id, slot.date, &range, id)
        {
            return Ok(false);
        }

        let (barber_id, date) = (slot.barber_id, slot.date);
        if let Some(slot) = store.slots.get_mut(&id) {
            slot.status = SlotStatus::Booked;
            slot.end_time = end_time;
        }
        self.notify(&mut store, barber_id, date);
        Ok(true)
    }

    fn resize_booked(
        &self,
        id: Uuid,
        expected_end: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<bool, RepositoryError> {
        let mut store = self.store()?;
        let Some(slot) = store.slots.get(&id) else {
            return Ok(false);
        };
        let range = TimeRange {
            start_time: slot.start_time,
            end_time,
        };
        if slot.is_available()
            || slot.end_time != expected_end
            || end_time <= slot.start_time
            || store.overlaps_other(slot.barber_id, slot.date, &range, id)
        {
            return Ok(false);
        }

        let (barber_id, date) = (slot.barber_id, slot.date);
        if let Some(slot) = store.slots.get_mut(&id) {
            slot.end_time = end_time;
        }
        self.notify(&mut store, barber_id, date);
        Ok(true)
    }

    fn release_slot(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError> {
        let mut store = self.store()?;
        let Some(slot) = store.slots.get(&id) else {
            return Ok(false);
        };
        let range = TimeRange {
            start_time: slot.start_time,
            end_time,
        };
        if slot.is_available()
            || end_time <= slot.start_time
            || store.overlaps_other(slot.barber_id, slot.date, &range, id)
        {
            return Ok(false);
        }

        let (barber_id, date) = (slot.barber_id, slot.date);
        if let Some(slot) = store.slots.get_mut(&id) {
            slot.status = SlotStatus::Available;
            slot.end_time = end_time;
        }
        self.notify(&mut store, barber_id, date);
        Ok(true)
    }

    fn delete_available_slot(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut store = self.store()?;
        match store.slots.get(&id) {
            Some(slot) if slot.is_available() => {
                let (barber_id, date) = (slot.barber_id, slot.date);
                store.slots.remove(&id);
                self.notify(&mut store, barber_id, date);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn shift_slot(&self, movement: &SlotMove) -> Result<bool, RepositoryError> {
        let mut store = self.store()?;
        let Some(slot) = store.slots.get(&movement.slot_id) else {
            return Ok(false);
        };
        if !slot.is_available()
            || slot.range() != movement.from
            || store.overlaps_other(slot.barber_id, slot.date, &movement.to, slot.id)
        {
            return Ok(false);
        }

        let (barber_id, date) = (slot.barber_id, slot.date);
        if let Some(slot) = store.slots.get_mut(&movement.slot_id) {
            slot.start_time = movement.to.start_time;
            slot.end_time = movement.to.end_time;
        }
        self.notify(&mut store, barber_id, date);
        Ok(true)
    }

    fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let mut store = self.store()?;
        store.bookings.insert(booking.id, booking.clone());
        self.notify(&mut store, booking.barber_id, booking.date);
        Ok(())
    }

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.store()?.bookings.get(&id).cloned())
    }

    fn cancel_booking(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut store = self.store()?;
        let Some(booking) = store.bookings.get_mut(&id) else {
            return Ok(false);
        };
        if booking.status != BookingStatus::Confirmed {
            return Ok(false);
        }
        booking.status = BookingStatus::Canceled;
        let (barber_id, date) = (booking.barber_id, booking.date);
        self.notify(&mut store, barber_id, date);
        Ok(true)
    }

    fn change_version(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u64, RepositoryError> {
        Ok(self
            .store()?
            .versions
            .iter()
            .filter(|((barber, date), _)| *barber == barber_id && *date >= from && *date <= to)
            .map(|(_, version)| *version)
            .sum())
    }

    fn change_stream(&self) -> WatchStream<Option<ChangeNotice>> {
        WatchStream::new(self.sender.subscribe())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::{date, read_from_change_stream, time};
    use test_case::test_case;

    fn new_slot(barber_id: Uuid, start: NaiveTime, end: NaiveTime) -> NewSlot {
        NewSlot {
            barber_id,
            date: date(),
            start_time: start,
            end_time: end,
        }
    }

    #[tokio::test]
    async fn test_add_book_remove_single_slot() {
        let local_slots = LocalSlots::default();
        let mut change_stream = local_slots.change_stream();
        let barber_id = Uuid::new_v4();

        let slot = local_slots
            .insert_slot(new_slot(barber_id, time(9, 0), time(9, 30)))
            .unwrap();
        let notice = read_from_change_stream(&mut change_stream).await.unwrap();
        assert_eq!(notice.barber_id, barber_id);
        assert_eq!(notice.date, date());

        let slots = local_slots.day_slots(barber_id, date()).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_available());

        assert!(local_slots.mark_booked(slot.id, time(9, 30)).unwrap());
        let slots = local_slots.day_slots(barber_id, date()).unwrap();
        assert_eq!(slots[0].status, SlotStatus::Booked);

        // second booking of the same slot loses
        assert!(!local_slots.mark_booked(slot.id, time(9, 30)).unwrap());
        // booked slots can't be removed
        assert!(!local_slots.delete_available_slot(slot.id).unwrap());

        assert!(local_slots.release_slot(slot.id, time(9, 30)).unwrap());
        assert!(local_slots.delete_available_slot(slot.id).unwrap());
        assert!(local_slots.day_slots(barber_id, date()).unwrap().is_empty());
        assert!(!local_slots.delete_available_slot(slot.id).unwrap());
    }

    #[test_case((10, 0), (9, 0) ; "inverted")]
    #[test_case((12, 0), (12, 0) ; "zero length")]
    fn test_slot_must_end_after_start(start: (u32, u32), end: (u32, u32)) {
        let local_slots = LocalSlots::default();
        let barber_id = Uuid::new_v4();

        let err = local_slots
            .insert_slot(new_slot(barber_id, time(start.0, start.1), time(end.0, end.1)))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidRange { .. }));
        assert!(local_slots.day_slots(barber_id, date()).unwrap().is_empty());
        assert_eq!(local_slots.change_version(barber_id, date(), date()).unwrap(), 0);
    }

    #[test]
    fn test_overlapping_slot_is_rejected() {
        let local_slots = LocalSlots::default();
        let barber_id = Uuid::new_v4();

        local_slots
            .insert_slot(new_slot(barber_id, time(9, 0), time(9, 30)))
            .unwrap();
        let err = local_slots
            .insert_slot(new_slot(barber_id, time(9, 15), time(9, 45)))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Overlap));

        // touching intervals and other barbers are fine
        local_slots
            .insert_slot(new_slot(barber_id, time(9, 30), time(10, 0)))
            .unwrap();
        local_slots
            .insert_slot(new_slot(Uuid::new_v4(), time(9, 15), time(9, 45)))
            .unwrap();
    }

    #[test]
    fn test_slots_are_sorted_and_filtered() {
        let local_slots = LocalSlots::default();
        let barber_id = Uuid::new_v4();

        local_slots
            .insert_slot(new_slot(barber_id, time(11, 0), time(11, 30)))
            .unwrap();
        local_slots
            .insert_slot(new_slot(barber_id, time(9, 0), time(9, 30)))
            .unwrap();
        local_slots
            .insert_slot(new_slot(Uuid::new_v4(), time(8, 0), time(8, 30)))
            .unwrap();

        let slots = local_slots.day_slots(barber_id, date()).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start_time, time(9, 0));
        assert_eq!(slots[1].start_time, time(11, 0));
    }

    #[test]
    fn test_shift_requires_expected_position() {
        let local_slots = LocalSlots::default();
        let barber_id = Uuid::new_v4();
        let slot = local_slots
            .insert_slot(new_slot(barber_id, time(10, 0), time(10, 30)))
            .unwrap();

        let stale = SlotMove {
            slot_id: slot.id,
            from: TimeRange {
                start_time: time(10, 15),
                end_time: time(10, 45),
            },
            to: TimeRange {
                start_time: time(9, 45),
                end_time: time(10, 15),
            },
        };
        assert!(!local_slots.shift_slot(&stale).unwrap());

        let movement = SlotMove {
            from: slot.range(),
            ..stale
        };
        assert!(local_slots.shift_slot(&movement).unwrap());
        let slot = local_slots.slot(slot.id).unwrap().unwrap();
        assert_eq!(slot.range(), movement.to);
    }

    #[test]
    fn test_change_version_grows_per_mutation() {
        let local_slots = LocalSlots::default();
        let barber_id = Uuid::new_v4();
        assert_eq!(local_slots.change_version(barber_id, date(), date()).unwrap(), 0);

        let slot = local_slots
            .insert_slot(new_slot(barber_id, time(9, 0), time(9, 30)))
            .unwrap();
        assert_eq!(local_slots.change_version(barber_id, date(), date()).unwrap(), 1);

        // failed conditional writes don't count
        assert!(!local_slots.release_slot(slot.id, time(9, 30)).unwrap());
        assert_eq!(local_slots.change_version(barber_id, date(), date()).unwrap(), 1);

        local_slots.mark_booked(slot.id, time(9, 30)).unwrap();
        assert_eq!(local_slots.change_version(barber_id, date(), date()).unwrap(), 2);
        assert_eq!(
            local_slots
                .change_version(Uuid::new_v4(), date(), date())
                .unwrap(),
            0
        );
    }
}
