use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{NaiveDate, NaiveTime};
use futures::StreamExt;
use tokio::time::timeout;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use crate::{
    error::RepositoryError,
    local_slots::LocalSlots,
    repository::SlotRepository,
    types::{Booking, ChangeNotice, NewSlot, Slot, SlotMove, SlotStatus},
};

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

/// Detached slot value for the pure calculators.
pub fn slot(start: (u32, u32), end: (u32, u32), status: SlotStatus) -> Slot {
    Slot {
        id: Uuid::new_v4(),
        barber_id: Uuid::nil(),
        date: date(),
        start_time: time(start.0, start.1),
        end_time: time(end.0, end.1),
        status,
    }
}

/// Publishes `(start, end)` slots for `barber_id` on [`date`].
pub fn publish<T: SlotRepository>(
    repository: &T,
    barber_id: Uuid,
    ranges: &[((u32, u32), (u32, u32))],
) -> Vec<Slot> {
    ranges
        .iter()
        .map(|(start, end)| {
            repository
                .insert_slot(NewSlot {
                    barber_id,
                    date: date(),
                    start_time: time(start.0, start.1),
                    end_time: time(end.0, end.1),
                })
                .unwrap()
        })
        .collect()
}

pub async fn read_from_change_stream(
    stream: &mut WatchStream<Option<ChangeNotice>>,
) -> Option<ChangeNotice> {
    let next_notice = async {
        while let Some(notice) = stream.next().await {
            if notice.is_some() {
                return notice;
            }
        }
        None
    };
    timeout(Duration::from_secs(1), next_notice)
        .await
        .ok()
        .flatten()
}

pub struct MockSlotRepositoryInner {
    pub local: LocalSlots,
    pub fail_reads: AtomicBool,
    pub steal_before_mark: AtomicBool,
    pub fail_booking_insert: AtomicBool,
    pub fail_release: AtomicBool,
    pub conflicting_shifts: AtomicU64,
    pub conflicting_deletes: AtomicU64,
    pub calls_to_slots: AtomicU64,
    pub calls_to_slot: AtomicU64,
    pub calls_to_insert_slot: AtomicU64,
    pub calls_to_mark_booked: AtomicU64,
    pub calls_to_resize_booked: AtomicU64,
    pub calls_to_release_slot: AtomicU64,
    pub calls_to_delete_available_slot: AtomicU64,
    pub calls_to_shift_slot: AtomicU64,
    pub calls_to_insert_booking: AtomicU64,
    pub calls_to_cancel_booking: AtomicU64,
    pub calls_to_change_version: AtomicU64,
    pub journal: Mutex<Vec<&'static str>>,
}

/// Counting wrapper around [`LocalSlots`] with failure injection.
#[derive(Clone)]
pub struct MockSlotRepository(pub Arc<MockSlotRepositoryInner>);

impl MockSlotRepositoryInner {
    fn new() -> Self {
        Self {
            local: LocalSlots::default(),
            fail_reads: AtomicBool::new(false),
            steal_before_mark: AtomicBool::new(false),
            fail_booking_insert: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            conflicting_shifts: AtomicU64::default(),
            conflicting_deletes: AtomicU64::default(),
            calls_to_slots: AtomicU64::default(),
            calls_to_slot: AtomicU64::default(),
            calls_to_insert_slot: AtomicU64::default(),
            calls_to_mark_booked: AtomicU64::default(),
            calls_to_resize_booked: AtomicU64::default(),
            calls_to_release_slot: AtomicU64::default(),
            calls_to_delete_available_slot: AtomicU64::default(),
            calls_to_shift_slot: AtomicU64::default(),
            calls_to_insert_booking: AtomicU64::default(),
            calls_to_cancel_booking: AtomicU64::default(),
            calls_to_change_version: AtomicU64::default(),
            journal: Mutex::new(Vec::new()),
        }
    }
}

impl MockSlotRepository {
    pub fn new() -> Self {
        Self(Arc::new(MockSlotRepositoryInner::new()))
    }

    /// Writes issued by the engine, seeding through `insert_slot` excluded.
    pub fn writes(&self) -> u64 {
        [
            &self.0.calls_to_mark_booked,
            &self.0.calls_to_resize_booked,
            &self.0.calls_to_release_slot,
            &self.0.calls_to_delete_available_slot,
            &self.0.calls_to_shift_slot,
            &self.0.calls_to_insert_booking,
            &self.0.calls_to_cancel_booking,
        ]
        .iter()
        .map(|calls| calls.load(Ordering::SeqCst))
        .sum()
    }

    /// Names of the write methods called so far, in call order.
    pub fn journal(&self) -> Vec<&'static str> {
        self.0.journal.lock().unwrap().clone()
    }

    fn write(&self, calls: &AtomicU64, name: &'static str) {
        calls.fetch_add(1, Ordering::SeqCst);
        self.0.journal.lock().unwrap().push(name);
    }

    fn read(&self, calls: &AtomicU64) -> Result<(), RepositoryError> {
        calls.fetch_add(1, Ordering::SeqCst);
        match self.0.fail_reads.load(Ordering::SeqCst) {
            true => Err(RepositoryError::Unavailable("Supposed to fail".into())),
            false => Ok(()),
        }
    }

    fn take_conflict(counter: &AtomicU64) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl SlotRepository for MockSlotRepository {
    fn slots(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, RepositoryError> {
        self.read(&self.0.calls_to_slots)?;
        self.0.local.slots(barber_id, from, to)
    }

    fn slot(&self, id: Uuid) -> Result<Option<Slot>, RepositoryError> {
        self.read(&self.0.calls_to_slot)?;
        self.0.local.slot(id)
    }

    fn insert_slot(&self, slot: NewSlot) -> Result<Slot, RepositoryError> {
        self.write(&self.0.calls_to_insert_slot, "insert_slot");
        self.0.local.insert_slot(slot)
    }

    fn mark_booked(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError> {
        self.write(&self.0.calls_to_mark_booked, "mark_booked");
        if self.0.steal_before_mark.swap(false, Ordering::SeqCst) {
            // another actor wins the race between re-read and write
            self.0.local.mark_booked(id, end_time)?;
        }
        self.0.local.mark_booked(id, end_time)
    }

    fn resize_booked(
        &self,
        id: Uuid,
        expected_end: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<bool, RepositoryError> {
        self.write(&self.0.calls_to_resize_booked, "resize_booked");
        self.0.local.resize_booked(id, expected_end, end_time)
    }

    fn release_slot(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError> {
        self.write(&self.0.calls_to_release_slot, "release_slot");
        if self.0.fail_release.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("Supposed to fail".into()));
        }
        self.0.local.release_slot(id, end_time)
    }

    fn delete_available_slot(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.write(&self.0.calls_to_delete_available_slot, "delete_available_slot");
        if Self::take_conflict(&self.0.conflicting_deletes) {
            // another actor removes the slot first
            self.0.local.delete_available_slot(id)?;
        }
        self.0.local.delete_available_slot(id)
    }

    fn shift_slot(&self, movement: &SlotMove) -> Result<bool, RepositoryError> {
        self.write(&self.0.calls_to_shift_slot, "shift_slot");
        if Self::take_conflict(&self.0.conflicting_shifts) {
            return Ok(false);
        }
        self.0.local.shift_slot(movement)
    }

    fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        self.write(&self.0.calls_to_insert_booking, "insert_booking");
        if self.0.fail_booking_insert.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("Supposed to fail".into()));
        }
        self.0.local.insert_booking(booking)
    }

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        self.0.local.booking(id)
    }

    fn cancel_booking(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.write(&self.0.calls_to_cancel_booking, "cancel_booking");
        self.0.local.cancel_booking(id)
    }

    fn change_version(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u64, RepositoryError> {
        self.read(&self.0.calls_to_change_version)?;
        self.0.local.change_version(barber_id, from, to)
    }

    fn change_stream(&self) -> WatchStream<Option<ChangeNotice>> {
        self.0.local.change_stream()
    }
}
