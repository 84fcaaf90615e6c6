use crate::error::RepositoryError;
use crate::types::{Booking, ChangeNotice, NewSlot, Slot, SlotMove};
use chrono::{NaiveDate, NaiveTime};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

/// Durable storage of slot and booking records.
///
/// Every conditional method returns `Ok(false)` when its precondition did not
/// hold at write time and leaves the record untouched in that case. Every
/// committed mutation bumps the change version of the affected barber and date
/// and publishes a [`ChangeNotice`].
pub trait SlotRepository: Clone + Send + Sync + 'static {
    /// Slots of a barber within `[from, to]`, ordered by date and start time.
    fn slots(&self, barber_id: Uuid, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<Slot>, RepositoryError>;

    fn day_slots(&self, barber_id: Uuid, date: NaiveDate) -> Result<Vec<Slot>, RepositoryError> {
        self.slots(barber_id, date, date)
    }

    fn slot(&self, id: Uuid) -> Result<Option<Slot>, RepositoryError>;

    /// Fails with [`RepositoryError::Overlap`] if the new slot intersects an
    /// existing one of the same barber and date, and with
    /// [`RepositoryError::InvalidRange`] unless it ends after it starts.
    fn insert_slot(&self, slot: NewSlot) -> Result<Slot, RepositoryError>;

    /// `available -> booked`, setting the end time in the same write.
    fn mark_booked(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError>;

    /// Changes the end of a booked slot still ending at `expected_end`.
    fn resize_booked(
        &self,
        id: Uuid,
        expected_end: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<bool, RepositoryError>;

    /// `booked -> available`, setting the end time in the same write.
    fn release_slot(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError>;

    /// Deletes a slot only while it is available.
    fn delete_available_slot(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Moves an available slot that still sits at `movement.from`.
    fn shift_slot(&self, movement: &SlotMove) -> Result<bool, RepositoryError>;

    fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError>;

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError>;

    /// `confirmed -> canceled`.
    fn cancel_booking(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Sum of the per-day change counters of a barber within `[from, to]`.
    /// Grows with every committed mutation in that range.
    fn change_version(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u64, RepositoryError>;

    fn change_stream(&self) -> WatchStream<Option<ChangeNotice>>;
}
