use crate::error::RepositoryError;
use crate::repository::SlotRepository;
use crate::schema::{bookings, slot_versions, slots};
use crate::types::{
    Booking, BookingStatus, ChangeNotice, NewSlot, Slot, SlotMove, SlotStatus, TimeRange,
};
use chrono::{NaiveDate, NaiveTime};
use diesel::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = slots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SlotRow {
    id: Uuid,
    barber_id: Uuid,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    status: String,
}

impl TryFrom<SlotRow> for Slot {
    type Error = RepositoryError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        Ok(Slot {
            id: row.id,
            barber_id: row.barber_id,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status.parse().map_err(RepositoryError::Malformed)?,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = bookings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct BookingRow {
    id: Uuid,
    barber_id: Uuid,
    slot_id: Uuid,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    duration_minutes: i32,
    service_selection: Vec<String>,
    total_price_cents: i64,
    customer: serde_json::Value,
    source: String,
    status: String,
    released_partition: serde_json::Value,
}

impl TryFrom<&Booking> for BookingRow {
    type Error = RepositoryError;

    fn try_from(booking: &Booking) -> Result<Self, Self::Error> {
        Ok(BookingRow {
            id: booking.id,
            barber_id: booking.barber_id,
            slot_id: booking.slot_id,
            date: booking.date,
            start_time: booking.start_time,
            end_time: booking.end_time,
            duration_minutes: i32::try_from(booking.duration_minutes)
                .map_err(|err| RepositoryError::Malformed(err.to_string()))?,
            service_selection: booking.service_selection.clone(),
            total_price_cents: booking.total_price_cents,
            customer: serde_json::to_value(&booking.customer)?,
            source: booking.source.as_str().into(),
            status: booking.status.as_str().into(),
            released_partition: serde_json::to_value(&booking.released_partition)?,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = RepositoryError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            barber_id: row.barber_id,
            slot_id: row.slot_id,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_minutes: u32::try_from(row.duration_minutes)
                .map_err(|err| RepositoryError::Malformed(err.to_string()))?,
            service_selection: row.service_selection,
            total_price_cents: row.total_price_cents,
            customer: serde_json::from_value(row.customer)?,
            source: row.source.parse().map_err(RepositoryError::Malformed)?,
            status: row.status.parse().map_err(RepositoryError::Malformed)?,
            released_partition: serde_json::from_value(row.released_partition)?,
        })
    }
}

/// PostgreSQL slot repository.
///
/// Writes to one barber's day are serialized by a row lock on its
/// `slot_versions` entry, which also carries the day's change counter. Change
/// notices are published for writes of this process only, other processes'
/// writes are picked up through [`SlotRepository::change_version`].
#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
    sender: Sender<Option<ChangeNotice>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        let (sender, _) = watch::channel(None);
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            sender,
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, RepositoryError> {
        self.connection.lock().map_err(|err| {
            error!(?err, "Database connection lock poisoned");
            RepositoryError::Unavailable("database connection lock poisoned".into())
        })
    }

    /// Runs `write` in a transaction holding the day lock. The day's version is
    /// bumped and a notice sent only if `write` reports a change.
    fn write_day<F>(&self, barber_id: Uuid, date: NaiveDate, write: F) -> Result<bool, RepositoryError>
    where
        F: FnOnce(&mut PgConnection) -> QueryResult<bool>,
    {
        let version = self
            .connection()?
            .transaction::<_, diesel::result::Error, _>(|connection| {
                lock_day(connection, barber_id, date)?;
                if !write(connection)? {
                    return Ok(None);
                }
                diesel::update(slot_versions::table.find((barber_id, date)))
                    .set(slot_versions::version.eq(slot_versions::version + 1))
                    .returning(slot_versions::version)
                    .get_result::<i64>(connection)
                    .map(Some)
            })?;

        let Some(version) = version else {
            return Ok(false);
        };
        self.sender.send_replace(Some(ChangeNotice {
            barber_id,
            date,
            version: u64::try_from(version).unwrap_or_default(),
        }));
        Ok(true)
    }

    #[cfg(test)]
    fn remove_all(&self) {
        let mut connection = self.connection().unwrap();
        diesel::delete(bookings::table).execute(&mut *connection).unwrap();
        diesel::delete(slots::table).execute(&mut *connection).unwrap();
        diesel::delete(slot_versions::table)
            .execute(&mut *connection)
            .unwrap();
    }
}

fn lock_day(connection: &mut PgConnection, barber_id: Uuid, date: NaiveDate) -> QueryResult<i64> {
    diesel::insert_into(slot_versions::table)
        .values((
            slot_versions::barber_id.eq(barber_id),
            slot_versions::date.eq(date),
            slot_versions::version.eq(0_i64),
        ))
        .on_conflict_do_nothing()
        .execute(connection)?;

    slot_versions::table
        .find((barber_id, date))
        .select(slot_versions::version)
        .for_update()
        .first(connection)
}

fn overlaps_other(
    connection: &mut PgConnection,
    slot: &Slot,
    range: &TimeRange,
) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        slots::table
            .filter(slots::barber_id.eq(slot.barber_id))
            .filter(slots::date.eq(slot.date))
            .filter(slots::id.ne(slot.id))
            .filter(slots::start_time.lt(range.end_time))
            .filter(slots::end_time.gt(range.start_time)),
    ))
    .get_result(connection)
}

impl SlotRepository for DatabaseInterface {
    fn slots(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, RepositoryError> {
        let rows = slots::table
            .filter(slots::barber_id.eq(barber_id))
            .filter(slots::date.between(from, to))
            .order((slots::date, slots::start_time))
            .select(SlotRow::as_select())
            .load(&mut *self.connection()?)?;
        rows.into_iter().map(Slot::try_from).collect()
    }

    fn slot(&self, id: Uuid) -> Result<Option<Slot>, RepositoryError> {
        slots::table
            .find(id)
            .select(SlotRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .map(Slot::try_from)
            .transpose()
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
        let row = SlotRow {
            id: slot.id,
            barber_id: slot.barber_id,
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            status: slot.status.as_str().into(),
        };

        let inserted = self.write_day(slot.barber_id, slot.date, |connection| {
            if overlaps_other(connection, &slot, &slot.range())? {
                return Ok(false);
            }
            diesel::insert_into(slots::table)
                .values(&row)
                .execute(connection)
                .map(|rows| rows == 1)
        })?;

        if !inserted {
            error!(%slot, "Slot overlaps an existing slot");
            return Err(RepositoryError::Overlap);
        }
        info!(%slot, "Slot added");
        Ok(slot)
    }

    fn mark_booked(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError> {
        let Some(slot) = self.slot(id)? else {
            return Ok(false);
        };
        let range = TimeRange {
            start_time: slot.start_time,
            end_time,
        };
        if end_time <= slot.start_time {
            return Ok(false);
        }

        self.write_day(slot.barber_id, slot.date, |connection| {
            if overlaps_other(connection, &slot, &range)? {
                return Ok(false);
            }
            diesel::update(
                slots::table
                    .filter(slots::id.eq(id))
                    .filter(slots::status.eq(SlotStatus::Available.as_str())),
            )
            .set((
                slots::status.eq(SlotStatus::Booked.as_str()),
                slots::end_time.eq(end_time),
            ))
            .execute(connection)
            .map(|rows| rows == 1)
        })
    }

    fn resize_booked(
        &self,
        id: Uuid,
        expected_end: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<bool, RepositoryError> {
        let Some(slot) = self.slot(id)? else {
            return Ok(false);
        };
        let range = TimeRange {
            start_time: slot.start_time,
            end_time,
        };
        if end_time <= slot.start_time {
            return Ok(false);
        }

        self.write_day(slot.barber_id, slot.date, |connection| {
            if overlaps_other(connection, &slot, &range)? {
                return Ok(false);
            }
            diesel::update(
                slots::table
                    .filter(slots::id.eq(id))
                    .filter(slots::status.eq(SlotStatus::Booked.as_str()))
                    .filter(slots::end_time.eq(expected_end)),
            )
            .set(slots::end_time.eq(end_time))
            .execute(connection)
            .map(|rows| rows == 1)
        })
    }

    fn release_slot(&self, id: Uuid, end_time: NaiveTime) -> Result<bool, RepositoryError> {
        let Some(slot) = self.slot(id)? else {
            return Ok(false);
        };
        let range = TimeRange {
            start_time: slot.start_time,
            end_time,
        };
        if end_time <= slot.start_time {
            return Ok(false);
        }

        self.write_day(slot.barber_id, slot.date, |connection| {
            if overlaps_other(connection, &slot, &range)? {
                return Ok(false);
            }
            diesel::update(
                slots::table
                    .filter(slots::id.eq(id))
                    .filter(slots::status.eq(SlotStatus::Booked.as_str())),
            )
            .set((
                slots::status.eq(SlotStatus::Available.as_str()),
                slots::end_time.eq(end_time),
            ))
            .execute(connection)
            .map(|rows| rows == 1)
        })
    }

    fn delete_available_slot(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let Some(slot) = self.slot(id)? else {
            return Ok(false);
        };

        self.write_day(slot.barber_id, slot.date, |connection| {
            diesel::delete(
                slots::table
                    .filter(slots::id.eq(id))
                    .filter(slots::status.eq(SlotStatus::Available.as_str())),
            )
            .execute(connection)
            .map(|rows| rows == 1)
        })
    }

    fn shift_slot(&self, movement: &SlotMove) -> Result<bool, RepositoryError> {
        let Some(slot) = self.slot(movement.slot_id)? else {
            return Ok(false);
        };

        self.write_day(slot.barber_id, slot.date, |connection| {
            if overlaps_other(connection, &slot, &movement.to)? {
                return Ok(false);
            }
            diesel::update(
                slots::table
                    .filter(slots::id.eq(movement.slot_id))
                    .filter(slots::status.eq(SlotStatus::Available.as_str()))
                    .filter(slots::start_time.eq(movement.from.start_time))
                    .filter(slots::end_time.eq(movement.from.end_time)),
            )
            .set((
                slots::start_time.eq(movement.to.start_time),
                slots::end_time.eq(movement.to.end_time),
            ))
            .execute(connection)
            .map(|rows| rows == 1)
        })
    }

    fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        let row = BookingRow::try_from(booking)?;
        self.write_day(booking.barber_id, booking.date, |connection| {
            diesel::insert_into(bookings::table)
                .values(&row)
                .execute(connection)
                .map(|rows| rows == 1)
        })?;
        Ok(())
    }

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        bookings::table
            .find(id)
            .select(BookingRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .map(Booking::try_from)
            .transpose()
    }

    fn cancel_booking(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let Some(booking) = self.booking(id)? else {
            return Ok(false);
        };

        self.write_day(booking.barber_id, booking.date, |connection| {
            diesel::update(
                bookings::table
                    .filter(bookings::id.eq(id))
                    .filter(bookings::status.eq(BookingStatus::Confirmed.as_str())),
            )
            .set(bookings::status.eq(BookingStatus::Canceled.as_str()))
            .execute(connection)
            .map(|rows| rows == 1)
        })
    }

    fn change_version(
        &self,
        barber_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u64, RepositoryError> {
        let versions: Vec<i64> = slot_versions::table
            .filter(slot_versions::barber_id.eq(barber_id))
            .filter(slot_versions::date.between(from, to))
            .select(slot_versions::version)
            .load(&mut *self.connection()?)?;
        Ok(versions
            .into_iter()
            .map(|version| u64::try_from(version).unwrap_or_default())
            .sum())
    }

    fn change_stream(&self) -> WatchStream<Option<ChangeNotice>> {
        WatchStream::new(self.sender.subscribe())
    }
}
