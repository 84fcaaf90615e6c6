//! Optimistic booking protocol on top of a [`SlotRepository`].
//!
//! Nothing is written before the anchor slot is taken with a compare-and-swap
//! on its status, so two coordinators racing for the same slot produce exactly
//! one booking. Everything written afterwards happens inside time the winner
//! owns and is only contended by concurrent edits of neighbouring slots, which
//! are detected through conditional writes and answered by recalculating
//! against a fresh read.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::availability::compute_availability;
use crate::catalog::ServiceCatalog;
use crate::error::{BookingError, CatalogError, RepositoryError, SelectionError};
use crate::identity::WalkInDetails;
use crate::recalculation::{recalculate, Recalculation};
use crate::repository::SlotRepository;
use crate::restoration::{plan_restoration, Restoration};
use crate::types::{
    Booking, BookingSource, BookingStatus, CustomerIdentity, NewSlot, PartitionSnapshot, Slot,
};

/// Applying the derived slot writes is tried this many times in total.
pub const RECALCULATION_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub barber_id: Uuid,
    pub slot_id: Uuid,
    pub services: Vec<String>,
    pub source: BookingSource,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub walk_in: Option<WalkInDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResolvedSelection {
    duration_minutes: u32,
    total_price_cents: i64,
    minimum_service_minutes: u32,
}

/// Writes of one booking in flight, kept to undo them if the booking fails.
struct Commit {
    anchor: Slot,
    anchor_end: NaiveTime,
    duration_minutes: u32,
    minimum_service_minutes: u32,
    applied: PartitionSnapshot,
}

pub struct BookingCoordinator<T: SlotRepository, C: ServiceCatalog> {
    repository: T,
    catalog: Arc<C>,
    end_of_day: NaiveTime,
    fallback_minimum_service_minutes: u32,
}

impl<T: SlotRepository, C: ServiceCatalog> Clone for BookingCoordinator<T, C> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            catalog: self.catalog.clone(),
            end_of_day: self.end_of_day,
            fallback_minimum_service_minutes: self.fallback_minimum_service_minutes,
        }
    }
}

impl<T: SlotRepository, C: ServiceCatalog> BookingCoordinator<T, C> {
    pub fn new(
        repository: T,
        catalog: C,
        end_of_day: NaiveTime,
        fallback_minimum_service_minutes: u32,
    ) -> Self {
        Self {
            repository,
            catalog: Arc::new(catalog),
            end_of_day,
            fallback_minimum_service_minutes,
        }
    }

    pub fn repository(&self) -> &T {
        &self.repository
    }

    pub fn end_of_day(&self) -> NaiveTime {
        self.end_of_day
    }

    /// Publishes an available slot.
    pub fn add_slot(&self, slot: NewSlot) -> Result<Slot, BookingError> {
        Ok(self.repository.insert_slot(slot)?)
    }

    /// Withdraws an available slot. Booked slots are released by canceling
    /// their booking instead.
    pub fn remove_slot(&self, slot_id: Uuid) -> Result<(), BookingError> {
        match self.repository.slot(slot_id)? {
            None => Err(BookingError::SlotGone(slot_id)),
            Some(_) if self.repository.delete_available_slot(slot_id)? => Ok(()),
            Some(_) => Err(BookingError::SlotUnavailable(slot_id)),
        }
    }

    pub fn book(&self, request: BookingRequest) -> Result<Booking, BookingError> {
        let customer =
            CustomerIdentity::from_parts(request.source, request.customer_id, request.walk_in)?;
        let selection = self.resolve_selection(request.barber_id, &request.services)?;

        let slot = self
            .repository
            .slot(request.slot_id)?
            .ok_or(BookingError::SlotGone(request.slot_id))?;
        if slot.barber_id != request.barber_id {
            return Err(SelectionError::ForeignSlot.into());
        }
        if !slot.is_available() {
            return Err(BookingError::SlotUnavailable(slot.id));
        }

        let day = self.repository.day_slots(slot.barber_id, slot.date)?;
        let fits = compute_availability(&day, selection.duration_minutes, self.end_of_day)
            .iter()
            .find(|entry| entry.slot_id == slot.id)
            .map(|entry| entry.selectable());
        match fits {
            None => return Err(BookingError::SlotGone(slot.id)),
            Some(false) => return Err(BookingError::SlotUnavailable(slot.id)),
            Some(true) => {}
        }

        let recalculation = self.recalculate(&slot, &day, selection)?;
        let booking_end = recalculation.booking_end;

        // Claim the slot. Shrinking never overlaps a neighbour; growing past the
        // anchor's own end waits until the consumed slots are gone.
        let held_end = slot.end_time.min(booking_end);
        if !self.repository.mark_booked(slot.id, held_end)? {
            info!(slot_id = %slot.id, "Slot was taken by a concurrent booking");
            return Err(BookingError::SlotUnavailable(slot.id));
        }

        let mut commit = Commit {
            anchor: slot.clone(),
            anchor_end: held_end,
            duration_minutes: selection.duration_minutes,
            minimum_service_minutes: selection.minimum_service_minutes,
            applied: PartitionSnapshot {
                anchor: Some(slot.range()),
                ..PartitionSnapshot::default()
            },
        };

        if let Err(err) = self.apply_recalculation(&mut commit, recalculation) {
            error!(?err, slot_id = %slot.id, "Failed to apply slot recalculation");
            self.compensate(&commit);
            return Err(err);
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            barber_id: slot.barber_id,
            slot_id: slot.id,
            date: slot.date,
            start_time: slot.start_time,
            end_time: booking_end,
            duration_minutes: selection.duration_minutes,
            service_selection: request.services,
            total_price_cents: selection.total_price_cents,
            customer,
            source: request.source,
            status: BookingStatus::Confirmed,
            released_partition: commit.applied.clone(),
        };

        if let Err(err) = self.repository.insert_booking(&booking) {
            error!(?err, slot_id = %slot.id, "Failed to store booking");
            self.compensate(&commit);
            return Err(err.into());
        }

        info!(
            booking_id = %booking.id,
            slot_id = %slot.id,
            start = %booking.start_time,
            end = %booking.end_time,
            "Booking confirmed"
        );
        Ok(booking)
    }

    /// Cancels a confirmed booking and gives its time back to the day.
    ///
    /// The booking only turns canceled once its time is back, so a cancel that
    /// failed halfway is finished by sending it again.
    pub fn cancel_booking(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        let booking = self
            .repository
            .booking(booking_id)?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        if booking.status == BookingStatus::Canceled {
            return Err(SelectionError::AlreadyCanceled.into());
        }

        let day = self.repository.day_slots(booking.barber_id, booking.date)?;
        let restoration = plan_restoration(booking.slot_id, &booking.released_partition, &day);

        self.apply_restoration(&booking.slot_id, booking.barber_id, booking.date, &restoration)?;
        if !self.repository.cancel_booking(booking_id)? {
            return Err(SelectionError::AlreadyCanceled.into());
        }

        info!(%booking_id, slot_id = %booking.slot_id, "Booking canceled");
        Ok(Booking {
            status: BookingStatus::Canceled,
            ..booking
        })
    }

    fn resolve_selection(
        &self,
        barber_id: Uuid,
        services: &[String],
    ) -> Result<ResolvedSelection, BookingError> {
        if services.is_empty() {
            return Err(SelectionError::NoServices.into());
        }

        let offerings = self
            .catalog
            .resolve(barber_id, services)
            .map_err(catalog_error)?;
        let duration_minutes = offerings
            .iter()
            .try_fold(0u32, |total, o| total.checked_add(o.duration_minutes))
            .ok_or(SelectionError::SelectionTooLarge)?;
        if duration_minutes == 0 {
            return Err(SelectionError::ZeroDuration.into());
        }

        let minimum_service_minutes = self
            .catalog
            .minimum_duration(barber_id)
            .map_err(catalog_error)?
            .unwrap_or(self.fallback_minimum_service_minutes);

        let total_price_cents = offerings
            .iter()
            .try_fold(0i64, |total, o| total.checked_add(o.price_cents))
            .ok_or(SelectionError::SelectionTooLarge)?;

        Ok(ResolvedSelection {
            duration_minutes,
            total_price_cents,
            minimum_service_minutes,
        })
    }

    fn recalculate(
        &self,
        anchor: &Slot,
        day: &[Slot],
        selection: ResolvedSelection,
    ) -> Result<Recalculation, BookingError> {
        let rest: Vec<Slot> = day
            .iter()
            .filter(|slot| slot.id != anchor.id)
            .cloned()
            .collect();
        recalculate(
            anchor.start_time,
            selection.duration_minutes,
            selection.minimum_service_minutes,
            &rest,
        )
        .map_err(|err| {
            info!(?err, slot_id = %anchor.id, "Booking no longer fits the day");
            BookingError::SlotUnavailable(anchor.id)
        })
    }

    fn apply_recalculation(
        &self,
        commit: &mut Commit,
        mut recalculation: Recalculation,
    ) -> Result<(), BookingError> {
        let mut attempt = 1;
        loop {
            if self.apply_once(commit, &recalculation)? {
                return Ok(());
            }
            if attempt >= RECALCULATION_ATTEMPTS {
                return Err(BookingError::RecalculationConflict { attempts: attempt });
            }

            warn!(
                slot_id = %commit.anchor.id,
                attempt,
                "Slot recalculation conflicted, retrying with a fresh read"
            );
            attempt += 1;
            let day = self
                .repository
                .day_slots(commit.anchor.barber_id, commit.anchor.date)?;
            let selection = ResolvedSelection {
                duration_minutes: commit.duration_minutes,
                total_price_cents: 0,
                minimum_service_minutes: commit.minimum_service_minutes,
            };
            recalculation = self.recalculate(&commit.anchor, &day, selection)?;
        }
    }

    /// `Ok(false)` when a conditional write found the day changed.
    fn apply_once(
        &self,
        commit: &mut Commit,
        recalculation: &Recalculation,
    ) -> Result<bool, RepositoryError> {
        for slot in &recalculation.deletions {
            if !self.repository.delete_available_slot(slot.id)? {
                return Ok(false);
            }
            commit.applied.deleted.push(slot.range());
        }

        if commit.anchor_end < recalculation.booking_end {
            if !self.repository.resize_booked(
                commit.anchor.id,
                commit.anchor_end,
                recalculation.booking_end,
            )? {
                return Ok(false);
            }
            commit.anchor_end = recalculation.booking_end;
        }

        for movement in &recalculation.shifts {
            if !self.repository.shift_slot(movement)? {
                return Ok(false);
            }
            commit.applied.shifted.push(*movement);
        }
        Ok(true)
    }

    /// Best effort undo of a failed booking. Failures are logged only, the
    /// caller already reports the original error.
    fn compensate(&self, commit: &Commit) {
        let anchor = &commit.anchor;
        let result = self
            .repository
            .day_slots(anchor.barber_id, anchor.date)
            .and_then(|day| {
                let restoration = plan_restoration(anchor.id, &commit.applied, &day);
                self.apply_restoration(&anchor.id, anchor.barber_id, anchor.date, &restoration)
            });
        if let Err(err) = result {
            error!(?err, slot_id = %anchor.id, "Failed to release slot of failed booking");
        }
    }

    fn apply_restoration(
        &self,
        anchor_id: &Uuid,
        barber_id: Uuid,
        date: NaiveDate,
        restoration: &Restoration,
    ) -> Result<(), RepositoryError> {
        for movement in &restoration.shift_backs {
            if !self.repository.shift_slot(movement)? {
                warn!(slot_id = %movement.slot_id, "Slot changed meanwhile, not moved back");
            }
        }

        match restoration.anchor_release {
            Some(release) => {
                if !self.repository.release_slot(release.slot_id, release.end_time)? {
                    warn!(slot_id = %release.slot_id, "Slot changed meanwhile, not released");
                }
            }
            None => warn!(slot_id = %anchor_id, "Booked slot missing, nothing to release"),
        }

        for range in &restoration.inserts {
            let slot = NewSlot {
                barber_id,
                date,
                start_time: range.start_time,
                end_time: range.end_time,
            };
            match self.repository.insert_slot(slot) {
                Ok(_) => {}
                Err(RepositoryError::Overlap) => {
                    warn!(start = %range.start_time, "Time taken meanwhile, slot not re-created")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn catalog_error(err: CatalogError) -> BookingError {
    match err {
        CatalogError::Unavailable(reason) => {
            BookingError::Repository(RepositoryError::Unavailable(reason))
        }
        err => SelectionError::Catalog(err).into(),
    }
}
