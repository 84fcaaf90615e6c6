//! Keeps a client's copy of a barber's slots eventually consistent.
//!
//! A view is refreshed on a timer, skipping the re-fetch while the repository's
//! change version for the viewed range is unchanged, and whenever a change
//! notice for the viewed range arrives. A refresh always replaces the whole
//! slot list.

use chrono::{NaiveDate, NaiveTime};
use futures::StreamExt;
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::availability::{compute_availability, Selectability, SlotAvailability};
use crate::error::RepositoryError;
use crate::repository::SlotRepository;
use crate::types::{ChangeNotice, Slot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub barber_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    slots: Vec<Slot>,
    version: Option<u64>,
    pending: Option<Uuid>,
}

impl SlotView {
    pub fn new(barber_id: Uuid, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            barber_id,
            from,
            to,
            slots: Vec::new(),
            version: None,
            pending: None,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Last seen change version, `None` before the first fetch.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn pending(&self) -> Option<Uuid> {
        self.pending
    }

    /// Replaces the cached slots. Drops the pending overlay.
    pub fn replace(&mut self, slots: Vec<Slot>, version: u64) {
        self.slots = slots;
        self.version = Some(version);
        self.pending = None;
    }

    /// Shows `slot_id` as pending until the next refresh.
    pub fn mark_pending(&mut self, slot_id: Uuid) {
        self.pending = Some(slot_id);
    }

    pub fn covers(&self, notice: &ChangeNotice) -> bool {
        notice.barber_id == self.barber_id && notice.date >= self.from && notice.date <= self.to
    }

    pub fn availability(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
        end_of_day: NaiveTime,
    ) -> Vec<SlotAvailability> {
        let day: Vec<Slot> = self
            .slots
            .iter()
            .filter(|slot| slot.date == date)
            .cloned()
            .collect();

        let mut availability = compute_availability(&day, duration_minutes, end_of_day);
        if let Some(pending) = self.pending {
            availability
                .iter_mut()
                .filter(|entry| entry.slot_id == pending && !entry.booked())
                .for_each(|entry| entry.selectability = Selectability::Pending);
        }
        availability
    }
}

#[derive(Clone)]
pub struct Synchronizer<T: SlotRepository> {
    repository: T,
    poll_interval: Duration,
}

impl<T: SlotRepository> Synchronizer<T> {
    pub fn new(repository: T, poll_interval: Duration) -> Self {
        Self {
            repository,
            poll_interval,
        }
    }

    /// Unconditional re-fetch.
    pub fn refresh(&self, view: &mut SlotView) -> Result<(), RepositoryError> {
        // read before the slots, a change in between shows up on the next poll
        let version = self
            .repository
            .change_version(view.barber_id, view.from, view.to)?;
        let slots = self.repository.slots(view.barber_id, view.from, view.to)?;
        view.replace(slots, version);
        Ok(())
    }

    /// Re-fetches only if the change version moved. Returns whether the view
    /// was replaced.
    pub fn poll(&self, view: &mut SlotView) -> Result<bool, RepositoryError> {
        let version = self
            .repository
            .change_version(view.barber_id, view.from, view.to)?;
        if view.version == Some(version) {
            return Ok(false);
        }
        let slots = self.repository.slots(view.barber_id, view.from, view.to)?;
        view.replace(slots, version);
        Ok(true)
    }

    pub fn on_notice(
        &self,
        view: &mut SlotView,
        notice: &ChangeNotice,
    ) -> Result<bool, RepositoryError> {
        if !view.covers(notice) {
            return Ok(false);
        }
        self.refresh(view)?;
        Ok(true)
    }

    /// Keeps `view` fresh in a background task and publishes every replaced
    /// view. The task ends once all receivers are dropped.
    pub fn spawn(self, mut view: SlotView) -> (watch::Receiver<SlotView>, JoinHandle<()>) {
        if let Err(err) = self.refresh(&mut view) {
            warn!(?err, barber_id = %view.barber_id, "Initial slot fetch failed");
        }
        let (sender, receiver) = watch::channel(view.clone());

        let handle = tokio::spawn(async move {
            let mut changes = self.repository.change_stream();
            let mut notices_open = true;
            let mut ticks = interval(self.poll_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let refreshed = tokio::select! {
                    _ = ticks.tick() => self.poll(&mut view),
                    notice = changes.next(), if notices_open => match notice {
                        Some(Some(notice)) => self.on_notice(&mut view, &notice),
                        Some(None) => Ok(false),
                        None => {
                            info!("Change notices closed, polling only");
                            notices_open = false;
                            Ok(false)
                        }
                    },
                };

                match refreshed {
                    Ok(true) => {
                        debug!(barber_id = %view.barber_id, version = ?view.version, "Slot view replaced");
                        if sender.send(view.clone()).is_err() {
                            return;
                        }
                    }
                    Ok(false) if sender.is_closed() => return,
                    Ok(false) => {}
                    Err(err) => warn!(?err, barber_id = %view.barber_id, "Slot view refresh failed, keeping previous"),
                }
            }
        });

        (receiver, handle)
    }
}
