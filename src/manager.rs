use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::debug;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::error::ScheduleError;
use crate::journal::JournalHandle;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{outcome_label, BOOKING_ATTEMPTS_TOTAL, CRITICAL_SECTION_SECONDS};

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), ScheduleError> {
    if range.end() > MAX_VALID_TIMESTAMP_MS {
        return Err(ScheduleError::LimitExceeded("timestamp out of range"));
    }
    if range.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(ScheduleError::LimitExceeded("time block too long"));
    }
    Ok(())
}

/// Policy facade over one [`Calendar`].
///
/// Every mutation runs its conflict check and its commit under the same
/// write lock, so two callers racing for overlapping slots cannot both win.
/// Reads take the read lock and see either the state before or after a
/// mutation, never a partial one. Share it between threads with `Arc`.
///
/// When created by a [`crate::Scheduler`] the manager also journals each
/// mutation and broadcasts it on the scheduler's [`NotifyHub`]; a manager
/// from [`CalendarManager::new`] is purely in-memory.
pub struct CalendarManager {
    id: Ulid,
    name: Option<String>,
    calendar: RwLock<Calendar>,
    /// Set under the write lock when the owning scheduler deletes this calendar.
    retired: AtomicBool,
    journal: Option<JournalHandle>,
    notify: Option<Arc<NotifyHub>>,
}

impl CalendarManager {
    pub fn new(calendar: Calendar) -> Self {
        Self::with_hooks(Ulid::new(), None, calendar, None, None)
    }

    pub(crate) fn with_hooks(
        id: Ulid,
        name: Option<String>,
        calendar: Calendar,
        journal: Option<JournalHandle>,
        notify: Option<Arc<NotifyHub>>,
    ) -> Self {
        Self {
            id,
            name,
            calendar: RwLock::new(calendar),
            retired: AtomicBool::new(false),
            journal,
            notify,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    // The guarded calendar is only changed by single Vec operations, so a
    // panic elsewhere while the lock was held cannot leave it half-written.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Calendar> {
        self.calendar.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Calendar> {
        self.calendar.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reads ────────────────────────────────────────────────

    /// Snapshot of every `(subject, range)` on this calendar. Order is unspecified.
    pub fn get_time_ranges(&self) -> Vec<Booking> {
        self.read().all_bookings()
    }

    /// True iff `range` conflicts with an existing booking.
    pub fn time_range_occupied(&self, range: &TimeRange) -> bool {
        self.read().has_conflict(range)
    }

    pub fn find_booking(&self, subject_id: &Ulid) -> Result<Booking, ScheduleError> {
        self.read()
            .get(subject_id)
            .copied()
            .ok_or(ScheduleError::NotFound(*subject_id))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Unbooked gaps inside `window`, optionally only those at least
    /// `min_duration_ms` long.
    pub fn free_slots(
        &self,
        window: &TimeRange,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<TimeRange>, ScheduleError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(ScheduleError::LimitExceeded("query window too wide"));
        }
        let mut free = self.read().free_within(window);
        if let Some(min) = min_duration_ms {
            free.retain(|slot| slot.duration_ms() >= min);
        }
        Ok(free)
    }

    // ── Mutations ────────────────────────────────────────────

    /// Book `subject_id` for `range`, or fail without touching the calendar.
    pub fn add_time_block(&self, subject_id: Ulid, range: TimeRange) -> Result<(), ScheduleError> {
        let result = self.try_add(subject_id, range);
        metrics::counter!(BOOKING_ATTEMPTS_TOTAL, "op" => "add", "outcome" => outcome_label(&result))
            .increment(1);
        match &result {
            Ok(()) => debug!(calendar = %self.id, subject = %subject_id, %range, "time block added"),
            Err(e) => debug!(calendar = %self.id, subject = %subject_id, %range, "time block rejected: {e}"),
        }
        result
    }

    fn try_add(&self, subject_id: Ulid, range: TimeRange) -> Result<(), ScheduleError> {
        validate_range(&range)?;
        let mut guard = self.write();
        let locked_at = Instant::now();
        let result = self.check_and_book(&mut guard, subject_id, range);
        metrics::histogram!(CRITICAL_SECTION_SECONDS).record(locked_at.elapsed().as_secs_f64());
        result
    }

    fn check_and_book(
        &self,
        cal: &mut Calendar,
        subject_id: Ulid,
        range: TimeRange,
    ) -> Result<(), ScheduleError> {
        self.ensure_live()?;
        if cal.len() >= MAX_BOOKINGS_PER_CALENDAR {
            return Err(ScheduleError::LimitExceeded("too many bookings on calendar"));
        }
        if cal.contains_subject(&subject_id) {
            return Err(ScheduleError::AlreadyBooked(subject_id));
        }
        if let Some(existing) = cal.conflicting(&range) {
            return Err(ScheduleError::DoubleBooking {
                subject_id,
                conflicting: existing.subject_id,
            });
        }
        let event = Event::TimeBlockAdded { calendar_id: self.id, subject_id, range };
        self.journal(&event)?;
        cal.book(subject_id, range);
        self.broadcast(&event);
        Ok(())
    }

    /// Book several subjects at once. All-or-nothing: if any entry conflicts
    /// with the calendar or with another entry, nothing is committed.
    pub fn add_time_blocks(&self, blocks: Vec<(Ulid, TimeRange)>) -> Result<(), ScheduleError> {
        let result = self.try_add_batch(blocks);
        metrics::counter!(BOOKING_ATTEMPTS_TOTAL, "op" => "add_batch", "outcome" => outcome_label(&result))
            .increment(1);
        if let Err(ref e) = result {
            debug!(calendar = %self.id, "batch rejected: {e}");
        }
        result
    }

    fn try_add_batch(&self, blocks: Vec<(Ulid, TimeRange)>) -> Result<(), ScheduleError> {
        if blocks.is_empty() {
            return Ok(());
        }
        if blocks.len() > MAX_BATCH_SIZE {
            return Err(ScheduleError::LimitExceeded("batch too large"));
        }
        for (_, range) in &blocks {
            validate_range(range)?;
        }

        let mut subjects: Vec<Ulid> = blocks.iter().map(|(id, _)| *id).collect();
        subjects.sort();
        if let Some(dup) = subjects.windows(2).find(|w| w[0] == w[1]) {
            return Err(ScheduleError::AlreadyBooked(dup[0]));
        }
        // Sorted by start, any overlap inside the batch shows up between neighbours.
        let mut sorted = blocks.clone();
        sorted.sort_by_key(|(_, range)| *range);
        for pair in sorted.windows(2) {
            let ((first, first_range), (second, second_range)) = (pair[0], pair[1]);
            if first_range.overlaps(&second_range) {
                return Err(ScheduleError::DoubleBooking {
                    subject_id: second,
                    conflicting: first,
                });
            }
        }

        let mut cal = self.write();
        self.ensure_live()?;
        if cal.len() + blocks.len() > MAX_BOOKINGS_PER_CALENDAR {
            return Err(ScheduleError::LimitExceeded("too many bookings on calendar"));
        }
        for (subject_id, range) in &blocks {
            if cal.contains_subject(subject_id) {
                return Err(ScheduleError::AlreadyBooked(*subject_id));
            }
            if let Some(existing) = cal.conflicting(range) {
                return Err(ScheduleError::DoubleBooking {
                    subject_id: *subject_id,
                    conflicting: existing.subject_id,
                });
            }
        }

        let events: Vec<Event> = blocks
            .into_iter()
            .map(|(subject_id, range)| Event::TimeBlockAdded { calendar_id: self.id, subject_id, range })
            .collect();
        for event in &events {
            self.journal(event)?;
        }
        for event in &events {
            if let Event::TimeBlockAdded { subject_id, range, .. } = event {
                cal.book(*subject_id, *range);
            }
            self.broadcast(event);
        }
        Ok(())
    }

    /// Free the slot held by `subject_id` and return it.
    pub fn remove_time_block(&self, subject_id: Ulid) -> Result<Booking, ScheduleError> {
        let result = self.try_remove(subject_id);
        metrics::counter!(BOOKING_ATTEMPTS_TOTAL, "op" => "remove", "outcome" => outcome_label(&result))
            .increment(1);
        match &result {
            Ok(b) => debug!(calendar = %self.id, subject = %subject_id, range = %b.range, "time block removed"),
            Err(e) => debug!(calendar = %self.id, subject = %subject_id, "remove rejected: {e}"),
        }
        result
    }

    fn try_remove(&self, subject_id: Ulid) -> Result<Booking, ScheduleError> {
        let mut cal = self.write();
        self.ensure_live()?;
        if !cal.contains_subject(&subject_id) {
            return Err(ScheduleError::NotFound(subject_id));
        }
        let event = Event::TimeBlockRemoved { calendar_id: self.id, subject_id };
        self.journal(&event)?;
        let removed = cal.unbook(&subject_id).ok_or(ScheduleError::NotFound(subject_id))?;
        self.broadcast(&event);
        Ok(removed)
    }

    // ── Scheduler plumbing ───────────────────────────────────

    /// Replay a journaled mutation. No checks: the journal only holds
    /// mutations that already passed them.
    pub(crate) fn apply_replayed(&self, event: &Event) {
        let mut cal = self.write();
        match event {
            Event::TimeBlockAdded { subject_id, range, .. } => cal.book(*subject_id, *range),
            Event::TimeBlockRemoved { subject_id, .. } => {
                cal.unbook(subject_id);
            }
            Event::CalendarCreated { .. } | Event::CalendarDeleted { .. } => {}
        }
    }

    /// Mark retired and journal the deletion, both under the write lock so
    /// no mutation can be journaled after the delete record.
    pub(crate) fn retire(&self) -> Result<(), ScheduleError> {
        let _cal = self.write();
        self.ensure_live()?;
        self.journal(&Event::CalendarDeleted { id: self.id })?;
        self.retired.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), ScheduleError> {
        if self.retired.load(Ordering::Acquire) {
            return Err(ScheduleError::CalendarNotFound(self.id));
        }
        Ok(())
    }

    fn journal(&self, event: &Event) -> Result<(), ScheduleError> {
        match &self.journal {
            Some(j) => j.append(event.clone()),
            None => Ok(()),
        }
    }

    fn broadcast(&self, event: &Event) {
        if let Some(hub) = &self.notify {
            hub.send(self.id, event);
        }
    }
}
