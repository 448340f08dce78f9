use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::error::ScheduleError;
use crate::journal::{await_io, Journal, JournalCommand, JournalHandle};
use crate::limits::*;
use crate::manager::CalendarManager;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{CALENDARS_ACTIVE, JOURNAL_COMPACTIONS_TOTAL};

/// Registry of calendars, one per schedulable resource.
///
/// Each calendar has its own manager and lock, so bookings on different
/// rooms never contend. The scheduler itself only serialises creating and
/// deleting calendars against journal compaction.
pub struct Scheduler {
    calendars: DashMap<Ulid, Arc<CalendarManager>>,
    journal: Option<JournalHandle>,
    pub notify: Arc<NotifyHub>,
    catalog: Mutex<()>,
}

impl Scheduler {
    /// A scheduler whose calendars live only in memory.
    pub fn in_memory() -> Self {
        Self {
            calendars: DashMap::new(),
            journal: None,
            notify: Arc::new(NotifyHub::new()),
            catalog: Mutex::new(()),
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Spawns the journal writer, so it must run inside a tokio runtime.
    pub fn open(path: &Path) -> Result<Self, ScheduleError> {
        let io_err = |e: std::io::Error| ScheduleError::Journal(format!("{}: {e}", path.display()));
        let events = Journal::replay(path).map_err(io_err)?;
        let journal = JournalHandle::spawn(Journal::open(path).map_err(io_err)?);

        let scheduler = Self {
            journal: Some(journal),
            ..Self::in_memory()
        };
        for event in &events {
            match event {
                Event::CalendarCreated { id, name } => {
                    scheduler
                        .calendars
                        .insert(*id, Arc::new(scheduler.new_manager(*id, name.clone())));
                }
                Event::CalendarDeleted { id } => {
                    scheduler.calendars.remove(id);
                }
                other => {
                    if let Some(mgr) = scheduler.calendars.get(&other.calendar_id()) {
                        mgr.apply_replayed(other);
                    }
                }
            }
        }
        metrics::gauge!(CALENDARS_ACTIVE).set(scheduler.calendars.len() as f64);
        info!(
            path = %path.display(),
            events = events.len(),
            calendars = scheduler.calendars.len(),
            "journal replayed"
        );
        Ok(scheduler)
    }

    fn new_manager(&self, id: Ulid, name: Option<String>) -> CalendarManager {
        CalendarManager::with_hooks(
            id,
            name,
            Calendar::new(),
            self.journal.clone(),
            Some(self.notify.clone()),
        )
    }

    pub fn create_calendar(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<Arc<CalendarManager>, ScheduleError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(ScheduleError::LimitExceeded("calendar name too long"));
        }
        let _catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        if self.calendars.len() >= MAX_CALENDARS {
            return Err(ScheduleError::LimitExceeded("too many calendars"));
        }
        if self.calendars.contains_key(&id) {
            return Err(ScheduleError::CalendarExists(id));
        }

        let event = Event::CalendarCreated { id, name: name.clone() };
        if let Some(j) = &self.journal {
            j.append(event.clone())?;
        }
        let mgr = Arc::new(self.new_manager(id, name));
        self.calendars.insert(id, mgr.clone());
        metrics::gauge!(CALENDARS_ACTIVE).set(self.calendars.len() as f64);
        self.notify.send(id, &event);
        info!(calendar = %id, name = ?mgr.name(), "calendar created");
        Ok(mgr)
    }

    /// Delete a calendar and all its bookings. Managers still held by
    /// callers reject further mutations with `CalendarNotFound`.
    pub fn delete_calendar(&self, id: Ulid) -> Result<(), ScheduleError> {
        let _catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
        let mgr = self.calendar(id)?;
        mgr.retire()?;
        self.calendars.remove(&id);
        metrics::gauge!(CALENDARS_ACTIVE).set(self.calendars.len() as f64);
        self.notify.send(id, &Event::CalendarDeleted { id });
        self.notify.remove(&id);
        info!(calendar = %id, bookings = mgr.len(), "calendar deleted");
        Ok(())
    }

    pub fn calendar(&self, id: Ulid) -> Result<Arc<CalendarManager>, ScheduleError> {
        self.calendars
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(ScheduleError::CalendarNotFound(id))
    }

    pub fn list_calendars(&self) -> Vec<CalendarInfo> {
        self.calendars
            .iter()
            .map(|entry| {
                let mgr = entry.value();
                CalendarInfo {
                    id: mgr.id(),
                    name: mgr.name().map(str::to_owned),
                    bookings: mgr.len(),
                }
            })
            .collect()
    }

    /// Wait until every mutation made so far is on disk.
    pub async fn flush(&self) -> Result<(), ScheduleError> {
        match &self.journal {
            Some(j) => j.flush().await,
            None => Ok(()),
        }
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        match &self.journal {
            Some(j) => j.appends_since_compact().await,
            None => 0,
        }
    }

    /// Rewrite the journal with only the events needed to recreate the
    /// current calendars.
    pub async fn compact(&self) -> Result<(), ScheduleError> {
        let Some(journal) = &self.journal else { return Ok(()) };

        let rx = {
            let _catalog = self.catalog.lock().unwrap_or_else(PoisonError::into_inner);
            let mut managers: Vec<Arc<CalendarManager>> =
                self.calendars.iter().map(|e| e.value().clone()).collect();
            managers.sort_by_key(|m| m.id());

            // Hold every read lock until the command is queued: mutations
            // journal under their write lock, so each one lands either in
            // this snapshot or after the compact command.
            let guards: Vec<_> = managers.iter().map(|m| m.read()).collect();
            let mut events = Vec::new();
            for (mgr, cal) in managers.iter().zip(&guards) {
                events.push(Event::CalendarCreated {
                    id: mgr.id(),
                    name: mgr.name().map(str::to_owned),
                });
                events.extend(cal.all_bookings().into_iter().map(|b| Event::TimeBlockAdded {
                    calendar_id: mgr.id(),
                    subject_id: b.subject_id,
                    range: b.range,
                }));
            }

            let (response, rx) = oneshot::channel();
            journal.send(JournalCommand::Compact { events, response })?;
            rx
        };

        let result = await_io(rx).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(JOURNAL_COMPACTIONS_TOTAL, "status" => status).increment(1);
        result
    }
}
