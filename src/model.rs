use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ScheduleError;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)` with `start < end`.
///
/// The only way to obtain one is [`TimeRange::new`] (or deserializing, which
/// runs the same check), so every `TimeRange` in the system has a positive
/// duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: Ms,
    end: Ms,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: Ms,
    end: Ms,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = ScheduleError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        TimeRange::new(raw.start, raw.end)
    }
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Result<Self, ScheduleError> {
        if start >= end {
            return Err(ScheduleError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Ms {
        self.start
    }

    pub fn end(&self) -> Ms {
        self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// True iff the two ranges share an instant. Ranges that only touch
    /// (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One committed slot: the subject being scheduled and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Booking {
    pub subject_id: Ulid,
    pub range: TimeRange,
}

impl Booking {
    pub fn new(subject_id: Ulid, range: TimeRange) -> Self {
        Self { subject_id, range }
    }
}

/// Journal record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CalendarCreated {
        id: Ulid,
        name: Option<String>,
    },
    CalendarDeleted {
        id: Ulid,
    },
    TimeBlockAdded {
        calendar_id: Ulid,
        subject_id: Ulid,
        range: TimeRange,
    },
    TimeBlockRemoved {
        calendar_id: Ulid,
        subject_id: Ulid,
    },
}

impl Event {
    pub fn calendar_id(&self) -> Ulid {
        match self {
            Event::CalendarCreated { id, .. } | Event::CalendarDeleted { id } => *id,
            Event::TimeBlockAdded { calendar_id, .. } | Event::TimeBlockRemoved { calendar_id, .. } => {
                *calendar_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub bookings: usize,
}
