use thiserror::Error;
use ulid::Ulid;

use crate::model::Ms;

/// Every way a calendar operation can fail. A failed call never changes
/// the calendar it was issued against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid interval [{start}, {end}): start must be before end")]
    InvalidInterval { start: Ms, end: Ms },

    #[error("double booking: {subject_id} conflicts with existing booking {conflicting}")]
    DoubleBooking { subject_id: Ulid, conflicting: Ulid },

    #[error("no booking for subject {0}")]
    NotFound(Ulid),

    #[error("subject {0} is already booked on this calendar")]
    AlreadyBooked(Ulid),

    #[error("calendar not found: {0}")]
    CalendarNotFound(Ulid),

    #[error("calendar already exists: {0}")]
    CalendarExists(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("journal error: {0}")]
    Journal(String),
}

impl ScheduleError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::InvalidInterval { .. } => "invalid_interval",
            ScheduleError::DoubleBooking { .. } => "double_booking",
            ScheduleError::NotFound(_) => "not_found",
            ScheduleError::AlreadyBooked(_) => "already_booked",
            ScheduleError::CalendarNotFound(_) => "calendar_not_found",
            ScheduleError::CalendarExists(_) => "calendar_exists",
            ScheduleError::LimitExceeded(_) => "limit_exceeded",
            ScheduleError::Journal(_) => "journal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_subjects() {
        let a = Ulid::new();
        let b = Ulid::new();
        let msg = ScheduleError::DoubleBooking { subject_id: a, conflicting: b }.to_string();
        assert!(msg.contains(&a.to_string()));
        assert!(msg.contains(&b.to_string()));

        let msg = ScheduleError::InvalidInterval { start: 10, end: 10 }.to_string();
        assert!(msg.contains("[10, 10)"));
    }

    #[test]
    fn kinds_are_distinct() {
        let id = Ulid::new();
        let kinds = [
            ScheduleError::InvalidInterval { start: 1, end: 0 }.kind(),
            ScheduleError::DoubleBooking { subject_id: id, conflicting: id }.kind(),
            ScheduleError::NotFound(id).kind(),
        ];
        assert_ne!(kinds[0], kinds[1]);
        assert_ne!(kinds[1], kinds[2]);
        assert_ne!(kinds[0], kinds[2]);
    }
}
