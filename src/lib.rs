pub mod calendar;
pub mod compactor;
pub mod config;
pub mod error;
pub mod journal;
pub mod limits;
pub mod manager;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scheduler;

pub use calendar::Calendar;
pub use error::ScheduleError;
pub use manager::CalendarManager;
pub use model::{Booking, Ms, TimeRange};
pub use scheduler::Scheduler;
