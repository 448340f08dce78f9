use std::net::SocketAddr;

use crate::error::ScheduleError;

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: booking attempts. Labels: op, outcome.
pub const BOOKING_ATTEMPTS_TOTAL: &str = "confcal_booking_attempts_total";

/// Histogram: time spent inside a calendar's write lock, in seconds.
pub const CRITICAL_SECTION_SECONDS: &str = "confcal_critical_section_seconds";

// ── Registry / persistence ──────────────────────────────────────

/// Gauge: calendars currently loaded.
pub const CALENDARS_ACTIVE: &str = "confcal_calendars_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "confcal_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "confcal_journal_flush_batch_size";

/// Counter: journal compactions. Labels: status.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "confcal_journal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Outcome label for a booking operation result.
pub fn outcome_label<T>(result: &Result<T, ScheduleError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label::<()>(&Ok(())), "ok");
        assert_eq!(
            outcome_label::<()>(&Err(ScheduleError::NotFound(Ulid::new()))),
            "not_found"
        );
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
