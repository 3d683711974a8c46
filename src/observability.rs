use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ──────────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

/// Counter: inserts and edits rejected by the overlap check.
pub const CONFLICTS_TOTAL: &str = "roombook_conflicts_total";

// ── Resource metrics ─────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Counter: logins for unknown users.
pub const AUTH_FAILURES_TOTAL: &str = "roombook_auth_failures_total";

/// Gauge: bookings currently held in memory.
pub const BOOKINGS_LIVE: &str = "roombook_bookings_live";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used on every per-query metric.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::PurgePeriod { .. } => "purge_period",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectActiveBookings { .. } => "select_active_bookings",
        Command::SelectRooms => "select_rooms",
    }
}
