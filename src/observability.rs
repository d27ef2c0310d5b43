use std::net::SocketAddr;

use crate::batch::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "flightdesk_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "flightdesk_operation_duration_seconds";

/// Counter: requests refused by a validation rule. Labels: kind.
pub const VALIDATION_REJECTIONS_TOTAL: &str = "flightdesk_validation_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for row locks, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "flightdesk_lock_wait_seconds";

/// Gauge: flights currently scheduled.
pub const FLIGHTS_ACTIVE: &str = "flightdesk_flights_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "flightdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "flightdesk_wal_flush_batch_size";

/// Counter: WAL compactions run by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "flightdesk_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the process runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateAirport { .. } => "create_airport",
        Command::CreatePlane { .. } => "create_plane",
        Command::CreateCrew { .. } => "create_crew",
        Command::CreatePassenger { .. } => "create_passenger",
        Command::UpsertFlight { .. } => "upsert_flight",
        Command::AssignCrew { .. } => "assign_crew",
        Command::SetReservation { .. } => "set_reservation",
        Command::Reserve { .. } => "reserve",
        Command::DeletePlane { .. } => "delete_plane",
        Command::DeleteCrew { .. } => "delete_crew",
        Command::DeleteFlight { .. } => "delete_flight",
        Command::DeletePassenger { .. } => "delete_passenger",
        Command::ListFlights { .. } => "list_flights",
        Command::FlightDetails { .. } => "flight_details",
        Command::ListAirports => "list_airports",
        Command::ListPlanes => "list_planes",
        Command::ListCrews => "list_crews",
        Command::ListPassengers => "list_passengers",
        Command::CrewFlights { .. } => "crew_flights",
        Command::PassengerFlights { .. } => "passenger_flights",
        Command::Compact => "compact",
    }
}
