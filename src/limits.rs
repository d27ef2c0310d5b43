use crate::model::Ms;

/// Max bytes in an airport name, plane identifier, or person name.
pub const MAX_NAME_LEN: usize = 256;

/// Max tickets a single reservation may hold, independent of plane size.
pub const MAX_TICKETS_PER_RESERVATION: i64 = 100_000;

/// Max live flights per engine.
pub const MAX_FLIGHTS: usize = 1_000_000;

/// Max rows of each other kind (airports, planes, crews, passengers).
pub const MAX_ROWS_PER_KIND: usize = 1_000_000;

/// How often a mutation may widen its lock plan before giving up.
pub const MAX_LOCK_ATTEMPTS: usize = 8;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 2200-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Max flight length. Nothing real stays airborne for a week.
pub const MAX_FLIGHT_DURATION_MS: Ms = 7 * 24 * 3_600_000;
