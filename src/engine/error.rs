use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::Ms;

/// Which table a missing row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Airport,
    Plane,
    Crew,
    Passenger,
    Flight,
    Reservation,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Airport => "airport",
            Entity::Plane => "plane",
            Entity::Crew => "crew",
            Entity::Passenger => "passenger",
            Entity::Flight => "flight",
            Entity::Reservation => "reservation",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum EngineError {
    DegenerateRoute {
        airport: Ulid,
    },
    InvalidInterval {
        takeoff: Ms,
        landing: Ms,
        min_duration_ms: Ms,
    },
    DailyQuotaExceeded {
        plane: String,
        date: Option<NaiveDate>,
        limit: usize,
    },
    PlaneDoubleBooked {
        plane: String,
        conflicting_flight: Ulid,
    },
    CrewDoubleBooked {
        crew: Ulid,
        conflicting_flight: Ulid,
    },
    CapacityExceeded {
        flight: Ulid,
        requested: u64,
        limit: u32,
    },
    InvalidTicketCount(i64),
    InvalidPassengerLimit {
        requested: u32,
        min: u32,
    },
    UniquenessViolation(String),
    NotFound {
        entity: Entity,
        id: String,
    },
    LimitExceeded(&'static str),
    LockTimeout,
    WalError(String),
}

/// Stable, fieldless discriminant of an `EngineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DegenerateRoute,
    InvalidInterval,
    DailyQuotaExceeded,
    PlaneDoubleBooked,
    CrewDoubleBooked,
    CapacityExceeded,
    InvalidTicketCount,
    InvalidPassengerLimit,
    UniquenessViolation,
    NotFound,
    LimitExceeded,
    LockTimeout,
    WalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DegenerateRoute => "degenerate_route",
            ErrorKind::InvalidInterval => "invalid_interval",
            ErrorKind::DailyQuotaExceeded => "daily_quota_exceeded",
            ErrorKind::PlaneDoubleBooked => "plane_double_booked",
            ErrorKind::CrewDoubleBooked => "crew_double_booked",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::InvalidTicketCount => "invalid_ticket_count",
            ErrorKind::InvalidPassengerLimit => "invalid_passenger_limit",
            ErrorKind::UniquenessViolation => "uniqueness_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::WalError => "wal_error",
        }
    }
}

impl EngineError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        EngineError::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DegenerateRoute { .. } => ErrorKind::DegenerateRoute,
            EngineError::InvalidInterval { .. } => ErrorKind::InvalidInterval,
            EngineError::DailyQuotaExceeded { .. } => ErrorKind::DailyQuotaExceeded,
            EngineError::PlaneDoubleBooked { .. } => ErrorKind::PlaneDoubleBooked,
            EngineError::CrewDoubleBooked { .. } => ErrorKind::CrewDoubleBooked,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::InvalidTicketCount(_) => ErrorKind::InvalidTicketCount,
            EngineError::InvalidPassengerLimit { .. } => ErrorKind::InvalidPassengerLimit,
            EngineError::UniquenessViolation(_) => ErrorKind::UniquenessViolation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::LockTimeout => ErrorKind::LockTimeout,
            EngineError::WalError(_) => ErrorKind::WalError,
        }
    }

    /// Infrastructure failures. Nothing was committed; the same request may
    /// succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::LockTimeout | EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::DegenerateRoute { airport } => {
                write!(f, "flight takes off and lands at the same airport {airport}")
            }
            EngineError::InvalidInterval { takeoff, landing, min_duration_ms } => {
                if landing <= takeoff {
                    write!(f, "landing {landing} is not after takeoff {takeoff}")
                } else {
                    write!(
                        f,
                        "flight of {}ms is shorter than the minimum {min_duration_ms}ms",
                        landing - takeoff
                    )
                }
            }
            EngineError::DailyQuotaExceeded { plane, date, limit } => match date {
                Some(date) => write!(f, "plane {plane} already has {limit} flights on {date}"),
                None => write!(f, "plane {plane} would exceed {limit} flights per day"),
            },
            EngineError::PlaneDoubleBooked { plane, conflicting_flight } => {
                write!(f, "plane {plane} is already flying {conflicting_flight} at that time")
            }
            EngineError::CrewDoubleBooked { crew, conflicting_flight } => {
                write!(f, "crew {crew} is already flying {conflicting_flight} at that time")
            }
            EngineError::CapacityExceeded { flight, requested, limit } => write!(
                f,
                "flight {flight} would hold {requested} tickets, plane capacity is {limit}"
            ),
            EngineError::InvalidTicketCount(n) => write!(f, "invalid ticket count: {n}"),
            EngineError::InvalidPassengerLimit { requested, min } => {
                write!(f, "passenger limit {requested} is below the minimum {min}")
            }
            EngineError::UniquenessViolation(what) => write!(f, "already exists: {what}"),
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::LockTimeout => write!(f, "timed out waiting for row locks"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
