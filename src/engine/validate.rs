//! The pre-commit checks every mutation path runs. Each returns the first
//! rule that fails; callers run them in the documented order.

use ulid::Ulid;

use crate::config::Policy;
use crate::limits::*;
use crate::model::*;

use super::capacity;
use super::error::EngineError;
use super::overlap::find_overlap;
use super::quota::first_day_over_quota;

/// Trimmed, non-empty, bounded.
pub fn check_name(value: &str) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::LimitExceeded("name must not be empty"));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(trimmed.to_string())
}

pub fn check_passenger_limit(policy: &Policy, requested: u32) -> Result<(), EngineError> {
    if requested < policy.min_passenger_limit {
        return Err(EngineError::InvalidPassengerLimit {
            requested,
            min: policy.min_passenger_limit,
        });
    }
    Ok(())
}

pub fn check_ticket_count(count: i64) -> Result<u32, EngineError> {
    if !(0..=MAX_TICKETS_PER_RESERVATION).contains(&count) {
        return Err(EngineError::InvalidTicketCount(count));
    }
    u32::try_from(count).map_err(|_| EngineError::InvalidTicketCount(count))
}

/// Route sanity, then temporal sanity. Needs no locks.
pub fn check_shape(policy: &Policy, draft: &FlightDraft) -> Result<Span, EngineError> {
    if draft.takeoff_airport == draft.landing_airport {
        return Err(EngineError::DegenerateRoute { airport: draft.takeoff_airport });
    }
    if draft.landing <= draft.takeoff || draft.landing - draft.takeoff < policy.min_flight_ms {
        return Err(EngineError::InvalidInterval {
            takeoff: draft.takeoff,
            landing: draft.landing,
            min_duration_ms: policy.min_flight_ms,
        });
    }
    if draft.takeoff < MIN_VALID_TIMESTAMP_MS || draft.landing > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if draft.landing - draft.takeoff > MAX_FLIGHT_DURATION_MS {
        return Err(EngineError::LimitExceeded("flight too long"));
    }
    Ok(Span::new(draft.takeoff, draft.landing))
}

/// Daily quota, plane exclusivity, crew exclusivity, against the locked
/// schedules. `own` excludes the flight being updated from every count.
pub fn check_placement(
    policy: &Policy,
    span: &Span,
    plane: &PlaneState,
    crew: Option<&CrewState>,
    own: Option<Ulid>,
) -> Result<(), EngineError> {
    let limit = policy.max_daily_flights;
    if let Some(day) = first_day_over_quota(&plane.schedule, span, own, limit) {
        return Err(EngineError::DailyQuotaExceeded {
            plane: plane.plane.identifier.clone(),
            date: date_of_day(day),
            limit,
        });
    }
    if let Some(conflicting_flight) = find_overlap(&plane.schedule, span, own) {
        return Err(EngineError::PlaneDoubleBooked {
            plane: plane.plane.identifier.clone(),
            conflicting_flight,
        });
    }
    match crew {
        Some(crew) => check_crew_free(crew, span, own),
        None => Ok(()),
    }
}

pub fn check_crew_free(crew: &CrewState, span: &Span, own: Option<Ulid>) -> Result<(), EngineError> {
    match find_overlap(&crew.schedule, span, own) {
        Some(conflicting_flight) => Err(EngineError::CrewDoubleBooked {
            crew: crew.crew.id,
            conflicting_flight,
        }),
        None => Ok(()),
    }
}

/// Seats after setting `passenger_id`'s count, if they fit the plane.
pub fn check_capacity(
    flight: &FlightState,
    passenger_id: Ulid,
    ticket_count: u32,
) -> Result<u64, EngineError> {
    let requested = capacity::total_with(flight, passenger_id, ticket_count);
    fits(flight, requested, flight.passenger_limit)?;
    Ok(requested)
}

/// Existing reservations must fit a plane the flight is moving to.
pub fn check_refit(flight: &FlightState, new_limit: u32) -> Result<(), EngineError> {
    let requested = capacity::reserved_total(flight.reservations.values());
    fits(flight, requested, new_limit)
}

fn fits(flight: &FlightState, requested: u64, limit: u32) -> Result<(), EngineError> {
    if requested > u64::from(limit) {
        return Err(EngineError::CapacityExceeded {
            flight: flight.flight.id,
            requested,
            limit,
        });
    }
    Ok(())
}
