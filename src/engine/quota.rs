use ulid::Ulid;

use crate::model::{Schedule, Span};

/// Flights in `schedule`, other than `own`, whose span touches calendar `day`.
pub fn flights_touching_day(schedule: &Schedule, day: i64, own: Option<Ulid>) -> usize {
    // Sorted by takeoff: nothing after the first slot taking off past `day` can touch it.
    schedule
        .iter()
        .take_while(|slot| slot.span.first_day() <= day)
        .filter(|slot| Some(slot.flight_id) != own && slot.span.touches_day(day))
        .count()
}

/// First day touched by `span` on which adding the candidate would give the
/// plane more than `max_per_day` flights. Checks every day from takeoff date
/// to landing date.
pub fn first_day_over_quota(
    schedule: &Schedule,
    span: &Span,
    own: Option<Ulid>,
    max_per_day: usize,
) -> Option<i64> {
    (span.first_day()..=span.last_day())
        .find(|&day| flights_touching_day(schedule, day, own) + 1 > max_per_day)
}
