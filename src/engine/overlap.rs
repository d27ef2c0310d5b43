use ulid::Ulid;

use crate::model::{Schedule, Span};

/// First flight in `schedule` other than `own` whose span overlaps `span`.
///
/// `own` is the candidate's persistent id on update, so a flight is never
/// reported as conflicting with its previous self.
pub fn find_overlap(schedule: &Schedule, span: &Span, own: Option<Ulid>) -> Option<Ulid> {
    schedule
        .overlapping(span)
        .find(|slot| Some(slot.flight_id) != own)
        .map(|slot| slot.flight_id)
}
