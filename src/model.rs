use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// `num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// UTC calendar day of an instant, counted in days since 1970-01-01.
pub fn day_index(t: Ms) -> i64 {
    t.div_euclid(DAY_MS)
}

pub fn day_of_date(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn date_of_day(day: i64) -> Option<NaiveDate> {
    let ce = i32::try_from(day + UNIX_EPOCH_DAYS_FROM_CE).ok()?;
    NaiveDate::from_num_days_from_ce_opt(ce)
}

/// Time range of a flight, `start` = takeoff, `end` = landing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Strict overlap: spans that only touch at an endpoint do not overlap,
    /// so back-to-back flights are legal. Symmetric.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn first_day(&self) -> i64 {
        day_index(self.start)
    }

    pub fn last_day(&self) -> i64 {
        day_index(self.end)
    }

    /// A span touches every calendar day from its takeoff date to its landing date.
    pub fn touches_day(&self, day: i64) -> bool {
        self.first_day() <= day && day <= self.last_day()
    }
}

// ── Entity records ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airport {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plane {
    pub identifier: String,
    pub passenger_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crew {
    pub id: Ulid,
    pub captain_name: String,
    pub captain_surname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    pub id: Ulid,
    pub name: String,
    pub surname: String,
}

/// A proposed flight, before it has an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightDraft {
    pub takeoff_airport: Ulid,
    pub takeoff: Ms,
    pub landing_airport: Ulid,
    pub landing: Ms,
    pub plane: String,
    pub crew: Option<Ulid>,
}

impl FlightDraft {
    pub fn into_flight(self, id: Ulid) -> Flight {
        Flight {
            id,
            takeoff_airport: self.takeoff_airport,
            takeoff: self.takeoff,
            landing_airport: self.landing_airport,
            landing: self.landing,
            plane: self.plane,
            crew: self.crew,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub id: Ulid,
    pub takeoff_airport: Ulid,
    pub takeoff: Ms,
    pub landing_airport: Ulid,
    pub landing: Ms,
    pub plane: String,
    pub crew: Option<Ulid>,
}

impl Flight {
    /// Only valid on committed flights, which always land after takeoff.
    pub fn span(&self) -> Span {
        Span::new(self.takeoff, self.landing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub passenger_id: Ulid,
    pub flight_id: Ulid,
    pub ticket_count: u32,
    /// Last modification time.
    pub updated: Ms,
}

// ── Schedules ────────────────────────────────────────────────────

/// One flight's occupancy of a plane or crew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub flight_id: Ulid,
    pub span: Span,
}

/// The flights of one plane or one crew, sorted by takeoff.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    slots: Vec<Slot>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove(&mut self, flight_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.flight_id == flight_id)?;
        Some(self.slots.remove(pos))
    }

    pub fn contains(&self, flight_id: Ulid) -> bool {
        self.slots.iter().any(|s| s.flight_id == flight_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn flight_ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.slots.iter().map(|s| s.flight_id)
    }

    /// Slots whose span overlaps `query`.
    /// Binary search skips everything taking off at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

// ── Row state (each behind its own lock) ────────────────────────

#[derive(Debug, Clone)]
pub struct PlaneState {
    pub plane: Plane,
    pub schedule: Schedule,
    /// Set under the write lock when the row is deleted.
    pub retired: bool,
}

impl PlaneState {
    pub fn new(plane: Plane) -> Self {
        Self { plane, schedule: Schedule::new(), retired: false }
    }
}

#[derive(Debug, Clone)]
pub struct CrewState {
    pub crew: Crew,
    pub schedule: Schedule,
    pub retired: bool,
}

impl CrewState {
    pub fn new(crew: Crew) -> Self {
        Self { crew, schedule: Schedule::new(), retired: false }
    }
}

#[derive(Debug, Clone)]
pub struct FlightState {
    pub flight: Flight,
    /// Copy of the plane's limit, refreshed whenever the flight changes plane.
    pub passenger_limit: u32,
    /// Keyed by passenger id; one reservation per (passenger, flight).
    pub reservations: BTreeMap<Ulid, Reservation>,
    pub retired: bool,
}

impl FlightState {
    pub fn new(flight: Flight, passenger_limit: u32) -> Self {
        Self {
            flight,
            passenger_limit,
            reservations: BTreeMap::new(),
            retired: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassengerState {
    pub passenger: Passenger,
    /// Flights this passenger holds a reservation on.
    pub flights: BTreeSet<Ulid>,
    pub retired: bool,
}

impl PassengerState {
    pub fn new(passenger: Passenger) -> Self {
        Self { passenger, flights: BTreeSet::new(), retired: false }
    }
}

/// One record per committed mutation. This is the WAL record format.
/// Deletions carry only the target; replay recomputes the cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AirportCreated {
        id: Ulid,
        name: String,
    },
    PlaneRegistered {
        identifier: String,
        passenger_limit: u32,
    },
    PlaneRetired {
        identifier: String,
    },
    CrewRegistered {
        id: Ulid,
        captain_name: String,
        captain_surname: String,
    },
    CrewRetired {
        id: Ulid,
    },
    PassengerRegistered {
        id: Ulid,
        name: String,
        surname: String,
    },
    PassengerRemoved {
        id: Ulid,
    },
    FlightScheduled {
        flight: Flight,
    },
    FlightUpdated {
        flight: Flight,
    },
    FlightCancelled {
        id: Ulid,
    },
    CrewAssigned {
        flight_id: Ulid,
        crew_id: Option<Ulid>,
    },
    ReservationSet {
        reservation: Reservation,
    },
    /// First booking under a new name: the passenger and its reservation
    /// commit as one record.
    PassengerBooked {
        passenger: Passenger,
        reservation: Reservation,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightDetails {
    pub flight: Flight,
    pub passenger_limit: u32,
    pub reserved: u64,
    pub free_seats: u64,
    /// Non-empty reservations, most recently updated first.
    pub reservations: Vec<Reservation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: Ms, end: Ms) -> Slot {
        Slot { flight_id: Ulid::new(), span: Span::new(start, end) }
    }

    #[test]
    fn span_overlap_is_strict() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn span_contained_overlaps() {
        let outer = Span::new(0, 1000);
        let inner = Span::new(400, 500);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn day_index_handles_negative_instants() {
        assert_eq!(day_index(0), 0);
        assert_eq!(day_index(DAY_MS - 1), 0);
        assert_eq!(day_index(DAY_MS), 1);
        assert_eq!(day_index(-1), -1);
    }

    #[test]
    fn date_day_conversion() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let day = day_of_date(date);
        assert_eq!(day, 19_875);
        assert_eq!(date_of_day(day), Some(date));
        assert_eq!(day_of_date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
    }

    #[test]
    fn span_touches_takeoff_and_landing_days() {
        // 22:00 on day 10 to 02:00 on day 11
        let s = Span::new(10 * DAY_MS + 22 * HOUR_MS, 11 * DAY_MS + 2 * HOUR_MS);
        assert!(!s.touches_day(9));
        assert!(s.touches_day(10));
        assert!(s.touches_day(11));
        assert!(!s.touches_day(12));
    }

    #[test]
    fn landing_at_midnight_touches_next_day() {
        let s = Span::new(10 * DAY_MS + 20 * HOUR_MS, 11 * DAY_MS);
        assert!(s.touches_day(11));
    }

    #[test]
    fn schedule_keeps_takeoff_order() {
        let mut sched = Schedule::new();
        sched.insert(slot(300, 400));
        sched.insert(slot(100, 200));
        sched.insert(slot(200, 300));
        let starts: Vec<Ms> = sched.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn schedule_remove_middle_preserves_order() {
        let mut sched = Schedule::new();
        let slots: Vec<Slot> = (0..3).map(|i| slot(i * 100, i * 100 + 50)).collect();
        for s in &slots {
            sched.insert(*s);
        }
        assert_eq!(sched.remove(slots[1].flight_id), Some(slots[1]));
        let ids: Vec<Ulid> = sched.flight_ids().collect();
        assert_eq!(ids, vec![slots[0].flight_id, slots[2].flight_id]);
        assert!(sched.remove(Ulid::new()).is_none());
    }

    #[test]
    fn schedule_overlapping_skips_past_and_future() {
        let mut sched = Schedule::new();
        sched.insert(slot(100, 200));
        sched.insert(slot(450, 600));
        sched.insert(slot(1000, 1100));
        let hits: Vec<_> = sched.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn schedule_overlapping_excludes_touching() {
        let mut sched = Schedule::new();
        sched.insert(slot(100, 200));
        sched.insert(slot(300, 400));
        assert_eq!(sched.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(sched.overlapping(&Span::new(199, 301)).count(), 2);
    }

    #[test]
    fn schedule_overlapping_long_slot_spanning_query() {
        let mut sched = Schedule::new();
        sched.insert(slot(0, 10_000));
        assert_eq!(sched.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::FlightScheduled {
            flight: Flight {
                id: Ulid::new(),
                takeoff_airport: Ulid::new(),
                takeoff: 0,
                landing_airport: Ulid::new(),
                landing: HOUR_MS,
                plane: "SP-LRA".into(),
                crew: None,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
