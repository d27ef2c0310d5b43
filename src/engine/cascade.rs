//! What disappears when a plane, crew, flight or passenger is deleted.
//!
//! Planes and crews take their flights with them, flights take their
//! reservations, passengers take only their reservations. The plan is a pure
//! function of the relations it is shown, so the live path (over locked rows)
//! and WAL replay compute the same cascade from the same state.

use std::collections::BTreeSet;

use serde::Serialize;
use ulid::Ulid;

use crate::model::Event;

use super::locks::LockPlan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Plane(String),
    Crew(Ulid),
    Flight(Ulid),
    Passenger(Ulid),
}

impl DeleteTarget {
    pub fn of_event(event: &Event) -> Option<Self> {
        match event {
            Event::PlaneRetired { identifier } => Some(DeleteTarget::Plane(identifier.clone())),
            Event::CrewRetired { id } => Some(DeleteTarget::Crew(*id)),
            Event::FlightCancelled { id } => Some(DeleteTarget::Flight(*id)),
            Event::PassengerRemoved { id } => Some(DeleteTarget::Passenger(*id)),
            _ => None,
        }
    }

    pub fn to_event(&self) -> Event {
        match self {
            DeleteTarget::Plane(identifier) => Event::PlaneRetired { identifier: identifier.clone() },
            DeleteTarget::Crew(id) => Event::CrewRetired { id: *id },
            DeleteTarget::Flight(id) => Event::FlightCancelled { id: *id },
            DeleteTarget::Passenger(id) => Event::PassengerRemoved { id: *id },
        }
    }

    /// Lock plan holding only the target row.
    pub fn lock_plan(&self) -> LockPlan {
        match self {
            DeleteTarget::Plane(identifier) => LockPlan::new().plane(identifier),
            DeleteTarget::Crew(id) => LockPlan::new().crew(Some(*id)),
            DeleteTarget::Flight(id) => LockPlan::new().flight(*id),
            DeleteTarget::Passenger(id) => LockPlan::new().passenger(*id),
        }
    }
}

/// Read access to the relations a cascade follows. Rows the view cannot see
/// answer empty; the caller widens its locks until nothing is hidden.
pub trait RelationView {
    fn flights_of_plane(&self, plane: &str) -> Vec<Ulid>;
    fn flights_of_crew(&self, crew: Ulid) -> Vec<Ulid>;
    /// Passengers holding a reservation on `flight`.
    fn passengers_of_flight(&self, flight: Ulid) -> Vec<Ulid>;
    fn flights_of_passenger(&self, passenger: Ulid) -> Vec<Ulid>;
    fn plane_of(&self, flight: Ulid) -> Option<String>;
    fn crew_of(&self, flight: Ulid) -> Option<Ulid>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cascade {
    pub flights: BTreeSet<Ulid>,
    /// `(flight, passenger)` pairs.
    pub reservations: BTreeSet<(Ulid, Ulid)>,
}

pub fn plan(target: &DeleteTarget, view: &impl RelationView) -> Cascade {
    let flights: BTreeSet<Ulid> = match target {
        DeleteTarget::Plane(identifier) => view.flights_of_plane(identifier).into_iter().collect(),
        DeleteTarget::Crew(id) => view.flights_of_crew(*id).into_iter().collect(),
        DeleteTarget::Flight(id) => BTreeSet::from([*id]),
        DeleteTarget::Passenger(_) => BTreeSet::new(),
    };

    let mut reservations = BTreeSet::new();
    for &flight in &flights {
        for passenger in view.passengers_of_flight(flight) {
            reservations.insert((flight, passenger));
        }
    }
    if let DeleteTarget::Passenger(passenger) = target {
        for flight in view.flights_of_passenger(*passenger) {
            reservations.insert((flight, *passenger));
        }
    }

    Cascade { flights, reservations }
}

impl Cascade {
    /// Every row the cascade writes: the target, each removed flight with its
    /// plane and crew, and both ends of each removed reservation.
    pub fn lock_plan(&self, target: &DeleteTarget, view: &impl RelationView) -> LockPlan {
        let mut plan = target.lock_plan();
        for &flight in &self.flights {
            plan = plan.flight(flight).crew(view.crew_of(flight));
            if let Some(plane) = view.plane_of(flight) {
                plan = plan.plane(&plane);
            }
        }
        for &(flight, passenger) in &self.reservations {
            plan = plan.flight(flight).passenger(passenger);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Flight id → (plane, crew, passengers).
    #[derive(Default)]
    struct Fixture {
        flights: BTreeMap<Ulid, (String, Option<Ulid>, Vec<Ulid>)>,
    }

    impl Fixture {
        fn flight(&mut self, plane: &str, crew: Option<Ulid>, passengers: &[Ulid]) -> Ulid {
            let id = Ulid::new();
            self.flights.insert(id, (plane.to_string(), crew, passengers.to_vec()));
            id
        }
    }

    impl RelationView for Fixture {
        fn flights_of_plane(&self, plane: &str) -> Vec<Ulid> {
            self.flights.iter().filter(|(_, f)| f.0 == plane).map(|(id, _)| *id).collect()
        }
        fn flights_of_crew(&self, crew: Ulid) -> Vec<Ulid> {
            self.flights.iter().filter(|(_, f)| f.1 == Some(crew)).map(|(id, _)| *id).collect()
        }
        fn passengers_of_flight(&self, flight: Ulid) -> Vec<Ulid> {
            self.flights.get(&flight).map(|f| f.2.clone()).unwrap_or_default()
        }
        fn flights_of_passenger(&self, passenger: Ulid) -> Vec<Ulid> {
            self.flights
                .iter()
                .filter(|(_, f)| f.2.contains(&passenger))
                .map(|(id, _)| *id)
                .collect()
        }
        fn plane_of(&self, flight: Ulid) -> Option<String> {
            self.flights.get(&flight).map(|f| f.0.clone())
        }
        fn crew_of(&self, flight: Ulid) -> Option<Ulid> {
            self.flights.get(&flight).and_then(|f| f.1)
        }
    }

    #[test]
    fn plane_takes_its_flights_and_their_reservations() {
        let mut fx = Fixture::default();
        let (p1, p2) = (Ulid::new(), Ulid::new());
        let crew = Ulid::new();
        let a = fx.flight("SP-LRA", Some(crew), &[p1, p2]);
        let b = fx.flight("SP-LRA", None, &[]);
        let other = fx.flight("SP-LRB", Some(crew), &[p1]);

        let target = DeleteTarget::Plane("SP-LRA".into());
        let cascade = plan(&target, &fx);
        assert_eq!(cascade.flights, BTreeSet::from([a, b]));
        assert_eq!(cascade.reservations, BTreeSet::from([(a, p1), (a, p2)]));
        assert!(!cascade.flights.contains(&other));

        let locks = cascade.lock_plan(&target, &fx);
        assert_eq!(locks.planes, BTreeSet::from(["SP-LRA".to_string()]));
        assert_eq!(locks.crews, BTreeSet::from([crew]));
        assert_eq!(locks.flights, BTreeSet::from([a, b]));
        assert_eq!(locks.passengers, BTreeSet::from([p1, p2]));
    }

    #[test]
    fn crew_takes_its_flights() {
        let mut fx = Fixture::default();
        let crew = Ulid::new();
        let p = Ulid::new();
        let a = fx.flight("SP-LRA", Some(crew), &[p]);
        let b = fx.flight("SP-LRB", Some(crew), &[]);
        fx.flight("SP-LRB", None, &[p]);

        let target = DeleteTarget::Crew(crew);
        let cascade = plan(&target, &fx);
        assert_eq!(cascade.flights, BTreeSet::from([a, b]));
        assert_eq!(cascade.reservations, BTreeSet::from([(a, p)]));
        let locks = cascade.lock_plan(&target, &fx);
        assert_eq!(locks.planes.len(), 2);
    }

    #[test]
    fn passenger_takes_only_reservations() {
        let mut fx = Fixture::default();
        let p = Ulid::new();
        let a = fx.flight("SP-LRA", None, &[p]);
        let b = fx.flight("SP-LRB", None, &[p, Ulid::new()]);

        let target = DeleteTarget::Passenger(p);
        let cascade = plan(&target, &fx);
        assert!(cascade.flights.is_empty());
        assert_eq!(cascade.reservations, BTreeSet::from([(a, p), (b, p)]));

        let locks = cascade.lock_plan(&target, &fx);
        assert!(locks.planes.is_empty());
        assert_eq!(locks.flights, BTreeSet::from([a, b]));
        assert_eq!(locks.passengers, BTreeSet::from([p]));
    }

    #[test]
    fn flight_takes_its_reservations() {
        let mut fx = Fixture::default();
        let p = Ulid::new();
        let a = fx.flight("SP-LRA", None, &[p]);
        let cascade = plan(&DeleteTarget::Flight(a), &fx);
        assert_eq!(cascade.flights, BTreeSet::from([a]));
        assert_eq!(cascade.reservations, BTreeSet::from([(a, p)]));
    }

    #[test]
    fn unseen_rows_cascade_to_nothing() {
        let fx = Fixture::default();
        let cascade = plan(&DeleteTarget::Plane("ghost".into()), &fx);
        assert_eq!(cascade, Cascade::default());
    }

    #[test]
    fn target_event_round_trip() {
        let target = DeleteTarget::Crew(Ulid::new());
        assert_eq!(DeleteTarget::of_event(&target.to_event()), Some(target));
        assert_eq!(
            DeleteTarget::of_event(&Event::CrewAssigned { flight_id: Ulid::new(), crew_id: None }),
            None
        );
    }
}
