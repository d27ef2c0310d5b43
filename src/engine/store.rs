use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

use super::cascade::{self, DeleteTarget, RelationView};
use super::error::EngineError;
use super::locks::LockSet;

pub type Shared<T> = Arc<RwLock<T>>;

/// Natural keys that must stay unique across live rows. Plane identifiers are
/// the primary key of the plane map and are claimed there instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniqueKey {
    AirportName(String),
    CrewCaptain(String, String),
    PassengerName(String, String),
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueKey::AirportName(name) => write!(f, "airport {name:?}"),
            UniqueKey::CrewCaptain(name, surname) => write!(f, "crew of captain {name} {surname}"),
            UniqueKey::PassengerName(name, surname) => write!(f, "passenger {name} {surname}"),
        }
    }
}

pub struct EntityStore {
    airports: DashMap<Ulid, Airport>,
    planes: DashMap<String, Shared<PlaneState>>,
    crews: DashMap<Ulid, Shared<CrewState>>,
    flights: DashMap<Ulid, Shared<FlightState>>,
    passengers: DashMap<Ulid, Shared<PassengerState>>,
    unique: DashMap<UniqueKey, Ulid>,
    /// Reservation id → (flight, passenger).
    reservations: DashMap<Ulid, (Ulid, Ulid)>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            airports: DashMap::new(),
            planes: DashMap::new(),
            crews: DashMap::new(),
            flights: DashMap::new(),
            passengers: DashMap::new(),
            unique: DashMap::new(),
            reservations: DashMap::new(),
        }
    }

    // ── Row lookup ───────────────────────────────────────────

    pub fn airport(&self, id: Ulid) -> Option<Airport> {
        self.airports.get(&id).map(|e| e.value().clone())
    }

    pub fn airports(&self) -> Vec<Airport> {
        self.airports.iter().map(|e| e.value().clone()).collect()
    }

    pub fn plane_row(&self, identifier: &str) -> Option<Shared<PlaneState>> {
        self.planes.get(identifier).map(|e| e.value().clone())
    }

    pub fn crew_row(&self, id: Ulid) -> Option<Shared<CrewState>> {
        self.crews.get(&id).map(|e| e.value().clone())
    }

    pub fn flight_row(&self, id: Ulid) -> Option<Shared<FlightState>> {
        self.flights.get(&id).map(|e| e.value().clone())
    }

    pub fn passenger_row(&self, id: Ulid) -> Option<Shared<PassengerState>> {
        self.passengers.get(&id).map(|e| e.value().clone())
    }

    // Row handles are cloned out so no DashMap shard lock is held across an await.

    pub fn plane_rows(&self) -> Vec<Shared<PlaneState>> {
        self.planes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn crew_rows(&self) -> Vec<Shared<CrewState>> {
        self.crews.iter().map(|e| e.value().clone()).collect()
    }

    pub fn flight_rows(&self) -> Vec<Shared<FlightState>> {
        self.flights.iter().map(|e| e.value().clone()).collect()
    }

    pub fn passenger_rows(&self) -> Vec<Shared<PassengerState>> {
        self.passengers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn reservation_location(&self, id: Ulid) -> Option<(Ulid, Ulid)> {
        self.reservations.get(&id).map(|e| *e.value())
    }

    pub fn airport_count(&self) -> usize {
        self.airports.len()
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn crew_count(&self) -> usize {
        self.crews.len()
    }

    pub fn flight_count(&self) -> usize {
        self.flights.len()
    }

    pub fn passenger_count(&self) -> usize {
        self.passengers.len()
    }

    // ── Unique keys ──────────────────────────────────────────

    pub fn lookup(&self, key: &UniqueKey) -> Option<Ulid> {
        self.unique.get(key).map(|e| *e.value())
    }

    /// Atomically reserve `key` for `id`.
    pub fn claim(&self, key: UniqueKey, id: Ulid) -> Result<(), EngineError> {
        match self.unique.entry(key) {
            Entry::Occupied(e) => Err(EngineError::UniquenessViolation(e.key().to_string())),
            Entry::Vacant(e) => {
                e.insert(id);
                Ok(())
            }
        }
    }

    /// Undo a claim, but only if `id` still owns it.
    pub fn release(&self, key: &UniqueKey, id: Ulid) {
        self.unique.remove_if(key, |_, owner| *owner == id);
    }

    /// Insert a new plane row, returned already write-locked so nobody can
    /// use the plane before its registration is durable.
    pub fn claim_plane(&self, plane: Plane) -> Result<OwnedRwLockWriteGuard<PlaneState>, EngineError> {
        match self.planes.entry(plane.identifier.clone()) {
            Entry::Occupied(e) => {
                Err(EngineError::UniquenessViolation(format!("plane {:?}", e.key())))
            }
            Entry::Vacant(e) => {
                let row = Arc::new(RwLock::new(PlaneState::new(plane)));
                let guard = row
                    .clone()
                    .try_write_owned()
                    .map_err(|_| EngineError::LockTimeout)?;
                e.insert(row);
                Ok(guard)
            }
        }
    }

    /// Drop a plane row whose registration failed to commit.
    pub fn abandon_plane(&self, mut guard: OwnedRwLockWriteGuard<PlaneState>) {
        guard.retired = true;
        self.planes.remove(&guard.plane.identifier);
    }

    /// Insert a new passenger row write-locked, then claim its name. A
    /// concurrent lookup by name therefore always finds a row, and waits on
    /// its lock until the registration commits or is abandoned.
    pub fn claim_passenger(
        &self,
        passenger: Passenger,
    ) -> Result<OwnedRwLockWriteGuard<PassengerState>, EngineError> {
        let id = passenger.id;
        let key = UniqueKey::PassengerName(passenger.name.clone(), passenger.surname.clone());
        let row = Arc::new(RwLock::new(PassengerState::new(passenger)));
        let mut guard = row
            .clone()
            .try_write_owned()
            .map_err(|_| EngineError::LockTimeout)?;
        self.passengers.insert(id, row);
        if let Err(e) = self.claim(key, id) {
            guard.retired = true;
            self.passengers.remove(&id);
            return Err(e);
        }
        Ok(guard)
    }

    /// Drop a passenger row whose registration failed to commit.
    pub fn abandon_passenger(&self, mut guard: OwnedRwLockWriteGuard<PassengerState>) {
        guard.retired = true;
        let id = guard.passenger.id;
        let key =
            UniqueKey::PassengerName(guard.passenger.name.clone(), guard.passenger.surname.clone());
        self.passengers.remove(&id);
        self.release(&key, id);
    }

    fn insert_passenger(&self, passenger: &Passenger) {
        self.unique.insert(
            UniqueKey::PassengerName(passenger.name.clone(), passenger.surname.clone()),
            passenger.id,
        );
        self.passengers
            .entry(passenger.id)
            .or_insert_with(|| Arc::new(RwLock::new(PassengerState::new(passenger.clone()))));
    }

    pub fn insert_plane(&self, plane: Plane) {
        self.planes
            .entry(plane.identifier.clone())
            .or_insert_with(|| Arc::new(RwLock::new(PlaneState::new(plane))));
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. `locks` must hold every row
    /// `required_locks` names for it; rows missing from the set are skipped.
    pub fn apply(&self, locks: &mut LockSet, event: &Event) {
        match event {
            Event::AirportCreated { id, name } => {
                self.unique.insert(UniqueKey::AirportName(name.clone()), *id);
                self.airports.insert(*id, Airport { id: *id, name: name.clone() });
            }
            Event::PlaneRegistered { identifier, passenger_limit } => {
                self.insert_plane(Plane {
                    identifier: identifier.clone(),
                    passenger_limit: *passenger_limit,
                });
            }
            Event::CrewRegistered { id, captain_name, captain_surname } => {
                self.unique.insert(
                    UniqueKey::CrewCaptain(captain_name.clone(), captain_surname.clone()),
                    *id,
                );
                let crew = Crew {
                    id: *id,
                    captain_name: captain_name.clone(),
                    captain_surname: captain_surname.clone(),
                };
                self.crews.insert(*id, Arc::new(RwLock::new(CrewState::new(crew))));
            }
            Event::PassengerRegistered { id, name, surname } => {
                self.insert_passenger(&Passenger {
                    id: *id,
                    name: name.clone(),
                    surname: surname.clone(),
                });
            }
            Event::FlightScheduled { flight } => self.schedule(locks, flight),
            Event::FlightUpdated { flight } => self.reschedule(locks, flight),
            Event::CrewAssigned { flight_id, crew_id } => {
                let Some(state) = locks.flight_mut(*flight_id) else {
                    warn!(flight = %flight_id, "crew assignment for unknown flight");
                    return;
                };
                let span = state.flight.span();
                let old = std::mem::replace(&mut state.flight.crew, *crew_id);
                if let Some(old) = old
                    && let Some(crew) = locks.crew_mut(old)
                {
                    crew.schedule.remove(*flight_id);
                }
                if let Some(new) = crew_id
                    && let Some(crew) = locks.crew_mut(*new)
                {
                    crew.schedule.insert(Slot { flight_id: *flight_id, span });
                }
            }
            Event::ReservationSet { reservation } => {
                let Some(flight) = locks.flight_mut(reservation.flight_id) else {
                    warn!(flight = %reservation.flight_id, "reservation for unknown flight");
                    return;
                };
                flight.reservations.insert(reservation.passenger_id, reservation.clone());
                if let Some(passenger) = locks.passenger_mut(reservation.passenger_id) {
                    passenger.flights.insert(reservation.flight_id);
                }
                self.reservations
                    .insert(reservation.id, (reservation.flight_id, reservation.passenger_id));
            }
            Event::PassengerBooked { passenger, reservation } => {
                // Live commits already hold the claimed row; replay creates it.
                if locks.passenger_mut(passenger.id).is_none() {
                    self.insert_passenger(passenger);
                    if let Some(guard) = self
                        .passenger_row(passenger.id)
                        .and_then(|row| row.try_write_owned().ok())
                    {
                        locks.passengers.insert(passenger.id, guard);
                    }
                }
                self.apply(locks, &Event::ReservationSet { reservation: reservation.clone() });
            }
            Event::PlaneRetired { .. }
            | Event::CrewRetired { .. }
            | Event::FlightCancelled { .. }
            | Event::PassengerRemoved { .. } => {
                if let Some(target) = DeleteTarget::of_event(event) {
                    self.delete(locks, &target);
                }
            }
        }
    }

    fn schedule(&self, locks: &mut LockSet, flight: &Flight) {
        let slot = Slot { flight_id: flight.id, span: flight.span() };
        let Some(plane) = locks.plane_mut(&flight.plane) else {
            warn!(flight = %flight.id, plane = %flight.plane, "flight for unknown plane");
            return;
        };
        plane.schedule.insert(slot);
        let passenger_limit = plane.plane.passenger_limit;
        if let Some(crew_id) = flight.crew
            && let Some(crew) = locks.crew_mut(crew_id)
        {
            crew.schedule.insert(slot);
        }
        let state = FlightState::new(flight.clone(), passenger_limit);
        self.flights.insert(flight.id, Arc::new(RwLock::new(state)));
        metrics::gauge!(crate::observability::FLIGHTS_ACTIVE).set(self.flights.len() as f64);
    }

    fn reschedule(&self, locks: &mut LockSet, flight: &Flight) {
        let Some(state) = locks.flight_mut(flight.id) else {
            warn!(flight = %flight.id, "update for unknown flight");
            return;
        };
        let old = std::mem::replace(&mut state.flight, flight.clone());
        if let Some(plane) = locks.plane_mut(&old.plane) {
            plane.schedule.remove(flight.id);
        }
        if let Some(crew_id) = old.crew
            && let Some(crew) = locks.crew_mut(crew_id)
        {
            crew.schedule.remove(flight.id);
        }

        let slot = Slot { flight_id: flight.id, span: flight.span() };
        let mut passenger_limit = None;
        if let Some(plane) = locks.plane_mut(&flight.plane) {
            plane.schedule.insert(slot);
            passenger_limit = Some(plane.plane.passenger_limit);
        }
        if let Some(crew_id) = flight.crew
            && let Some(crew) = locks.crew_mut(crew_id)
        {
            crew.schedule.insert(slot);
        }
        if let (Some(limit), Some(state)) = (passenger_limit, locks.flight_mut(flight.id)) {
            state.passenger_limit = limit;
        }
    }

    fn delete(&self, locks: &mut LockSet, target: &DeleteTarget) {
        let cascade = cascade::plan(target, &*locks);

        for &(flight_id, passenger_id) in &cascade.reservations {
            if let Some(flight) = locks.flight_mut(flight_id)
                && let Some(reservation) = flight.reservations.remove(&passenger_id)
            {
                self.reservations.remove(&reservation.id);
            }
            if let Some(passenger) = locks.passenger_mut(passenger_id) {
                passenger.flights.remove(&flight_id);
            }
        }

        for &flight_id in &cascade.flights {
            let Some(state) = locks.flight_mut(flight_id) else { continue };
            state.retired = true;
            let flight = state.flight.clone();
            self.flights.remove(&flight_id);
            if let Some(plane) = locks.plane_mut(&flight.plane) {
                plane.schedule.remove(flight_id);
            }
            if let Some(crew_id) = flight.crew
                && let Some(crew) = locks.crew_mut(crew_id)
            {
                crew.schedule.remove(flight_id);
            }
        }
        metrics::gauge!(crate::observability::FLIGHTS_ACTIVE).set(self.flights.len() as f64);

        match target {
            DeleteTarget::Plane(identifier) => {
                if let Some(plane) = locks.plane_mut(identifier) {
                    plane.retired = true;
                }
                self.planes.remove(identifier);
            }
            DeleteTarget::Crew(id) => {
                if let Some(crew) = locks.crew_mut(*id) {
                    crew.retired = true;
                    let key = UniqueKey::CrewCaptain(
                        crew.crew.captain_name.clone(),
                        crew.crew.captain_surname.clone(),
                    );
                    self.release(&key, *id);
                }
                self.crews.remove(id);
            }
            DeleteTarget::Passenger(id) => {
                if let Some(passenger) = locks.passenger_mut(*id) {
                    passenger.retired = true;
                    let key = UniqueKey::PassengerName(
                        passenger.passenger.name.clone(),
                        passenger.passenger.surname.clone(),
                    );
                    self.release(&key, *id);
                }
                self.passengers.remove(id);
            }
            DeleteTarget::Flight(_) => {}
        }
    }

    /// Best-effort relations from unlocked rows, used to seed lock plans.
    /// Rows currently write-locked read as empty.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot(self)
    }
}

pub struct Snapshot<'a>(&'a EntityStore);

impl RelationView for Snapshot<'_> {
    fn flights_of_plane(&self, plane: &str) -> Vec<Ulid> {
        self.0
            .plane_row(plane)
            .and_then(|row| row.try_read().ok().map(|p| p.schedule.flight_ids().collect()))
            .unwrap_or_default()
    }

    fn flights_of_crew(&self, crew: Ulid) -> Vec<Ulid> {
        self.0
            .crew_row(crew)
            .and_then(|row| row.try_read().ok().map(|c| c.schedule.flight_ids().collect()))
            .unwrap_or_default()
    }

    fn passengers_of_flight(&self, flight: Ulid) -> Vec<Ulid> {
        self.0
            .flight_row(flight)
            .and_then(|row| row.try_read().ok().map(|f| f.reservations.keys().copied().collect()))
            .unwrap_or_default()
    }

    fn flights_of_passenger(&self, passenger: Ulid) -> Vec<Ulid> {
        self.0
            .passenger_row(passenger)
            .and_then(|row| row.try_read().ok().map(|p| p.flights.iter().copied().collect()))
            .unwrap_or_default()
    }

    fn plane_of(&self, flight: Ulid) -> Option<String> {
        self.0
            .flight_row(flight)
            .and_then(|row| row.try_read().ok().map(|f| f.flight.plane.clone()))
    }

    fn crew_of(&self, flight: Ulid) -> Option<Ulid> {
        self.0
            .flight_row(flight)
            .and_then(|row| row.try_read().ok().and_then(|f| f.flight.crew))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_rejects_second_owner() {
        let store = EntityStore::new();
        let key = UniqueKey::CrewCaptain("Anna".into(), "Nowak".into());
        let (a, b) = (Ulid::new(), Ulid::new());
        store.claim(key.clone(), a).unwrap();
        let err = store.claim(key.clone(), b).unwrap_err();
        assert!(matches!(err, EngineError::UniquenessViolation(_)));
        assert_eq!(store.lookup(&key), Some(a));
    }

    #[test]
    fn release_only_by_owner() {
        let store = EntityStore::new();
        let key = UniqueKey::AirportName("Warsaw".into());
        let owner = Ulid::new();
        store.claim(key.clone(), owner).unwrap();
        store.release(&key, Ulid::new());
        assert_eq!(store.lookup(&key), Some(owner));
        store.release(&key, owner);
        assert_eq!(store.lookup(&key), None);
    }

    #[test]
    fn plane_claim_is_exclusive_until_abandoned() {
        let store = EntityStore::new();
        let plane = Plane { identifier: "SP-LRA".into(), passenger_limit: 20 };
        let guard = store.claim_plane(plane.clone()).unwrap();
        assert!(store.claim_plane(plane.clone()).is_err());
        let row = store.plane_row("SP-LRA").unwrap();
        assert!(row.try_read().is_err(), "claimed row stays locked");
        store.abandon_plane(guard);
        assert!(store.plane_row("SP-LRA").is_none());
        assert!(row.try_read().unwrap().retired);
        assert!(store.claim_plane(plane).is_ok());
    }

    #[test]
    fn registrations_build_rows_and_keys() {
        let store = EntityStore::new();
        let mut locks = LockSet::default();
        let crew = Ulid::new();
        store.apply(
            &mut locks,
            &Event::CrewRegistered {
                id: crew,
                captain_name: "Anna".into(),
                captain_surname: "Nowak".into(),
            },
        );
        store.apply(
            &mut locks,
            &Event::PlaneRegistered { identifier: "SP-LRA".into(), passenger_limit: 30 },
        );
        assert!(store.crew_row(crew).is_some());
        assert_eq!(
            store.lookup(&UniqueKey::CrewCaptain("Anna".into(), "Nowak".into())),
            Some(crew)
        );
        let plane = store.plane_row("SP-LRA").unwrap();
        assert_eq!(plane.try_read().unwrap().plane.passenger_limit, 30);
    }

    #[test]
    fn snapshot_sees_unlocked_relations() {
        let store = EntityStore::new();
        store.insert_plane(Plane { identifier: "SP-LRA".into(), passenger_limit: 20 });
        let flight_id = Ulid::new();
        {
            let row = store.plane_row("SP-LRA").unwrap();
            let mut plane = row.try_write().unwrap();
            plane.schedule.insert(Slot { flight_id, span: Span::new(0, HOUR_MS) });
        }
        assert_eq!(store.snapshot().flights_of_plane("SP-LRA"), vec![flight_id]);
        assert!(store.snapshot().flights_of_plane("ghost").is_empty());
    }
}
