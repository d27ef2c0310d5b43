use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;
use ulid::Ulid;

use crate::model::*;

use super::cascade::{self, DeleteTarget, RelationView};
use super::error::{EngineError, Entity};
use super::store::EntityStore;

type Guard<T> = OwnedRwLockWriteGuard<T>;

/// Rows a mutation must hold. Acquired planes first, then crews, flights,
/// passengers; each group in key order. Every writer uses this order, so two
/// writers can never wait on each other in a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockPlan {
    pub planes: BTreeSet<String>,
    pub crews: BTreeSet<Ulid>,
    pub flights: BTreeSet<Ulid>,
    pub passengers: BTreeSet<Ulid>,
}

impl LockPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plane(mut self, identifier: &str) -> Self {
        self.planes.insert(identifier.to_string());
        self
    }

    pub fn crew(mut self, id: Option<Ulid>) -> Self {
        self.crews.extend(id);
        self
    }

    pub fn flight(mut self, id: Ulid) -> Self {
        self.flights.insert(id);
        self
    }

    pub fn passenger(mut self, id: Ulid) -> Self {
        self.passengers.insert(id);
        self
    }

    pub fn covers(&self, other: &LockPlan) -> bool {
        other.planes.is_subset(&self.planes)
            && other.crews.is_subset(&self.crews)
            && other.flights.is_subset(&self.flights)
            && other.passengers.is_subset(&self.passengers)
    }

    pub fn merge(&mut self, other: LockPlan) {
        self.planes.extend(other.planes);
        self.crews.extend(other.crews);
        self.flights.extend(other.flights);
        self.passengers.extend(other.passengers);
    }
}

/// Every row an event writes, as far as `view` can see. For deletions this
/// is the whole cascade.
pub fn required_locks(event: &Event, view: &impl RelationView) -> LockPlan {
    match event {
        Event::AirportCreated { .. }
        | Event::PlaneRegistered { .. }
        | Event::CrewRegistered { .. }
        | Event::PassengerRegistered { .. } => LockPlan::new(),
        Event::FlightScheduled { flight } => LockPlan::new().plane(&flight.plane).crew(flight.crew),
        Event::FlightUpdated { flight } => {
            let mut plan = LockPlan::new()
                .plane(&flight.plane)
                .crew(flight.crew)
                .crew(view.crew_of(flight.id))
                .flight(flight.id);
            if let Some(old_plane) = view.plane_of(flight.id) {
                plan = plan.plane(&old_plane);
            }
            plan
        }
        Event::CrewAssigned { flight_id, crew_id } => LockPlan::new()
            .crew(*crew_id)
            .crew(view.crew_of(*flight_id))
            .flight(*flight_id),
        Event::ReservationSet { reservation } | Event::PassengerBooked { reservation, .. } => LockPlan::new()
            .flight(reservation.flight_id)
            .passenger(reservation.passenger_id),
        Event::PlaneRetired { .. }
        | Event::CrewRetired { .. }
        | Event::FlightCancelled { .. }
        | Event::PassengerRemoved { .. } => match DeleteTarget::of_event(event) {
            Some(target) => cascade::plan(&target, view).lock_plan(&target, view),
            None => LockPlan::new(),
        },
    }
}

/// Rows whose deletion is set under their write lock.
pub(super) trait Row {
    fn is_retired(&self) -> bool;
}

impl Row for PlaneState {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

impl Row for CrewState {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

impl Row for FlightState {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

impl Row for PassengerState {
    fn is_retired(&self) -> bool {
        self.retired
    }
}

/// Write guards over the rows of one mutation. Rows that did not exist or
/// were retired by the time their lock was granted are simply absent.
#[derive(Default)]
pub struct LockSet {
    pub(super) planes: BTreeMap<String, Guard<PlaneState>>,
    pub(super) crews: BTreeMap<Ulid, Guard<CrewState>>,
    pub(super) flights: BTreeMap<Ulid, Guard<FlightState>>,
    pub(super) passengers: BTreeMap<Ulid, Guard<PassengerState>>,
}

impl LockSet {
    pub fn held(&self) -> LockPlan {
        LockPlan {
            planes: self.planes.keys().cloned().collect(),
            crews: self.crews.keys().copied().collect(),
            flights: self.flights.keys().copied().collect(),
            passengers: self.passengers.keys().copied().collect(),
        }
    }

    pub fn plane(&self, identifier: &str) -> Result<&PlaneState, EngineError> {
        self.planes
            .get(identifier)
            .map(|g| &**g)
            .ok_or_else(|| EngineError::not_found(Entity::Plane, identifier))
    }

    pub fn crew(&self, id: Ulid) -> Result<&CrewState, EngineError> {
        self.crews
            .get(&id)
            .map(|g| &**g)
            .ok_or_else(|| EngineError::not_found(Entity::Crew, id))
    }

    pub fn flight(&self, id: Ulid) -> Result<&FlightState, EngineError> {
        self.flights
            .get(&id)
            .map(|g| &**g)
            .ok_or_else(|| EngineError::not_found(Entity::Flight, id))
    }

    pub fn passenger(&self, id: Ulid) -> Result<&PassengerState, EngineError> {
        self.passengers
            .get(&id)
            .map(|g| &**g)
            .ok_or_else(|| EngineError::not_found(Entity::Passenger, id))
    }

    pub(super) fn plane_mut(&mut self, identifier: &str) -> Option<&mut PlaneState> {
        self.planes.get_mut(identifier).map(|g| &mut **g)
    }

    pub(super) fn crew_mut(&mut self, id: Ulid) -> Option<&mut CrewState> {
        self.crews.get_mut(&id).map(|g| &mut **g)
    }

    pub(super) fn flight_mut(&mut self, id: Ulid) -> Option<&mut FlightState> {
        self.flights.get_mut(&id).map(|g| &mut **g)
    }

    pub(super) fn passenger_mut(&mut self, id: Ulid) -> Option<&mut PassengerState> {
        self.passengers.get_mut(&id).map(|g| &mut **g)
    }
}

impl RelationView for LockSet {
    fn flights_of_plane(&self, plane: &str) -> Vec<Ulid> {
        self.planes
            .get(plane)
            .map(|p| p.schedule.flight_ids().collect())
            .unwrap_or_default()
    }

    fn flights_of_crew(&self, crew: Ulid) -> Vec<Ulid> {
        self.crews
            .get(&crew)
            .map(|c| c.schedule.flight_ids().collect())
            .unwrap_or_default()
    }

    fn passengers_of_flight(&self, flight: Ulid) -> Vec<Ulid> {
        self.flights
            .get(&flight)
            .map(|f| f.reservations.keys().copied().collect())
            .unwrap_or_default()
    }

    fn flights_of_passenger(&self, passenger: Ulid) -> Vec<Ulid> {
        self.passengers
            .get(&passenger)
            .map(|p| p.flights.iter().copied().collect())
            .unwrap_or_default()
    }

    fn plane_of(&self, flight: Ulid) -> Option<String> {
        self.flights.get(&flight).map(|f| f.flight.plane.clone())
    }

    fn crew_of(&self, flight: Ulid) -> Option<Ulid> {
        self.flights.get(&flight).and_then(|f| f.flight.crew)
    }
}

async fn lock_group<K, T>(
    keys: &BTreeSet<K>,
    deadline: Instant,
    fetch: impl Fn(&K) -> Option<Arc<RwLock<T>>>,
) -> Result<BTreeMap<K, Guard<T>>, EngineError>
where
    K: Ord + Clone,
    T: Row,
{
    let mut held = BTreeMap::new();
    for key in keys {
        let Some(row) = fetch(key) else { continue };
        let guard = tokio::time::timeout_at(deadline, row.write_owned())
            .await
            .map_err(|_| EngineError::LockTimeout)?;
        if !guard.is_retired() {
            held.insert(key.clone(), guard);
        }
    }
    Ok(held)
}

fn try_lock_group<K, T>(
    keys: &BTreeSet<K>,
    fetch: impl Fn(&K) -> Option<Arc<RwLock<T>>>,
) -> BTreeMap<K, Guard<T>>
where
    K: Ord + Clone,
    T: Row,
{
    keys.iter()
        .filter_map(|key| {
            let guard = fetch(key)?.try_write_owned().ok()?;
            (!guard.is_retired()).then(|| (key.clone(), guard))
        })
        .collect()
}

impl EntityStore {
    /// Lock every row of `plan` in global order, waiting at most `timeout`
    /// in total. Dropping the returned set releases everything.
    pub async fn acquire(&self, plan: &LockPlan, timeout: Duration) -> Result<LockSet, EngineError> {
        let deadline = Instant::now() + timeout;
        let planes = lock_group(&plan.planes, deadline, |id| self.plane_row(id)).await?;
        let crews = lock_group(&plan.crews, deadline, |id| self.crew_row(*id)).await?;
        let flights = lock_group(&plan.flights, deadline, |id| self.flight_row(*id)).await?;
        let passengers = lock_group(&plan.passengers, deadline, |id| self.passenger_row(*id)).await?;
        Ok(LockSet { planes, crews, flights, passengers })
    }

    /// Non-blocking acquire for single-owner contexts (WAL replay). Rows that
    /// are contended are skipped.
    pub fn try_acquire(&self, plan: &LockPlan) -> LockSet {
        LockSet {
            planes: try_lock_group(&plan.planes, |id| self.plane_row(id)),
            crews: try_lock_group(&plan.crews, |id| self.crew_row(*id)),
            flights: try_lock_group(&plan.flights, |id| self.flight_row(*id)),
            passengers: try_lock_group(&plan.passengers, |id| self.passenger_row(*id)),
        }
    }
}
