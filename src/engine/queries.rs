use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::capacity::reserved_total;
use super::store::{Shared, UniqueKey};
use super::{Engine, EngineError, Entity};

/// Read a row unless it has been retired.
async fn read_live<T, R>(
    row: &Shared<T>,
    retired: impl Fn(&T) -> bool,
    f: impl FnOnce(&T) -> R,
) -> Option<R> {
    let guard = row.read().await;
    (!retired(&*guard)).then(|| f(&*guard))
}

impl Engine {
    /// Flights in (takeoff, landing, id) order. With a date, only flights
    /// touching that UTC day: takeoff date ≤ day ≤ landing date.
    pub async fn list_flights(&self, date: Option<NaiveDate>) -> Vec<Flight> {
        let day = date.map(day_of_date);
        let mut flights = Vec::new();
        for row in self.store.flight_rows() {
            let flight = read_live(&row, |f| f.retired, |f| f.flight.clone()).await;
            if let Some(flight) = flight
                && day.is_none_or(|d| flight.span().touches_day(d))
            {
                flights.push(flight);
            }
        }
        flights.sort_by_key(|f| (f.takeoff, f.landing, f.id));
        flights
    }

    pub async fn get_flight(&self, id: Ulid) -> Result<Flight, EngineError> {
        let row = self
            .store
            .flight_row(id)
            .ok_or_else(|| EngineError::not_found(Entity::Flight, id))?;
        read_live(&row, |f| f.retired, |f| f.flight.clone())
            .await
            .ok_or_else(|| EngineError::not_found(Entity::Flight, id))
    }

    /// The flight, its seat usage, and its non-empty reservations with the
    /// most recently updated first.
    pub async fn flight_details(&self, id: Ulid) -> Result<FlightDetails, EngineError> {
        let row = self
            .store
            .flight_row(id)
            .ok_or_else(|| EngineError::not_found(Entity::Flight, id))?;
        let state = row.read().await;
        if state.retired {
            return Err(EngineError::not_found(Entity::Flight, id));
        }
        let reserved = reserved_total(state.reservations.values());
        let mut reservations: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.ticket_count > 0)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.updated.cmp(&a.updated).then(a.id.cmp(&b.id)));
        Ok(FlightDetails {
            flight: state.flight.clone(),
            passenger_limit: state.passenger_limit,
            reserved,
            free_seats: u64::from(state.passenger_limit).saturating_sub(reserved),
            reservations,
        })
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let missing = || EngineError::not_found(Entity::Reservation, id);
        let (flight_id, passenger_id) = self.store.reservation_location(id).ok_or_else(missing)?;
        let row = self.store.flight_row(flight_id).ok_or_else(missing)?;
        read_live(&row, |f| f.retired, |f| f.reservations.get(&passenger_id).cloned())
            .await
            .flatten()
            .ok_or_else(missing)
    }

    /// Flights of one plane in takeoff order.
    pub async fn plane_flights(&self, identifier: &str) -> Result<Vec<Ulid>, EngineError> {
        let row = self
            .store
            .plane_row(identifier)
            .ok_or_else(|| EngineError::not_found(Entity::Plane, identifier))?;
        read_live(&row, |p| p.retired, |p| p.schedule.flight_ids().collect())
            .await
            .ok_or_else(|| EngineError::not_found(Entity::Plane, identifier))
    }

    /// Flights of one crew in takeoff order.
    pub async fn crew_flights(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let row = self
            .store
            .crew_row(id)
            .ok_or_else(|| EngineError::not_found(Entity::Crew, id))?;
        read_live(&row, |c| c.retired, |c| c.schedule.flight_ids().collect())
            .await
            .ok_or_else(|| EngineError::not_found(Entity::Crew, id))
    }

    /// Flights a passenger holds a reservation on.
    pub async fn passenger_flights(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let row = self
            .store
            .passenger_row(id)
            .ok_or_else(|| EngineError::not_found(Entity::Passenger, id))?;
        read_live(&row, |p| p.retired, |p| p.flights.iter().copied().collect())
            .await
            .ok_or_else(|| EngineError::not_found(Entity::Passenger, id))
    }

    // ── Directory listings ───────────────────────────────────

    pub fn list_airports(&self) -> Vec<Airport> {
        let mut airports = self.store.airports();
        airports.sort_by(|a, b| a.name.cmp(&b.name));
        airports
    }

    pub fn find_airport(&self, name: &str) -> Option<Airport> {
        let id = self.store.lookup(&UniqueKey::AirportName(name.trim().to_string()))?;
        self.store.airport(id)
    }

    pub async fn list_planes(&self) -> Vec<Plane> {
        let mut planes = Vec::new();
        for row in self.store.plane_rows() {
            planes.extend(read_live(&row, |p| p.retired, |p| p.plane.clone()).await);
        }
        planes.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        planes
    }

    pub async fn get_plane(&self, identifier: &str) -> Result<Plane, EngineError> {
        let row = self
            .store
            .plane_row(identifier)
            .ok_or_else(|| EngineError::not_found(Entity::Plane, identifier))?;
        read_live(&row, |p| p.retired, |p| p.plane.clone())
            .await
            .ok_or_else(|| EngineError::not_found(Entity::Plane, identifier))
    }

    /// Crews by captain surname, then name.
    pub async fn list_crews(&self) -> Vec<Crew> {
        let mut crews = Vec::new();
        for row in self.store.crew_rows() {
            crews.extend(read_live(&row, |c| c.retired, |c| c.crew.clone()).await);
        }
        crews.sort_by(|a, b| {
            (&a.captain_surname, &a.captain_name).cmp(&(&b.captain_surname, &b.captain_name))
        });
        crews
    }

    pub async fn find_crew(&self, captain_name: &str, captain_surname: &str) -> Option<Crew> {
        let key = UniqueKey::CrewCaptain(
            captain_name.trim().to_string(),
            captain_surname.trim().to_string(),
        );
        let row = self.store.crew_row(self.store.lookup(&key)?)?;
        read_live(&row, |c| c.retired, |c| c.crew.clone()).await
    }

    /// Passengers by surname, then name.
    pub async fn list_passengers(&self) -> Vec<Passenger> {
        let mut passengers = Vec::new();
        for row in self.store.passenger_rows() {
            passengers.extend(read_live(&row, |p| p.retired, |p| p.passenger.clone()).await);
        }
        passengers.sort_by(|a, b| (&a.surname, &a.name).cmp(&(&b.surname, &b.name)));
        passengers
    }

    pub async fn find_passenger(&self, name: &str, surname: &str) -> Option<Passenger> {
        let key = UniqueKey::PassengerName(name.trim().to_string(), surname.trim().to_string());
        let row = self.store.passenger_row(self.store.lookup(&key)?)?;
        read_live(&row, |p| p.retired, |p| p.passenger.clone()).await
    }
}
