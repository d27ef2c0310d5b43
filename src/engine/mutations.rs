use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::cascade::{self, Cascade, DeleteTarget};
use super::locks::{LockPlan, required_locks};
use super::store::UniqueKey;
use super::validate::*;
use super::{Engine, EngineError, Entity, now_ms};

impl Engine {
    // ── Root rows ────────────────────────────────────────────

    pub async fn create_airport(&self, name: &str) -> Result<Ulid, EngineError> {
        let name = check_name(name)?;
        if self.store.airport_count() >= MAX_ROWS_PER_KIND {
            return Err(EngineError::LimitExceeded("too many airports"));
        }
        let id = Ulid::new();
        let key = UniqueKey::AirportName(name.clone());
        self.claim_and_commit(key, id, Event::AirportCreated { id, name }).await?;
        Ok(id)
    }

    pub async fn create_plane(&self, identifier: &str, passenger_limit: u32) -> Result<(), EngineError> {
        let identifier = check_name(identifier)?;
        check_passenger_limit(&self.config.policy, passenger_limit)?;
        if self.store.plane_count() >= MAX_ROWS_PER_KIND {
            return Err(EngineError::LimitExceeded("too many planes"));
        }

        let _gate = self.enter().await?;
        let guard = self.store.claim_plane(Plane {
            identifier: identifier.clone(),
            passenger_limit,
        })?;
        let event = Event::PlaneRegistered { identifier, passenger_limit };
        if let Err(e) = self.wal_append(&event).await {
            self.store.abandon_plane(guard);
            return Err(e);
        }
        Ok(())
    }

    pub async fn create_crew(&self, captain_name: &str, captain_surname: &str) -> Result<Ulid, EngineError> {
        let captain_name = check_name(captain_name)?;
        let captain_surname = check_name(captain_surname)?;
        if self.store.crew_count() >= MAX_ROWS_PER_KIND {
            return Err(EngineError::LimitExceeded("too many crews"));
        }
        let id = Ulid::new();
        let key = UniqueKey::CrewCaptain(captain_name.clone(), captain_surname.clone());
        let event = Event::CrewRegistered { id, captain_name, captain_surname };
        self.claim_and_commit(key, id, event).await?;
        Ok(id)
    }

    pub async fn create_passenger(&self, name: &str, surname: &str) -> Result<Ulid, EngineError> {
        let passenger = new_passenger(name, surname)?;
        self.check_passenger_room()?;
        let id = passenger.id;

        let _gate = self.enter().await?;
        let guard = self.store.claim_passenger(passenger.clone())?;
        let event = Event::PassengerRegistered { id, name: passenger.name, surname: passenger.surname };
        if let Err(e) = self.commit_unlocked(&event).await {
            self.store.abandon_passenger(guard);
            return Err(e);
        }
        Ok(id)
    }

    fn check_passenger_room(&self) -> Result<(), EngineError> {
        if self.store.passenger_count() >= MAX_ROWS_PER_KIND {
            return Err(EngineError::LimitExceeded("too many passengers"));
        }
        Ok(())
    }

    async fn claim_and_commit(&self, key: UniqueKey, id: Ulid, event: Event) -> Result<(), EngineError> {
        let _gate = self.enter().await?;
        self.store.claim(key.clone(), id)?;
        if let Err(e) = self.commit_unlocked(&event).await {
            self.store.release(&key, id);
            return Err(e);
        }
        Ok(())
    }

    // ── Flights ──────────────────────────────────────────────

    /// Validate and commit a new flight. Checks run route, interval, daily
    /// quota, plane overlap, crew overlap, stopping at the first failure.
    pub async fn schedule_flight(&self, draft: FlightDraft) -> Result<Ulid, EngineError> {
        let policy = self.config.policy;
        let span = check_shape(&policy, &draft)?;
        self.require_airports(&draft)?;
        if self.store.flight_count() >= MAX_FLIGHTS {
            return Err(EngineError::LimitExceeded("too many flights"));
        }

        let id = Ulid::new();
        let flight = draft.into_flight(id);
        let plan = LockPlan::new().plane(&flight.plane).crew(flight.crew);
        self.transact(plan, |locks| {
            let plane = locks.plane(&flight.plane)?;
            let crew = flight.crew.map(|c| locks.crew(c)).transpose()?;
            check_placement(&policy, &span, plane, crew, None)?;
            Ok((Some(Event::FlightScheduled { flight: flight.clone() }), id))
        })
        .await
    }

    /// Replace every attribute of flight `id`. The flight is excluded from its
    /// own conflict and quota counts. Moving to another plane re-checks the
    /// booked seats against that plane's limit.
    pub async fn update_flight(&self, id: Ulid, draft: FlightDraft) -> Result<(), EngineError> {
        let policy = self.config.policy;
        let span = check_shape(&policy, &draft)?;
        self.require_airports(&draft)?;

        let flight = draft.into_flight(id);
        let event = Event::FlightUpdated { flight: flight.clone() };
        let plan = required_locks(&event, &self.store.snapshot());
        self.transact(plan, |locks| {
            let current = locks.flight(id)?;
            let plane = locks.plane(&flight.plane)?;
            let crew = flight.crew.map(|c| locks.crew(c)).transpose()?;
            check_placement(&policy, &span, plane, crew, Some(id))?;
            if current.flight.plane != flight.plane {
                check_refit(current, plane.plane.passenger_limit)?;
            }
            Ok((Some(event.clone()), ()))
        })
        .await
    }

    /// Create when `id` is `None`, update otherwise.
    pub async fn upsert_flight(&self, id: Option<Ulid>, draft: FlightDraft) -> Result<Ulid, EngineError> {
        match id {
            Some(id) => self.update_flight(id, draft).await.map(|()| id),
            None => self.schedule_flight(draft).await,
        }
    }

    /// Set or clear a flight's crew. Only crew exclusivity is re-checked.
    /// Assigning the crew the flight already has writes nothing.
    pub async fn assign_crew(&self, flight_id: Ulid, crew_id: Option<Ulid>) -> Result<(), EngineError> {
        let event = Event::CrewAssigned { flight_id, crew_id };
        let plan = required_locks(&event, &self.store.snapshot());
        self.transact(plan, |locks| {
            let flight = locks.flight(flight_id)?;
            if flight.flight.crew == crew_id {
                debug!(flight = %flight_id, "crew unchanged");
                return Ok((None, ()));
            }
            if let Some(crew_id) = crew_id {
                let crew = locks.crew(crew_id)?;
                check_crew_free(crew, &flight.flight.span(), Some(flight_id))?;
            }
            Ok((Some(event.clone()), ()))
        })
        .await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Create or update the (passenger, flight) reservation. The flight's
    /// seat total is recomputed with this passenger's old count replaced.
    pub async fn set_reservation(
        &self,
        passenger_id: Ulid,
        flight_id: Ulid,
        ticket_count: i64,
    ) -> Result<Ulid, EngineError> {
        let ticket_count = check_ticket_count(ticket_count)?;
        let plan = LockPlan::new().flight(flight_id).passenger(passenger_id);
        self.transact(plan, |locks| {
            let flight = locks.flight(flight_id)?;
            locks.passenger(passenger_id)?;
            check_capacity(flight, passenger_id, ticket_count)?;
            let id = flight
                .reservations
                .get(&passenger_id)
                .map_or_else(Ulid::new, |existing| existing.id);
            let reservation = Reservation {
                id,
                passenger_id,
                flight_id,
                ticket_count,
                updated: now_ms(),
            };
            Ok((Some(Event::ReservationSet { reservation }), id))
        })
        .await
    }

    /// Book as a passenger known only by name. The passenger with that name
    /// pair is reused; a new one is registered in the same commit as the
    /// reservation, so a rejected booking registers nobody.
    pub async fn reserve_as(
        &self,
        name: &str,
        surname: &str,
        flight_id: Ulid,
        ticket_count: i64,
    ) -> Result<Ulid, EngineError> {
        let tickets = check_ticket_count(ticket_count)?;
        let passenger = new_passenger(name, surname)?;
        let key = UniqueKey::PassengerName(passenger.name.clone(), passenger.surname.clone());
        for attempt in 0..MAX_LOCK_ATTEMPTS {
            let outcome = match self.store.lookup(&key) {
                Some(passenger_id) => self.set_reservation(passenger_id, flight_id, ticket_count).await,
                None => self.book_new_passenger(passenger.clone(), flight_id, tickets).await,
            };
            match outcome {
                // The name was claimed first elsewhere, or the row found for
                // it was abandoned or deleted. Look it up again.
                Err(EngineError::UniquenessViolation(_))
                | Err(EngineError::NotFound { entity: Entity::Passenger, .. }) => {
                    debug!(attempt, passenger = %key, "passenger changed under booking");
                }
                other => return other,
            }
        }
        warn!(passenger = %key, "gave up booking after {MAX_LOCK_ATTEMPTS} attempts");
        Err(EngineError::LockTimeout)
    }

    /// Register `passenger` and reserve for it as one commit. The flight is
    /// locked before the passenger row exists, so lock order holds.
    async fn book_new_passenger(
        &self,
        passenger: Passenger,
        flight_id: Ulid,
        ticket_count: u32,
    ) -> Result<Ulid, EngineError> {
        self.check_passenger_room()?;
        let _gate = self.enter().await?;
        let mut locks = self.lock(&LockPlan::new().flight(flight_id)).await?;
        check_capacity(locks.flight(flight_id)?, passenger.id, ticket_count)?;

        let passenger_id = passenger.id;
        let reservation = Reservation {
            id: Ulid::new(),
            passenger_id,
            flight_id,
            ticket_count,
            updated: now_ms(),
        };
        let id = reservation.id;
        let guard = self.store.claim_passenger(passenger.clone())?;
        locks.passengers.insert(passenger_id, guard);

        let event = Event::PassengerBooked { passenger, reservation };
        if let Err(e) = self.wal_append(&event).await {
            if let Some(guard) = locks.passengers.remove(&passenger_id) {
                self.store.abandon_passenger(guard);
            }
            return Err(e);
        }
        self.store.apply(&mut locks, &event);
        Ok(id)
    }

    // ── Deletion ─────────────────────────────────────────────

    pub async fn delete_plane(&self, identifier: &str) -> Result<Cascade, EngineError> {
        self.delete(DeleteTarget::Plane(identifier.to_string())).await
    }

    pub async fn delete_crew(&self, id: Ulid) -> Result<Cascade, EngineError> {
        self.delete(DeleteTarget::Crew(id)).await
    }

    pub async fn delete_flight(&self, id: Ulid) -> Result<Cascade, EngineError> {
        self.delete(DeleteTarget::Flight(id)).await
    }

    pub async fn delete_passenger(&self, id: Ulid) -> Result<Cascade, EngineError> {
        self.delete(DeleteTarget::Passenger(id)).await
    }

    /// Delete `target` and everything that cascades from it as one commit.
    /// Returns what was removed.
    async fn delete(&self, target: DeleteTarget) -> Result<Cascade, EngineError> {
        let event = target.to_event();
        let plan = required_locks(&event, &self.store.snapshot());
        self.transact(plan, |locks| {
            match &target {
                DeleteTarget::Plane(identifier) => {
                    locks.plane(identifier)?;
                }
                DeleteTarget::Crew(id) => {
                    locks.crew(*id)?;
                }
                DeleteTarget::Flight(id) => {
                    locks.flight(*id)?;
                }
                DeleteTarget::Passenger(id) => {
                    locks.passenger(*id)?;
                }
            }
            Ok((Some(event.clone()), cascade::plan(&target, locks)))
        })
        .await
    }

    fn require_airports(&self, draft: &FlightDraft) -> Result<(), EngineError> {
        for id in [draft.takeoff_airport, draft.landing_airport] {
            if self.store.airport(id).is_none() {
                return Err(EngineError::not_found(Entity::Airport, id));
            }
        }
        Ok(())
    }
}

fn new_passenger(name: &str, surname: &str) -> Result<Passenger, EngineError> {
    Ok(Passenger {
        id: Ulid::new(),
        name: check_name(name)?,
        surname: check_name(surname)?,
    })
}
