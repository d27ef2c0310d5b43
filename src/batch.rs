use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, Entity};
use crate::model::{FlightDraft, Ms};
use crate::observability;

/// A crew named by its captain, the way schedules are written by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptainRef {
    pub name: String,
    pub surname: String,
}

/// One line of the batch protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateAirport {
        name: String,
    },
    CreatePlane {
        identifier: String,
        passenger_limit: u32,
    },
    CreateCrew {
        captain_name: String,
        captain_surname: String,
    },
    CreatePassenger {
        name: String,
        surname: String,
    },
    /// Schedule a new flight, or reschedule `id` when given.
    UpsertFlight {
        #[serde(default)]
        id: Option<Ulid>,
        takeoff_airport: String,
        takeoff: Ms,
        landing_airport: String,
        landing: Ms,
        plane: String,
        #[serde(default)]
        crew: Option<CaptainRef>,
    },
    AssignCrew {
        flight: Ulid,
        #[serde(default)]
        crew: Option<CaptainRef>,
    },
    SetReservation {
        passenger: Ulid,
        flight: Ulid,
        tickets: i64,
    },
    /// Book under a passenger name, registering the passenger if needed.
    Reserve {
        name: String,
        surname: String,
        flight: Ulid,
        tickets: i64,
    },
    DeletePlane {
        identifier: String,
    },
    DeleteCrew {
        crew: CaptainRef,
    },
    DeleteFlight {
        id: Ulid,
    },
    DeletePassenger {
        id: Ulid,
    },
    ListFlights {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    FlightDetails {
        id: Ulid,
    },
    ListAirports,
    ListPlanes,
    ListCrews,
    ListPassengers,
    CrewFlights {
        crew: CaptainRef,
    },
    PassengerFlights {
        id: Ulid,
    },
    Compact,
}

fn to_value<T: Serialize>(value: T) -> Result<Value, EngineError> {
    Ok(serde_json::to_value(value).unwrap_or_else(|e| {
        warn!("unencodable result: {e}");
        Value::Null
    }))
}

fn airport_id(engine: &Engine, name: &str) -> Result<Ulid, EngineError> {
    engine
        .find_airport(name)
        .map(|a| a.id)
        .ok_or_else(|| EngineError::not_found(Entity::Airport, name))
}

async fn crew_id(engine: &Engine, captain: &CaptainRef) -> Result<Ulid, EngineError> {
    engine
        .find_crew(&captain.name, &captain.surname)
        .await
        .map(|c| c.id)
        .ok_or_else(|| {
            EngineError::not_found(Entity::Crew, format!("{} {}", captain.name, captain.surname))
        })
}

/// Run one command against the engine.
pub async fn execute(engine: &Engine, cmd: Command) -> Result<Value, EngineError> {
    match cmd {
        Command::CreateAirport { name } => to_value(engine.create_airport(&name).await?),
        Command::CreatePlane { identifier, passenger_limit } => {
            engine.create_plane(&identifier, passenger_limit).await?;
            to_value(identifier.trim())
        }
        Command::CreateCrew { captain_name, captain_surname } => {
            to_value(engine.create_crew(&captain_name, &captain_surname).await?)
        }
        Command::CreatePassenger { name, surname } => {
            to_value(engine.create_passenger(&name, &surname).await?)
        }
        Command::UpsertFlight {
            id,
            takeoff_airport,
            takeoff,
            landing_airport,
            landing,
            plane,
            crew,
        } => {
            let crew = match &crew {
                Some(captain) => Some(crew_id(engine, captain).await?),
                None => None,
            };
            let draft = FlightDraft {
                takeoff_airport: airport_id(engine, &takeoff_airport)?,
                takeoff,
                landing_airport: airport_id(engine, &landing_airport)?,
                landing,
                plane,
                crew,
            };
            to_value(engine.upsert_flight(id, draft).await?)
        }
        Command::AssignCrew { flight, crew } => {
            let crew = match &crew {
                Some(captain) => Some(crew_id(engine, captain).await?),
                None => None,
            };
            engine.assign_crew(flight, crew).await?;
            Ok(Value::Null)
        }
        Command::SetReservation { passenger, flight, tickets } => {
            to_value(engine.set_reservation(passenger, flight, tickets).await?)
        }
        Command::Reserve { name, surname, flight, tickets } => {
            to_value(engine.reserve_as(&name, &surname, flight, tickets).await?)
        }
        Command::DeletePlane { identifier } => to_value(engine.delete_plane(&identifier).await?),
        Command::DeleteCrew { crew } => {
            let id = crew_id(engine, &crew).await?;
            to_value(engine.delete_crew(id).await?)
        }
        Command::DeleteFlight { id } => to_value(engine.delete_flight(id).await?),
        Command::DeletePassenger { id } => to_value(engine.delete_passenger(id).await?),
        Command::ListFlights { date } => to_value(engine.list_flights(date).await),
        Command::FlightDetails { id } => to_value(engine.flight_details(id).await?),
        Command::ListAirports => to_value(engine.list_airports()),
        Command::ListPlanes => to_value(engine.list_planes().await),
        Command::ListCrews => to_value(engine.list_crews().await),
        Command::ListPassengers => to_value(engine.list_passengers().await),
        Command::CrewFlights { crew } => {
            let id = crew_id(engine, &crew).await?;
            to_value(engine.crew_flights(id).await?)
        }
        Command::PassengerFlights { id } => to_value(engine.passenger_flights(id).await?),
        Command::Compact => {
            engine.compact_wal().await?;
            Ok(Value::Null)
        }
    }
}

fn error_value(kind: &str, message: String, transient: bool) -> Value {
    json!({ "error": { "kind": kind, "message": message, "transient": transient } })
}

/// Run a command and shape the outcome as a response object, recording
/// per-operation metrics and logging rejections.
pub async fn run(engine: &Engine, cmd: Command) -> Value {
    let op = observability::command_label(&cmd);
    let start = Instant::now();
    let result = execute(engine, cmd).await;
    metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => "ok")
                .increment(1);
            json!({ "ok": value })
        }
        Err(e) => {
            let kind = e.kind().as_str();
            metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => "error")
                .increment(1);
            if e.is_transient() {
                warn!(op, kind, "{e}");
            } else {
                metrics::counter!(observability::VALIDATION_REJECTIONS_TOTAL, "kind" => kind)
                    .increment(1);
                debug!(op, kind, "rejected: {e}");
            }
            error_value(kind, e.to_string(), e.is_transient())
        }
    }
}

/// Parse and run one input line. Always produces exactly one response line.
pub async fn execute_line(engine: &Engine, line: &str) -> String {
    let response = match serde_json::from_str::<Command>(line) {
        Ok(cmd) => run(engine, cmd).await,
        Err(e) => {
            debug!("invalid command: {e}");
            error_value("invalid_command", e.to_string(), false)
        }
    };
    response.to_string()
}
