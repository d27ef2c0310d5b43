use std::path::PathBuf;

use serde_json::Value;
use ulid::Ulid;

use flightdesk::batch::execute_line;
use flightdesk::config::EngineConfig;
use flightdesk::engine::Engine;

fn engine(name: &str) -> Engine {
    let dir = std::env::temp_dir().join(format!("flightdesk_batch_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path: PathBuf = dir.join(name);
    Engine::new(path, EngineConfig::default()).unwrap()
}

async fn send(engine: &Engine, line: &str) -> Value {
    serde_json::from_str(&execute_line(engine, line).await).unwrap()
}

async fn ok(engine: &Engine, line: &str) -> Value {
    let v = send(engine, line).await;
    assert!(v.get("error").is_none(), "{line} failed: {v}");
    v["ok"].clone()
}

async fn error_kind(engine: &Engine, line: &str) -> String {
    let v = send(engine, line).await;
    v["error"]["kind"].as_str().unwrap_or_default().to_string()
}

/// 2024-06-01T00:00:00Z in ms.
const JUNE_1: i64 = 1_717_200_000_000;

#[tokio::test]
async fn schedule_by_names_and_book() {
    let e = engine("names.wal");
    ok(&e, r#"{"op":"create_airport","name":"WAW"}"#).await;
    ok(&e, r#"{"op":"create_airport","name":"KRK"}"#).await;
    ok(&e, r#"{"op":"create_plane","identifier":"SP-LRA","passenger_limit":20}"#).await;
    ok(&e, r#"{"op":"create_crew","captain_name":"Anna","captain_surname":"Nowak"}"#).await;

    let line = format!(
        r#"{{"op":"upsert_flight","takeoff_airport":"WAW","takeoff":{},"landing_airport":"KRK","landing":{},"plane":"SP-LRA","crew":{{"name":"Anna","surname":"Nowak"}}}}"#,
        JUNE_1,
        JUNE_1 + 3_600_000
    );
    let flight = ok(&e, &line).await;
    let flight = flight.as_str().unwrap();

    let reserve = |n: i64| {
        format!(r#"{{"op":"reserve","name":"Ada","surname":"Lovelace","flight":"{flight}","tickets":{n}}}"#)
    };
    ok(&e, &reserve(12)).await;
    assert_eq!(error_kind(&e, &reserve(21)).await, "capacity_exceeded");
    assert_eq!(error_kind(&e, &reserve(-1)).await, "invalid_ticket_count");

    let details = ok(&e, &format!(r#"{{"op":"flight_details","id":"{flight}"}}"#)).await;
    assert_eq!(details["reserved"], 12);
    assert_eq!(details["free_seats"], 8);

    let listed = ok(&e, r#"{"op":"list_flights","date":"2024-06-01"}"#).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let listed = ok(&e, r#"{"op":"list_flights","date":"2024-06-02"}"#).await;
    assert!(listed.as_array().unwrap().is_empty());

    let crews = ok(&e, r#"{"op":"list_crews"}"#).await;
    assert_eq!(crews[0]["captain_surname"], "Nowak");
}

#[tokio::test]
async fn errors_carry_kind_and_transience() {
    let e = engine("errors.wal");
    ok(&e, r#"{"op":"create_airport","name":"WAW"}"#).await;
    let v = send(&e, r#"{"op":"create_airport","name":"WAW"}"#).await;
    assert_eq!(v["error"]["kind"], "uniqueness_violation");
    assert_eq!(v["error"]["transient"], false);
    assert!(v["error"]["message"].as_str().unwrap().contains("WAW"));

    let line = format!(
        r#"{{"op":"upsert_flight","takeoff_airport":"WAW","takeoff":{},"landing_airport":"GDN","landing":{},"plane":"SP-LRA"}}"#,
        JUNE_1,
        JUNE_1 + 3_600_000
    );
    assert_eq!(error_kind(&e, &line).await, "not_found");
    assert_eq!(
        error_kind(&e, r#"{"op":"create_plane","identifier":"SP-S","passenger_limit":5}"#).await,
        "invalid_passenger_limit"
    );
}

#[tokio::test]
async fn malformed_lines_do_not_stop_the_runner() {
    let e = engine("malformed.wal");
    assert_eq!(error_kind(&e, "{").await, "invalid_command");
    assert_eq!(error_kind(&e, r#"{"op":"fly_to_the_moon"}"#).await, "invalid_command");
    assert_eq!(error_kind(&e, r#"{"op":"delete_flight","id":"nope"}"#).await, "invalid_command");
    ok(&e, r#"{"op":"create_airport","name":"WAW"}"#).await;
    assert_eq!(ok(&e, r#"{"op":"list_airports"}"#).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_reports_cascade() {
    let e = engine("cascade.wal");
    ok(&e, r#"{"op":"create_airport","name":"WAW"}"#).await;
    ok(&e, r#"{"op":"create_airport","name":"KRK"}"#).await;
    ok(&e, r#"{"op":"create_plane","identifier":"SP-LRA","passenger_limit":20}"#).await;
    let line = format!(
        r#"{{"op":"upsert_flight","takeoff_airport":"WAW","takeoff":{},"landing_airport":"KRK","landing":{},"plane":"SP-LRA"}}"#,
        JUNE_1,
        JUNE_1 + 3_600_000
    );
    let flight = ok(&e, &line).await;
    let flight = flight.as_str().unwrap();
    ok(
        &e,
        &format!(r#"{{"op":"reserve","name":"Ada","surname":"L","flight":"{flight}","tickets":2}}"#),
    )
    .await;

    let cascade = ok(&e, r#"{"op":"delete_plane","identifier":"SP-LRA"}"#).await;
    assert_eq!(cascade["flights"].as_array().unwrap().len(), 1);
    assert_eq!(cascade["reservations"].as_array().unwrap().len(), 1);
    assert_eq!(
        error_kind(&e, &format!(r#"{{"op":"flight_details","id":"{flight}"}}"#)).await,
        "not_found"
    );
}
