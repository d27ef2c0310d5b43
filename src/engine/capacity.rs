use ulid::Ulid;

use crate::model::{FlightState, Reservation};

/// Seats held across `reservations`. Order-independent; computed fresh on
/// every call.
pub fn reserved_total<'a>(reservations: impl IntoIterator<Item = &'a Reservation>) -> u64 {
    reservations
        .into_iter()
        .map(|r| u64::from(r.ticket_count))
        .sum()
}

/// Seats the flight would hold if `passenger_id`'s reservation were set to
/// `ticket_count`, replacing whatever it holds now.
pub fn total_with(flight: &FlightState, passenger_id: Ulid, ticket_count: u32) -> u64 {
    let others = reserved_total(
        flight
            .reservations
            .values()
            .filter(|r| r.passenger_id != passenger_id),
    );
    others + u64::from(ticket_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Flight, HOUR_MS};

    fn flight_with(counts: &[u32]) -> (FlightState, Vec<Ulid>) {
        let flight = Flight {
            id: Ulid::new(),
            takeoff_airport: Ulid::new(),
            takeoff: 0,
            landing_airport: Ulid::new(),
            landing: HOUR_MS,
            plane: "SP-LRA".into(),
            crew: None,
        };
        let mut state = FlightState::new(flight, 20);
        let mut passengers = Vec::new();
        for &n in counts {
            let passenger_id = Ulid::new();
            state.reservations.insert(
                passenger_id,
                Reservation {
                    id: Ulid::new(),
                    passenger_id,
                    flight_id: state.flight.id,
                    ticket_count: n,
                    updated: 0,
                },
            );
            passengers.push(passenger_id);
        }
        (state, passengers)
    }

    #[test]
    fn empty_flight_holds_nothing() {
        let (state, _) = flight_with(&[]);
        assert_eq!(reserved_total(state.reservations.values()), 0);
    }

    #[test]
    fn new_passenger_adds_to_total() {
        let (state, _) = flight_with(&[8, 9]);
        assert_eq!(total_with(&state, Ulid::new(), 10), 27);
    }

    #[test]
    fn existing_passenger_replaces_old_count() {
        let (state, passengers) = flight_with(&[8, 9]);
        assert_eq!(total_with(&state, passengers[0], 3), 12);
        assert_eq!(total_with(&state, passengers[1], 0), 8);
    }
}
