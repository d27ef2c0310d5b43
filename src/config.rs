use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{MINUTE_MS, Ms};

/// Scheduling rules the validators enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Shortest allowed takeoff-to-landing time.
    pub min_flight_ms: Ms,
    /// Most flights one plane may have touching any calendar day.
    pub max_daily_flights: usize,
    /// Smallest passenger limit a plane may be registered with.
    pub min_passenger_limit: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_flight_ms: 30 * MINUTE_MS,
            max_daily_flights: 4,
            min_passenger_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: Policy,
    /// Upper bound on waiting for the row locks of one mutation.
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Process configuration, read once from `FLIGHTDESK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub engine: EngineConfig,
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions; 0 disables the compactor.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            data_dir: PathBuf::from("./data"),
            wal_file: "flightdesk.wal".into(),
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let policy = Policy {
            min_flight_ms: parsed_opt::<Ms>(&lookup, "FLIGHTDESK_MIN_FLIGHT_MINUTES")
                .and_then(|m| m.checked_mul(MINUTE_MS))
                .unwrap_or(defaults.engine.policy.min_flight_ms),
            max_daily_flights: parsed_opt(&lookup, "FLIGHTDESK_DAILY_FLIGHTS_PER_PLANE")
                .unwrap_or(defaults.engine.policy.max_daily_flights),
            min_passenger_limit: parsed_opt(&lookup, "FLIGHTDESK_MIN_PASSENGER_LIMIT")
                .unwrap_or(defaults.engine.policy.min_passenger_limit),
        };
        let lock_timeout = parsed_opt(&lookup, "FLIGHTDESK_LOCK_TIMEOUT_MS")
            .map_or(defaults.engine.lock_timeout, Duration::from_millis);

        Self {
            engine: EngineConfig { policy, lock_timeout },
            data_dir: lookup("FLIGHTDESK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            wal_file: lookup("FLIGHTDESK_WAL_FILE").unwrap_or(defaults.wal_file),
            metrics_port: parsed_opt(&lookup, "FLIGHTDESK_METRICS_PORT"),
            compact_threshold: parsed_opt(&lookup, "FLIGHTDESK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}

fn parsed_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
