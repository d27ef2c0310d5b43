mod capacity;
mod cascade;
mod error;
mod locks;
mod mutations;
mod overlap;
mod queries;
mod quota;
mod store;
mod validate;

pub use cascade::{Cascade, DeleteTarget, RelationView};
pub use error::{EngineError, Entity, ErrorKind};

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::{RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::limits::MAX_LOCK_ATTEMPTS;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use locks::{LockPlan, LockSet, required_locks};
use store::EntityStore;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then one fsync answers the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(batch = batch.len(), "WAL flush failed: {e}");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes never leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The scheduling-consistency engine: entity rows, their locks, and the WAL
/// every committed mutation goes through.
pub struct Engine {
    pub(super) store: EntityStore,
    pub(super) config: EngineConfig,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Read-held by every mutation, write-held by compaction. Taken before
    /// any row lock.
    commit_gate: RwLock<()>,
}

impl Engine {
    /// Open the WAL at `wal_path`, replay it (cutting off a torn tail), and
    /// start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: EntityStore::new(),
            config,
            wal_tx,
            commit_gate: RwLock::new(()),
        };

        // Sole owner of every row here, so the non-blocking acquire never
        // misses one.
        for event in &events {
            let plan = required_locks(event, &engine.store.snapshot());
            let mut locks = engine.store.try_acquire(&plan);
            engine.store.apply(&mut locks, event);
        }
        metrics::gauge!(observability::FLIGHTS_ACTIVE).set(engine.store.flight_count() as f64);
        info!(
            path = %wal_path.display(),
            events = events.len(),
            flights = engine.store.flight_count(),
            "engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Shared side of the commit gate, bounded by the lock timeout.
    async fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout, self.commit_gate.read())
            .await
            .map_err(|_| EngineError::LockTimeout)
    }

    /// Lock `plan` within the lock timeout, recording the wait.
    async fn lock(&self, plan: &LockPlan) -> Result<LockSet, EngineError> {
        let wait_start = Instant::now();
        let locks = self.store.acquire(plan, self.config.lock_timeout).await?;
        metrics::histogram!(observability::LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        Ok(locks)
    }

    /// Run one validated mutation under row locks.
    ///
    /// Locks `plan` and runs `step` against the locked rows. `step` returns
    /// the event to commit (`None` when there is nothing to write) and the
    /// caller's result. The event's own lock needs are then checked against
    /// what is held. If they are not covered (the rows it touches changed
    /// since the plan was made), everything is released and the pass is
    /// retried with the widened plan. On commit the event is made durable and
    /// applied while the locks are still held.
    pub(super) async fn transact<T>(
        &self,
        mut plan: LockPlan,
        mut step: impl FnMut(&LockSet) -> Result<(Option<Event>, T), EngineError>,
    ) -> Result<T, EngineError> {
        let _gate = self.enter().await?;
        for attempt in 0..MAX_LOCK_ATTEMPTS {
            let mut locks = self.lock(&plan).await?;

            let (event, value) = step(&locks)?;
            let Some(event) = event else {
                return Ok(value);
            };
            let needed = required_locks(&event, &locks);
            if !locks.held().covers(&needed) {
                debug!(attempt, "lock plan widened");
                drop(locks);
                plan.merge(needed);
                continue;
            }
            self.wal_append(&event).await?;
            self.store.apply(&mut locks, &event);
            return Ok(value);
        }
        warn!("gave up widening lock plan after {MAX_LOCK_ATTEMPTS} attempts");
        Err(EngineError::LockTimeout)
    }

    /// Append and apply an event that touches no existing row.
    async fn commit_unlocked(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply(&mut LockSet::default(), event);
        Ok(())
    }

    /// Rewrite the WAL as the minimal event sequence reproducing the current
    /// state. Holds the commit gate exclusively, so no mutation is in flight.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _quiet = self.commit_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for airport in self.store.airports() {
            events.push(Event::AirportCreated { id: airport.id, name: airport.name });
        }
        for row in self.store.plane_rows() {
            let plane = row.read().await;
            events.push(Event::PlaneRegistered {
                identifier: plane.plane.identifier.clone(),
                passenger_limit: plane.plane.passenger_limit,
            });
        }
        for row in self.store.crew_rows() {
            let crew = row.read().await;
            events.push(Event::CrewRegistered {
                id: crew.crew.id,
                captain_name: crew.crew.captain_name.clone(),
                captain_surname: crew.crew.captain_surname.clone(),
            });
        }
        for row in self.store.passenger_rows() {
            let passenger = row.read().await;
            events.push(Event::PassengerRegistered {
                id: passenger.passenger.id,
                name: passenger.passenger.name.clone(),
                surname: passenger.passenger.surname.clone(),
            });
        }
        let mut reservations = Vec::new();
        for row in self.store.flight_rows() {
            let flight = row.read().await;
            events.push(Event::FlightScheduled { flight: flight.flight.clone() });
            reservations.extend(flight.reservations.values().cloned());
        }
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationSet { reservation }),
        );
        events
    }
}

/// Current wall-clock time in Unix milliseconds.
pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}
