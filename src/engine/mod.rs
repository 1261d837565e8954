mod catalog;
mod compaction;
mod error;
mod queries;
mod reservations;
mod store;

pub use catalog::Retirement;
pub use error::EngineError;
pub use queries::ReservationFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLaboratoryState = Arc<RwLock<LaboratoryState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before compaction sees the file.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("WAL flush of {} events failed: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory laboratory and reservation store backed by the WAL.
///
/// Every laboratory sits behind its own `RwLock`; reservation writes hold the
/// write lock across the conflict re-check and the WAL append, which is what
/// makes check-then-insert atomic per laboratory.
pub struct Engine {
    pub state: DashMap<Ulid, SharedLaboratoryState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → laboratory id
    pub(super) reservation_to_lab: DashMap<Ulid, Ulid>,
    pub(super) names: DashMap<String, Ulid>,
    pub(super) codes: DashMap<String, Ulid>,
    /// Serializes catalog edits so uniqueness checks and inserts are atomic.
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            reservation_to_lab: DashMap::new(),
            names: DashMap::new(),
            codes: DashMap::new(),
            catalog: Mutex::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside an async
        // context (lazy tenant creation).
        for event in &events {
            match event {
                Event::LaboratoryCreated { id, name, code } => {
                    engine.insert_laboratory(LaboratoryState::new(*id, name.clone(), code.clone()));
                }
                Event::LaboratoryDeleted { id } => {
                    if let Some(entry) = engine.get_laboratory_state(id) {
                        let guard = entry.try_read().expect("replay: uncontended read");
                        engine.forget_laboratory(&guard);
                    }
                }
                other => {
                    if let Some(lab_id) = event_laboratory_id(other)
                        && let Some(entry) = engine.state.get(&lab_id)
                    {
                        let ls = entry.clone();
                        let mut guard = ls.try_write().expect("replay: uncontended write");
                        engine.apply(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ls: &mut LaboratoryState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply(ls, event);
        Ok(())
    }

    pub fn get_laboratory_state(&self, id: &Ulid) -> Option<SharedLaboratoryState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn laboratory_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_lab.get(reservation_id).map(|e| *e.value())
    }

    /// Lookup reservation → laboratory, acquire the laboratory's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<LaboratoryState>, EngineError> {
        let lab_id = self
            .laboratory_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let ls = self
            .get_laboratory_state(&lab_id)
            .ok_or(EngineError::NotFound(lab_id))?;
        let guard = ls.write_owned().await;
        // Cancelled between the index lookup and the lock.
        if guard.reservation(*reservation_id).is_none() {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok(guard)
    }

    pub(super) fn insert_laboratory(&self, ls: LaboratoryState) {
        self.names.insert(ls.name.clone(), ls.id);
        self.codes.insert(ls.code.clone(), ls.id);
        self.state.insert(ls.id, Arc::new(RwLock::new(ls)));
    }

    /// Drop a laboratory and every index entry pointing at it.
    pub(super) fn forget_laboratory(&self, ls: &LaboratoryState) {
        self.state.remove(&ls.id);
        self.names.remove(&ls.name);
        self.codes.remove(&ls.code);
        for r in &ls.reservations {
            self.reservation_to_lab.remove(&r.id);
        }
    }

    /// Apply an event to a laboratory (caller holds the lock).
    pub(super) fn apply(&self, ls: &mut LaboratoryState, event: &Event) {
        match event {
            Event::LaboratoryUpdated { id, name, code } => {
                self.names.remove(&ls.name);
                self.codes.remove(&ls.code);
                ls.name = name.clone();
                ls.code = code.clone();
                self.names.insert(name.clone(), *id);
                self.codes.insert(code.clone(), *id);
            }
            Event::LaboratoryStatusChanged { active, .. } => {
                ls.active = *active;
            }
            Event::ReservationCreated {
                id,
                laboratory_id,
                owner,
                span,
            } => {
                ls.insert_reservation(Reservation {
                    id: *id,
                    owner: owner.clone(),
                    span: *span,
                });
                self.reservation_to_lab.insert(*id, *laboratory_id);
            }
            Event::ReservationUpdated { id, span, .. } => {
                if let Some(mut r) = ls.remove_reservation(*id) {
                    r.span = *span;
                    ls.insert_reservation(r);
                }
            }
            Event::ReservationCancelled { id, .. } => {
                ls.remove_reservation(*id);
                self.reservation_to_lab.remove(id);
            }
            // Created/Deleted are handled at the DashMap level, not here
            Event::LaboratoryCreated { .. } | Event::LaboratoryDeleted { .. } => {}
        }
    }
}

/// Extract the laboratory id from an event (for non-Create/Delete events).
fn event_laboratory_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { laboratory_id, .. }
        | Event::ReservationUpdated { laboratory_id, .. }
        | Event::ReservationCancelled { laboratory_id, .. } => Some(*laboratory_id),
        Event::LaboratoryUpdated { id, .. } | Event::LaboratoryStatusChanged { id, .. } => Some(*id),
        Event::LaboratoryCreated { .. } | Event::LaboratoryDeleted { .. } => None,
    }
}
