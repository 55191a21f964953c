mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod users;

pub use conflict::{conflicts, validate_span};
pub use error::{EngineError, ErrorKind};
pub use store::RoomStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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
    /// Flush and stop. Appends queued behind this are refused.
    Shutdown {
        response: oneshot::Sender<io::Result<()>>,
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
        let stop = match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush the batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                match pending {
                    Some(other) => handle_non_append(&mut wal, other),
                    None => false,
                }
            }
            other => handle_non_append(&mut wal, other),
        };
        if stop {
            break;
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, events = batch.len(), "WAL flush failed");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Returns true when the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
            false
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            false
        }
        WalCommand::Shutdown { response } => {
            let _ = response.send(wal.flush_sync());
            true
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
            false
        }
    }
}

/// The reservation consistency engine: rooms, their bookings, and users,
/// backed by a group-committed WAL.
pub struct Engine {
    pub store: RoomStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes the username uniqueness check with its insert.
    pub(super) registration: Mutex<()>,
    /// Serializes the room-count check with the room insert.
    pub(super) inventory: Mutex<()>,
    /// Held shared from WAL append through in-memory apply; held exclusively
    /// by compaction from snapshot through file swap. Take it before any room lock.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_tail {
            tracing::warn!(
                path = %wal_path.display(),
                recovered = replay.events.len(),
                "discarded torn WAL tail"
            );
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = RoomStore::from_events(&replay.events);
        tracing::info!(
            path = %wal_path.display(),
            events = replay.events.len(),
            rooms = store.room_count(),
            users = store.user_count(),
            "engine loaded"
        );

        Ok(Self {
            store,
            wal_tx,
            registration: Mutex::new(()),
            inventory: Mutex::new(()),
            commit_gate: RwLock::new(()),
        })
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

    /// WAL-append then apply, under the caller's write lock. Nothing is applied
    /// if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        RoomStore::apply_event(rs, event);
        Ok(())
    }

    /// Acquire the room's write lock. A room deleted while we waited counts as missing.
    pub(super) async fn lock_room(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(room_id));
        }
        Ok(guard)
    }

    pub fn room_count(&self) -> usize {
        self.store.room_count()
    }

    /// Flush outstanding WAL writes and stop the writer. Later mutations fail
    /// with an internal error.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Shutdown { response: tx })
            .await
            .is_err()
        {
            return Ok(()); // already stopped
        }
        match rx.await {
            Ok(result) => result.map_err(|e| EngineError::WalError(e.to_string())),
            Err(_) => Ok(()), // stopped while our request was queued
        }
    }
}
