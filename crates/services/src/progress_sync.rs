use std::sync::Arc;

use room_core::Clock;
use room_core::model::{LearnerId, Snapshot};
use storage::repository::{ProgressPatch, ProgressRecord, ProgressRepository, StorageError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::room::{SharedSession, SyncGuard};

/// What a finished sync request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Saved,
    /// Stage position and countdown were written into the existing record.
    Checkpointed,
    Loaded { timer_preserved: bool },
    Cleared,
    /// The store has no record for this learner; nothing changed.
    NoSavedProgress,
    /// The session changed while the load was in flight; the response was dropped.
    Discarded,
}

type Reply = oneshot::Sender<Result<SyncOutcome, SyncError>>;

/// Handle to one queued sync request. Dropping it does not cancel the request.
#[derive(Debug)]
pub struct SyncTicket {
    reply: oneshot::Receiver<Result<SyncOutcome, SyncError>>,
}

impl SyncTicket {
    fn ready(result: Result<SyncOutcome, SyncError>) -> Self {
        let (tx, reply) = oneshot::channel();
        let _ = tx.send(result);
        Self { reply }
    }

    /// Wait for the request to finish.
    ///
    /// # Errors
    ///
    /// Returns the request's `SyncError`, or `SyncError::Transport` if the worker is gone.
    pub async fn wait(self) -> Result<SyncOutcome, SyncError> {
        self.reply
            .await
            .unwrap_or_else(|_| Err(SyncError::Transport("sync worker stopped".into())))
    }
}

enum Request {
    Save {
        snapshot: Snapshot,
        reply: Reply,
    },
    Checkpoint {
        snapshot: Snapshot,
        reply: Reply,
    },
    Load {
        identity: LearnerId,
        guard: SyncGuard,
        reply: Reply,
    },
    Clear {
        identity: LearnerId,
        reply: Reply,
    },
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Queues save/load/clear requests for one session and runs them one at a time, in issue order.
///
/// Requests never block the caller: each returns a `SyncTicket` right after it is queued.
/// Failures are reported through the ticket and leave the session untouched.
pub struct ProgressSync {
    session: SharedSession,
    requests: mpsc::UnboundedSender<Request>,
}

impl ProgressSync {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(session: SharedSession, progress: Arc<dyn ProgressRepository>, clock: Clock) -> Self {
        let (requests, inbox) = mpsc::unbounded_channel();
        let worker = Worker {
            session: Arc::clone(&session),
            progress,
            clock,
        };
        tokio::spawn(worker.run(inbox));
        Self { session, requests }
    }

    /// Create or replace the stored record with the session as it is now.
    pub async fn save(&self) -> SyncTicket {
        let session = self.session.lock().await;
        match session.snapshot() {
            Ok(snapshot) => self.enqueue(|reply| Request::Save { snapshot, reply }),
            Err(_) => SyncTicket::ready(Err(SyncError::InvalidIdentity)),
        }
    }

    /// Write only stage position and countdown into an existing record.
    pub async fn checkpoint(&self) -> SyncTicket {
        let session = self.session.lock().await;
        match session.snapshot() {
            Ok(snapshot) => self.enqueue(|reply| Request::Checkpoint { snapshot, reply }),
            Err(_) => SyncTicket::ready(Err(SyncError::InvalidIdentity)),
        }
    }

    /// Replace progress with the stored record. Rejected while the room is locked.
    pub async fn load(&self) -> SyncTicket {
        let session = self.session.lock().await;
        let Some(identity) = session.state().identity().cloned() else {
            return SyncTicket::ready(Err(SyncError::InvalidIdentity));
        };
        if session.is_locked() {
            return SyncTicket::ready(Err(SyncError::Locked));
        }
        let guard = session.sync_guard();
        self.enqueue(|reply| Request::Load {
            identity,
            guard,
            reply,
        })
    }

    /// Delete the stored record. The live session is not touched.
    pub async fn clear(&self) -> SyncTicket {
        let session = self.session.lock().await;
        let Some(identity) = session.state().identity().cloned() else {
            return SyncTicket::ready(Err(SyncError::InvalidIdentity));
        };
        self.enqueue(|reply| Request::Clear { identity, reply })
    }

    fn enqueue(&self, build: impl FnOnce(Reply) -> Request) -> SyncTicket {
        let (reply, ticket) = oneshot::channel();
        if self.requests.send(build(reply)).is_err() {
            warn!("sync worker is gone; request dropped");
        }
        SyncTicket { reply: ticket }
    }
}

//
// ─── WORKER ────────────────────────────────────────────────────────────────────
//

struct Worker {
    session: SharedSession,
    progress: Arc<dyn ProgressRepository>,
    clock: Clock,
}

impl Worker {
    async fn run(self, mut inbox: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = inbox.recv().await {
            match request {
                Request::Save { snapshot, reply } => {
                    respond(reply, "save", self.save(&snapshot).await);
                }
                Request::Checkpoint { snapshot, reply } => {
                    respond(reply, "checkpoint", self.checkpoint(&snapshot).await);
                }
                Request::Load {
                    identity,
                    guard,
                    reply,
                } => respond(reply, "load", self.load(&identity, guard).await),
                Request::Clear { identity, reply } => {
                    respond(reply, "clear", self.clear(&identity).await);
                }
            }
        }
        debug!("sync worker stopped");
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<SyncOutcome, SyncError> {
        let record = ProgressRecord::from_snapshot(snapshot, self.clock.now())?;
        self.progress.upsert_progress(&record).await?;
        Ok(SyncOutcome::Saved)
    }

    async fn checkpoint(&self, snapshot: &Snapshot) -> Result<SyncOutcome, SyncError> {
        let patch = ProgressPatch::position(snapshot);
        match self.progress.patch_progress(&snapshot.identity, &patch).await {
            Ok(_) => Ok(SyncOutcome::Checkpointed),
            Err(StorageError::NotFound) => Ok(SyncOutcome::NoSavedProgress),
            Err(err) => Err(err.into()),
        }
    }

    async fn load(&self, identity: &LearnerId, guard: SyncGuard) -> Result<SyncOutcome, SyncError> {
        let Some(record) = self.progress.get_progress(identity).await? else {
            return Ok(SyncOutcome::NoSavedProgress);
        };
        let snapshot = record.into_snapshot()?;

        let mut session = self.session.lock().await;
        if session.sync_guard() != guard {
            return Ok(SyncOutcome::Discarded);
        }
        if session.is_locked() {
            return Err(SyncError::Locked);
        }
        let outcome = session.apply_synced(&snapshot)?;
        Ok(SyncOutcome::Loaded {
            timer_preserved: outcome.timer_preserved,
        })
    }

    async fn clear(&self, identity: &LearnerId) -> Result<SyncOutcome, SyncError> {
        match self.progress.delete_progress(identity).await {
            Ok(()) => Ok(SyncOutcome::Cleared),
            Err(StorageError::NotFound) => Ok(SyncOutcome::NoSavedProgress),
            Err(err) => Err(err.into()),
        }
    }
}

fn respond(reply: Reply, op: &'static str, result: Result<SyncOutcome, SyncError>) {
    match &result {
        Ok(outcome) => info!(op, ?outcome, "progress sync finished"),
        Err(err) => warn!(op, error = %err, "progress sync failed"),
    }
    let _ = reply.send(result);
}
