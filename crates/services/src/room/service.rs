use std::sync::Arc;

use room_core::model::{
    LearnerId, RestoreOutcome, SessionState, SessionStateError, Snapshot, SnapshotError,
    StageCatalog, StageDescriptor, StageKind,
};
use room_core::{TickOutcome, TimerState};
use sandbox::{Submission, Verdict, Verifier};
use tracing::{debug, info};

use super::progress::RoomProgress;
use super::view::StageView;
use crate::error::SessionError;

/// Session handle shared between the REPL, the timer driver and the sync worker.
pub type SharedSession = Arc<tokio::sync::Mutex<RoomSession>>;

/// Marks the learner-visible state a sync request was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncGuard {
    epoch: u64,
    revision: u64,
}

/// A code-stage run detached from the session. Cheap to move to a blocking thread.
#[derive(Debug, Clone)]
pub struct PendingRun {
    stage: StageDescriptor,
    text: String,
    verifier: Verifier,
    guard: SyncGuard,
}

impl PendingRun {
    #[must_use]
    pub fn stage(&self) -> &StageDescriptor {
        &self.stage
    }

    /// Run the program in a fresh sandbox. Blocks for as long as the program runs.
    #[must_use]
    pub fn verify(&self) -> Verdict {
        self.verifier.verify(&self.stage, Submission::Code(&self.text))
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Live escape-room session: owns the state and gates the verifier on the timer lock.
///
/// The verifier only judges; solved flags are set here, and only for passing verdicts.
pub struct RoomSession {
    state: SessionState,
    catalog: Arc<StageCatalog>,
    verifier: Verifier,
    revision: u64,
}

impl RoomSession {
    /// Create a session at stage 0 with an idle timer of `minutes`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Timer` if `minutes` is zero.
    pub fn new(
        identity: Option<LearnerId>,
        catalog: Arc<StageCatalog>,
        verifier: Verifier,
        minutes: u32,
    ) -> Result<Self, SessionError> {
        let timer = TimerState::new(minutes)?;
        let state = SessionState::new(identity, &catalog, timer);
        Ok(Self {
            state,
            catalog,
            verifier,
            revision: 0,
        })
    }

    #[must_use]
    pub fn shared(self) -> SharedSession {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<&StageDescriptor> {
        self.state.current_stage(&self.catalog)
    }

    #[must_use]
    pub fn current_view(&self) -> Option<StageView> {
        let index = self.state.current_stage_index();
        self.current_stage()
            .map(|stage| StageView::build(index, self.catalog.len(), stage, &self.state))
    }

    #[must_use]
    pub fn progress(&self) -> RoomProgress {
        RoomProgress {
            solved: self.state.solved_count(),
            total: self.catalog.len(),
            current_stage: self.state.current_stage_index(),
            escaped: self.state.all_solved(),
            locked: self.state.is_locked(),
        }
    }

    pub(crate) fn sync_guard(&self) -> SyncGuard {
        SyncGuard {
            epoch: self.state.epoch(),
            revision: self.revision,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // ─── Navigation ────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `SessionError::Locked` after expiry, or `State` when `index` is out of range.
    pub fn go_to(&mut self, index: usize) -> Result<(), SessionError> {
        self.state.go_to(index, &self.catalog)?;
        self.touch();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::Locked` after expiry, or `Boundary` on the last stage.
    pub fn next(&mut self) -> Result<usize, SessionError> {
        if self.state.is_locked() {
            return Err(SessionError::Locked);
        }
        let index = self.state.current_stage_index() + 1;
        if index >= self.catalog.len() {
            return Err(SessionError::Boundary("last"));
        }
        self.go_to(index)?;
        Ok(index)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Locked` after expiry, or `Boundary` on the first stage.
    pub fn previous(&mut self) -> Result<usize, SessionError> {
        if self.state.is_locked() {
            return Err(SessionError::Locked);
        }
        let index = self
            .state
            .current_stage_index()
            .checked_sub(1)
            .ok_or(SessionError::Boundary("first"))?;
        self.go_to(index)?;
        Ok(index)
    }

    // ─── Submissions ───────────────────────────────────────────────────────

    /// Replace the program text of the current stage.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Locked` after expiry and `NotCodeStage` on interaction stages.
    pub fn edit_source(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        let key = self.current_key()?;
        self.state.set_source(&key, text, &self.catalog)?;
        self.touch();
        Ok(())
    }

    /// Verify the current code stage's program text.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Locked` after expiry (the verifier is not consulted) and
    /// `NotCodeStage` on interaction stages. Failing submissions are `Ok` verdicts.
    pub fn run_current(&mut self) -> Result<Verdict, SessionError> {
        let run = self.begin_run()?;
        let verdict = run.verify();
        self.finish_run(&run, verdict)
    }

    /// Take the current stage's program out of the session so it can run without the lock.
    ///
    /// # Errors
    ///
    /// Same as [`RoomSession::run_current`].
    pub fn begin_run(&self) -> Result<PendingRun, SessionError> {
        if self.state.is_locked() {
            return Err(SessionError::Locked);
        }
        let stage = self.current_descriptor()?;
        if stage.kind() != StageKind::CodeChallenge {
            return Err(SessionError::NotCodeStage {
                key: stage.key().clone(),
            });
        }
        Ok(PendingRun {
            text: self.state.source(stage.key()).unwrap_or_default().to_owned(),
            stage: stage.clone(),
            verifier: self.verifier.clone(),
            guard: self.sync_guard(),
        })
    }

    /// Record the verdict of a run started with [`RoomSession::begin_run`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Locked` if time ran out meanwhile and `Superseded` if the learner
    /// edited, navigated, reset or loaded since the run began. Neither marks the stage solved.
    pub fn finish_run(
        &mut self,
        run: &PendingRun,
        verdict: Verdict,
    ) -> Result<Verdict, SessionError> {
        if self.state.is_locked() {
            return Err(SessionError::Locked);
        }
        if self.sync_guard() != run.guard {
            debug!(stage = %run.stage.key(), "run finished against a changed session");
            return Err(SessionError::Superseded);
        }
        self.settle(verdict)
    }

    /// Pick a hotspot on the current interaction stage.
    ///
    /// Decoys produce a failing verdict and leave solved flags alone.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Locked` after expiry and `NotInteractionStage` on code stages.
    pub fn choose_hotspot(&mut self, id: &str) -> Result<Verdict, SessionError> {
        if self.state.is_locked() {
            return Err(SessionError::Locked);
        }
        let stage = self.current_descriptor()?;
        if stage.kind() != StageKind::InteractionChallenge {
            return Err(SessionError::NotInteractionStage {
                key: stage.key().clone(),
            });
        }
        let verdict = self.verifier.verify(stage, Submission::Hotspot(id));
        self.settle(verdict)
    }

    fn settle(&mut self, verdict: Verdict) -> Result<Verdict, SessionError> {
        let key = self.current_key()?;
        if verdict.passed && self.state.mark_solved(&key) {
            self.touch();
            info!(
                stage = %key,
                solved = self.state.solved_count(),
                total = self.catalog.len(),
                "stage solved"
            );
            if self.state.all_solved() {
                info!("all stages solved; the room is open");
            }
        }
        Ok(verdict)
    }

    fn current_descriptor(&self) -> Result<&StageDescriptor, SessionError> {
        let index = self.state.current_stage_index();
        self.catalog.get(index).ok_or(SessionError::State(
            SessionStateError::StageOutOfRange {
                index,
                len: self.catalog.len(),
            },
        ))
    }

    fn current_key(&self) -> Result<room_core::model::StageKey, SessionError> {
        self.current_descriptor().map(|stage| stage.key().clone())
    }

    pub fn set_background(&mut self, reference: impl Into<String>) {
        self.state.set_background_reference(reference);
        self.touch();
    }

    // ─── Timer ─────────────────────────────────────────────────────────────

    pub fn start_timer(&mut self) -> bool {
        let started = self.state.start_timer();
        if started {
            debug!(remaining = self.state.timer().remaining_seconds(), "timer started");
        }
        started
    }

    pub fn pause_timer(&mut self) -> bool {
        let paused = self.state.pause_timer();
        if paused {
            debug!(remaining = self.state.timer().remaining_seconds(), "timer paused");
        }
        paused
    }

    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.state.tick_timer();
        if outcome == TickOutcome::Expired {
            info!("time is up; the room is locked until reset");
        }
        outcome
    }

    /// Back to an idle timer; clears the lock. Progress is kept.
    pub fn reset_timer(&mut self) {
        self.state.reset_timer();
        self.touch();
        debug!("timer reset");
    }

    /// # Errors
    ///
    /// Returns `SessionError::Timer` unless the timer is idle and `minutes` is positive.
    pub fn set_configured_minutes(&mut self, minutes: u32) -> Result<(), SessionError> {
        self.state.set_configured_minutes(minutes)?;
        Ok(())
    }

    /// Explicit full reset: starter texts, nothing solved, first stage, idle timer.
    pub fn reset_progress(&mut self) {
        self.state.reset_progress(&self.catalog);
        self.touch();
        info!("progress reset");
    }

    // ─── Snapshots ─────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `SessionError::State` for guest sessions, which have no identity.
    pub fn snapshot(&self) -> Result<Snapshot, SessionError> {
        Ok(self.state.snapshot()?)
    }

    /// Replace progress from a loaded snapshot; a running countdown keeps its time.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` (nothing changed) when the snapshot does not fit the catalog.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<RestoreOutcome, SnapshotError> {
        let outcome = self.state.apply_snapshot(snapshot, &self.catalog)?;
        self.touch();
        Ok(outcome)
    }

    /// Apply a snapshot delivered by the sync worker.
    ///
    /// Unlike [`RoomSession::apply_snapshot`] this leaves the sync guard alone, so loads queued
    /// behind this one still apply in issue order.
    pub(crate) fn apply_synced(
        &mut self,
        snapshot: &Snapshot,
    ) -> Result<RestoreOutcome, SnapshotError> {
        self.state.apply_snapshot(snapshot, &self.catalog)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use room_core::TimerPhase;
    use room_core::model::StageKey;

    fn session(identity: Option<LearnerId>) -> RoomSession {
        RoomSession::new(
            identity,
            Arc::new(StageCatalog::standard()),
            Verifier::default(),
            1,
        )
        .unwrap()
    }

    fn expire(session: &mut RoomSession) {
        assert!(session.start_timer());
        while session.tick() != TickOutcome::Expired {}
    }

    #[test]
    fn passing_code_marks_stage_solved() {
        let mut room = session(None);
        room.edit_source("function add(a, b) return a + b end").unwrap();
        let verdict = room.run_current().unwrap();
        assert!(verdict.passed, "{}", verdict.message);
        assert!(room.state().is_solved(&StageKey::new("format")));
        assert_eq!(room.progress().solved, 1);
    }

    #[test]
    fn failed_runs_never_unsolve() {
        let mut room = session(None);
        room.edit_source("function add(a, b) return a + b end").unwrap();
        assert!(room.run_current().unwrap().passed);

        room.edit_source("function add(a, b) return a * b end").unwrap();
        let verdict = room.run_current().unwrap();
        assert!(!verdict.passed);
        assert!(verdict.message.contains("expected 5, got 6"), "{}", verdict.message);
        assert!(room.state().is_solved(&StageKey::new("format")));
    }

    #[test]
    fn sandbox_errors_become_failed_verdicts() {
        let mut room = session(None);
        room.edit_source("add = undefined_helper").unwrap();
        let verdict = room.run_current().unwrap();
        assert!(!verdict.passed);
        assert!(verdict.message.contains("`undefined_helper` is not defined"));
    }

    #[test]
    fn locked_session_rejects_runs_navigation_and_edits() {
        let mut room = session(None);
        room.edit_source("function add(a, b) return a + b end").unwrap();
        expire(&mut room);

        assert_eq!(room.run_current(), Err(SessionError::Locked));
        assert_eq!(room.next(), Err(SessionError::Locked));
        assert_eq!(room.edit_source("x = 1"), Err(SessionError::Locked));
        assert!(!room.state().is_solved(&StageKey::new("format")));
        assert!(room.current_view().unwrap().read_only);

        room.reset_timer();
        assert_eq!(room.state().timer().phase(), TimerPhase::Idle);
        assert!(room.run_current().unwrap().passed);
    }

    #[test]
    fn hotspot_stage_accepts_only_the_target() {
        let mut room = session(None);
        room.go_to(3).unwrap();
        assert!(matches!(
            room.run_current(),
            Err(SessionError::NotCodeStage { .. })
        ));

        let decoy = room.choose_hotspot("painting").unwrap();
        assert!(!decoy.passed);
        assert!(!room.state().is_solved(&StageKey::new("escape")));

        assert!(room.choose_hotspot("loose-brick").unwrap().passed);
        assert!(room.state().is_solved(&StageKey::new("escape")));

        room.go_to(0).unwrap();
        assert!(matches!(
            room.choose_hotspot("rug"),
            Err(SessionError::NotInteractionStage { .. })
        ));
    }

    #[test]
    fn navigation_stops_at_both_ends() {
        let mut room = session(None);
        assert_eq!(room.previous(), Err(SessionError::Boundary("first")));
        assert_eq!(room.next().unwrap(), 1);
        assert_eq!(room.previous().unwrap(), 0);
        room.go_to(3).unwrap();
        assert_eq!(room.next(), Err(SessionError::Boundary("last")));
        assert_eq!(room.progress().current_stage, 3);
    }

    #[test]
    fn minutes_change_only_while_idle() {
        let mut room = session(None);
        room.set_configured_minutes(5).unwrap();
        room.start_timer();
        assert!(matches!(
            room.set_configured_minutes(3),
            Err(SessionError::Timer(_))
        ));
        assert_eq!(room.state().timer().remaining_seconds(), 300);
    }

    #[test]
    fn guest_sessions_cannot_snapshot() {
        let room = session(None);
        assert!(room.snapshot().is_err());
        let named = session(Some(LearnerId::generate()));
        assert!(named.snapshot().is_ok());
    }

    #[test]
    fn learner_actions_move_the_sync_guard() {
        let mut room = session(None);
        let before = room.sync_guard();
        room.tick();
        assert_eq!(room.sync_guard(), before);
        room.edit_source("x = 1").unwrap();
        assert_ne!(room.sync_guard(), before);

        let edited = room.sync_guard();
        room.reset_progress();
        assert_ne!(room.sync_guard(), edited);
    }
}
