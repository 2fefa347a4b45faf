use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LearnerId, StageKey};
use crate::model::session::{SessionState, SessionStateError, starter_sources};
use crate::model::stage::StageCatalog;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("saved stage index {index} is out of range (0..{len})")]
    StageIndexOutOfRange { index: u32, len: usize },

    #[error("saved timer minutes must be > 0")]
    InvalidMinutes,
}

/// Persisted projection of a `SessionState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub identity: LearnerId,
    pub current_stage_index: u32,
    pub background_reference: String,
    pub configured_minutes: u32,
    pub remaining_seconds: u32,
    pub source_by_stage: BTreeMap<StageKey, String>,
    pub solved_by_stage: BTreeMap<StageKey, bool>,
}

/// What a successful restore did to the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// The countdown was running, so its remaining time was kept.
    pub timer_preserved: bool,
}

impl SessionState {
    /// Capture the persisted projection of this session.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::MissingIdentity` for guest sessions.
    pub fn snapshot(&self) -> Result<Snapshot, SessionStateError> {
        let identity = self
            .identity()
            .cloned()
            .ok_or(SessionStateError::MissingIdentity)?;
        Ok(Snapshot {
            identity,
            current_stage_index: u32::try_from(self.current_stage_index()).unwrap_or(u32::MAX),
            background_reference: self.background_reference().to_string(),
            configured_minutes: self.timer().configured_minutes(),
            remaining_seconds: self.timer().remaining_seconds(),
            source_by_stage: self.sources().clone(),
            solved_by_stage: self.solved().clone(),
        })
    }

    /// Replace progress with a loaded snapshot.
    ///
    /// The snapshot is validated before anything changes. Keys the catalog does not know
    /// are dropped; stages missing from the snapshot fall back to starter text / unsolved.
    /// A running countdown keeps its remaining time.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` (leaving the session untouched) when the snapshot does not
    /// fit the catalog.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        catalog: &StageCatalog,
    ) -> Result<RestoreOutcome, SnapshotError> {
        let index = usize::try_from(snapshot.current_stage_index)
            .ok()
            .filter(|index| *index < catalog.len())
            .ok_or(SnapshotError::StageIndexOutOfRange {
                index: snapshot.current_stage_index,
                len: catalog.len(),
            })?;
        if snapshot.configured_minutes == 0 {
            return Err(SnapshotError::InvalidMinutes);
        }

        let mut sources = starter_sources(catalog);
        for (key, text) in &mut sources {
            if let Some(saved) = snapshot.source_by_stage.get(key) {
                text.clone_from(saved);
            }
        }
        let solved = catalog
            .iter()
            .map(|stage| {
                let key = stage.key().clone();
                let flag = snapshot.solved_by_stage.get(&key).copied().unwrap_or(false);
                (key, flag)
            })
            .collect();

        self.replace_progress(
            index,
            snapshot.background_reference.clone(),
            sources,
            solved,
        );
        let replaced = self
            .timer_mut()
            .restore(snapshot.configured_minutes, snapshot.remaining_seconds);
        Ok(RestoreOutcome {
            timer_preserved: !replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerPhase, TimerState};

    fn fresh() -> (SessionState, StageCatalog) {
        let catalog = StageCatalog::standard();
        let state = SessionState::new(
            Some(LearnerId::parse("learner-1").unwrap()),
            &catalog,
            TimerState::new(1).unwrap(),
        );
        (state, catalog)
    }

    #[test]
    fn snapshot_round_trips_progress() {
        let (mut state, catalog) = fresh();
        state
            .set_source(&"format".into(), "function add(a, b) return a + b end", &catalog)
            .unwrap();
        state.mark_solved(&"format".into());
        state.go_to(1, &catalog).unwrap();
        let saved = state.snapshot().unwrap();

        let (mut other, _) = fresh();
        let outcome = other.apply_snapshot(&saved, &catalog).unwrap();

        assert!(!outcome.timer_preserved);
        assert_eq!(other.current_stage_index(), 1);
        assert_eq!(other.sources(), state.sources());
        assert_eq!(other.solved(), state.solved());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let (state, _) = fresh();
        let json = serde_json::to_value(state.snapshot().unwrap()).unwrap();
        assert_eq!(json["identity"], "learner-1");
        assert_eq!(json["currentStageIndex"], 0);
        assert_eq!(json["configuredMinutes"], 1);
        assert_eq!(json["solvedByStage"]["escape"], false);
    }

    #[test]
    fn guest_session_has_no_snapshot() {
        let catalog = StageCatalog::standard();
        let state = SessionState::new(None, &catalog, TimerState::default());
        assert_eq!(state.snapshot(), Err(SessionStateError::MissingIdentity));
    }

    #[test]
    fn out_of_range_index_leaves_state_untouched() {
        let (mut state, catalog) = fresh();
        let mut saved = state.snapshot().unwrap();
        saved.current_stage_index = 9;
        saved.solved_by_stage.insert("format".into(), true);
        let before = state.clone();

        let err = state.apply_snapshot(&saved, &catalog).unwrap_err();

        assert_eq!(err, SnapshotError::StageIndexOutOfRange { index: 9, len: 4 });
        assert_eq!(state, before);
    }

    #[test]
    fn zero_minutes_rejected() {
        let (mut state, catalog) = fresh();
        let mut saved = state.snapshot().unwrap();
        saved.configured_minutes = 0;
        assert_eq!(
            state.apply_snapshot(&saved, &catalog),
            Err(SnapshotError::InvalidMinutes)
        );
    }

    #[test]
    fn running_timer_keeps_remaining_time() {
        let (mut state, catalog) = fresh();
        let mut saved = state.snapshot().unwrap();
        saved.remaining_seconds = 5;
        saved.configured_minutes = 3;
        state.start_timer();
        state.tick_timer();

        let outcome = state.apply_snapshot(&saved, &catalog).unwrap();

        assert!(outcome.timer_preserved);
        assert_eq!(state.timer().remaining_seconds(), 59);
        assert_eq!(state.timer().configured_minutes(), 3);
    }

    #[test]
    fn restored_time_leaves_timer_paused() {
        let (mut state, catalog) = fresh();
        let mut saved = state.snapshot().unwrap();
        saved.remaining_seconds = 42;

        state.apply_snapshot(&saved, &catalog).unwrap();

        assert_eq!(state.timer().phase(), TimerPhase::Paused);
        assert!(state.start_timer());
        assert_eq!(state.timer().remaining_seconds(), 42);
    }

    #[test]
    fn unknown_keys_dropped_and_missing_keys_defaulted() {
        let (mut state, catalog) = fresh();
        let mut saved = state.snapshot().unwrap();
        saved.solved_by_stage.clear();
        saved.solved_by_stage.insert("ghost".into(), true);
        saved.source_by_stage.remove(&StageKey::new("transform"));
        saved.source_by_stage.insert("escape".into(), "nope".into());

        state.apply_snapshot(&saved, &catalog).unwrap();

        assert_eq!(state.solved().len(), catalog.len());
        assert!(!state.solved().contains_key(&StageKey::new("ghost")));
        assert_eq!(state.source(&"escape".into()), None);
        assert_eq!(
            state.source(&"transform".into()),
            catalog.get(2).unwrap().starter_text()
        );
    }
}
