use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::ids::{LearnerId, StageKey};
use crate::model::stage::{StageCatalog, StageDescriptor, StageError};
use crate::timer::{TickOutcome, TimerError, TimerState};

/// Background shown before the learner picks one.
pub const DEFAULT_BACKGROUND: &str = "backgrounds/cellar.jpg";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("time is up: the room stays locked until the timer is reset")]
    Locked,

    #[error("stage index {index} is out of range (0..{len})")]
    StageOutOfRange { index: usize, len: usize },

    #[error("stage {key} does not take program text")]
    NotCodeStage { key: StageKey },

    #[error("session has no learner identity")]
    MissingIdentity,

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// Mutable state of one learner's run through the room.
///
/// `solved_by_stage` always holds exactly one entry per catalog stage and
/// `source_by_stage` one entry per code stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    identity: Option<LearnerId>,
    current_stage_index: usize,
    source_by_stage: BTreeMap<StageKey, String>,
    solved_by_stage: BTreeMap<StageKey, bool>,
    background_reference: String,
    timer: TimerState,
    epoch: u64,
}

impl SessionState {
    /// Fresh session at stage 0 with starter texts and nothing solved.
    #[must_use]
    pub fn new(identity: Option<LearnerId>, catalog: &StageCatalog, timer: TimerState) -> Self {
        Self {
            identity,
            current_stage_index: 0,
            source_by_stage: starter_sources(catalog),
            solved_by_stage: unsolved(catalog),
            background_reference: DEFAULT_BACKGROUND.to_string(),
            timer,
            epoch: 0,
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<&LearnerId> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn current_stage_index(&self) -> usize {
        self.current_stage_index
    }

    #[must_use]
    pub fn current_stage<'a>(&self, catalog: &'a StageCatalog) -> Option<&'a StageDescriptor> {
        catalog.get(self.current_stage_index)
    }

    #[must_use]
    pub fn background_reference(&self) -> &str {
        &self.background_reference
    }

    pub fn set_background_reference(&mut self, reference: impl Into<String>) {
        self.background_reference = reference.into();
    }

    #[must_use]
    pub fn timer(&self) -> &TimerState {
        &self.timer
    }

    /// Bumped by every reset; lets late sync responses detect they are stale.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.timer.is_locked()
    }

    #[must_use]
    pub fn source(&self, key: &StageKey) -> Option<&str> {
        self.source_by_stage.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn sources(&self) -> &BTreeMap<StageKey, String> {
        &self.source_by_stage
    }

    #[must_use]
    pub fn solved(&self) -> &BTreeMap<StageKey, bool> {
        &self.solved_by_stage
    }

    #[must_use]
    pub fn is_solved(&self, key: &StageKey) -> bool {
        self.solved_by_stage.get(key).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn solved_count(&self) -> usize {
        self.solved_by_stage.values().filter(|solved| **solved).count()
    }

    /// Every stage solved: the learner escaped.
    #[must_use]
    pub fn all_solved(&self) -> bool {
        self.solved_by_stage.values().all(|solved| *solved)
    }

    /// Move to another stage.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Locked` after expiry and `StageOutOfRange` for a bad index.
    pub fn go_to(&mut self, index: usize, catalog: &StageCatalog) -> Result<(), SessionStateError> {
        if self.is_locked() {
            return Err(SessionStateError::Locked);
        }
        if index >= catalog.len() {
            return Err(SessionStateError::StageOutOfRange {
                index,
                len: catalog.len(),
            });
        }
        self.current_stage_index = index;
        Ok(())
    }

    /// Replace the program text of a code stage.
    ///
    /// # Errors
    ///
    /// Returns `Locked` after expiry, `Stage` for unknown keys and `NotCodeStage`
    /// for interaction stages.
    pub fn set_source(
        &mut self,
        key: &StageKey,
        text: impl Into<String>,
        catalog: &StageCatalog,
    ) -> Result<(), SessionStateError> {
        if self.is_locked() {
            return Err(SessionStateError::Locked);
        }
        let stage = catalog.by_key(key)?;
        if !stage.is_code() {
            return Err(SessionStateError::NotCodeStage { key: key.clone() });
        }
        self.source_by_stage.insert(key.clone(), text.into());
        Ok(())
    }

    /// Record a passing verdict. Solved flags never go back to false here.
    ///
    /// Returns true when the stage was not solved before.
    pub fn mark_solved(&mut self, key: &StageKey) -> bool {
        match self.solved_by_stage.get_mut(key) {
            Some(solved) if !*solved => {
                *solved = true;
                true
            }
            _ => false,
        }
    }

    pub fn start_timer(&mut self) -> bool {
        self.timer.start()
    }

    pub fn pause_timer(&mut self) -> bool {
        self.timer.pause()
    }

    pub fn tick_timer(&mut self) -> TickOutcome {
        self.timer.tick()
    }

    pub fn reset_timer(&mut self) {
        self.timer.reset();
        self.epoch += 1;
    }

    /// # Errors
    ///
    /// Returns `TimerError` unless the timer is idle and `minutes` is positive.
    pub fn set_configured_minutes(&mut self, minutes: u32) -> Result<(), TimerError> {
        self.timer.set_configured_minutes(minutes)
    }

    /// Explicit full reset: starters back, nothing solved, first stage, idle timer.
    pub fn reset_progress(&mut self, catalog: &StageCatalog) {
        self.current_stage_index = 0;
        self.source_by_stage = starter_sources(catalog);
        self.solved_by_stage = unsolved(catalog);
        self.timer.reset();
        self.epoch += 1;
    }

    pub(crate) fn replace_progress(
        &mut self,
        index: usize,
        background: String,
        sources: BTreeMap<StageKey, String>,
        solved: BTreeMap<StageKey, bool>,
    ) {
        self.current_stage_index = index;
        self.background_reference = background;
        self.source_by_stage = sources;
        self.solved_by_stage = solved;
    }

    pub(crate) fn timer_mut(&mut self) -> &mut TimerState {
        &mut self.timer
    }
}

pub(crate) fn starter_sources(catalog: &StageCatalog) -> BTreeMap<StageKey, String> {
    catalog
        .iter()
        .filter(|stage| stage.is_code())
        .map(|stage| {
            (
                stage.key().clone(),
                stage.starter_text().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn unsolved(catalog: &StageCatalog) -> BTreeMap<StageKey, bool> {
    catalog
        .iter()
        .map(|stage| (stage.key().clone(), false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (SessionState, StageCatalog) {
        let catalog = StageCatalog::standard();
        let state = SessionState::new(
            Some(LearnerId::generate()),
            &catalog,
            TimerState::new(1).unwrap(),
        );
        (state, catalog)
    }

    fn expire(state: &mut SessionState) {
        state.start_timer();
        while state.tick_timer() != TickOutcome::Expired {}
    }

    #[test]
    fn new_session_has_one_entry_per_stage() {
        let (state, catalog) = session();
        assert_eq!(state.solved().len(), catalog.len());
        assert_eq!(state.sources().len(), 3);
        assert_eq!(state.solved_count(), 0);
        assert!(!state.all_solved());
        assert!(state.source(&"format".into()).unwrap().contains("function add"));
    }

    #[test]
    fn solved_flags_are_monotonic() {
        let (mut state, _) = session();
        let key = StageKey::new("format");
        assert!(state.mark_solved(&key));
        assert!(!state.mark_solved(&key));
        assert!(state.is_solved(&key));
        assert!(!state.mark_solved(&StageKey::new("missing")));
        assert_eq!(state.solved().len(), 4);
    }

    #[test]
    fn all_solved_means_escaped() {
        let (mut state, catalog) = session();
        for stage in catalog.iter() {
            state.mark_solved(stage.key());
        }
        assert!(state.all_solved());
    }

    #[test]
    fn navigation_checks_bounds() {
        let (mut state, catalog) = session();
        state.go_to(3, &catalog).unwrap();
        assert_eq!(state.current_stage(&catalog).unwrap().key().as_str(), "escape");
        assert_eq!(
            state.go_to(4, &catalog),
            Err(SessionStateError::StageOutOfRange { index: 4, len: 4 })
        );
    }

    #[test]
    fn interaction_stage_has_no_source() {
        let (mut state, catalog) = session();
        let err = state.set_source(&"escape".into(), "x", &catalog).unwrap_err();
        assert!(matches!(err, SessionStateError::NotCodeStage { .. }));
        let err = state.set_source(&"nope".into(), "x", &catalog).unwrap_err();
        assert!(matches!(err, SessionStateError::Stage(_)));
    }

    #[test]
    fn expiry_locks_navigation_and_edits() {
        let (mut state, catalog) = session();
        expire(&mut state);
        assert!(state.is_locked());
        assert_eq!(state.go_to(1, &catalog), Err(SessionStateError::Locked));
        assert_eq!(
            state.set_source(&"format".into(), "x", &catalog),
            Err(SessionStateError::Locked)
        );

        let epoch = state.epoch();
        state.reset_timer();
        assert!(!state.is_locked());
        assert_eq!(state.epoch(), epoch + 1);
        state.go_to(1, &catalog).unwrap();
    }

    #[test]
    fn reset_progress_restores_starters() {
        let (mut state, catalog) = session();
        let key = StageKey::new("format");
        state.set_source(&key, "function add(a, b) return a + b end", &catalog).unwrap();
        state.mark_solved(&key);
        state.go_to(2, &catalog).unwrap();
        state.start_timer();

        state.reset_progress(&catalog);

        assert_eq!(state.current_stage_index(), 0);
        assert!(!state.is_solved(&key));
        assert_eq!(state.source(&key), catalog.get(0).unwrap().starter_text());
        assert!(!state.timer().is_running());
        assert_eq!(state.epoch(), 1);
    }
}
