use room_core::model::{Hotspot, Oracle, SessionState, StageDescriptor, StageKey, StageKind};

/// Presentation-agnostic snapshot of the stage the learner is on.
///
/// Hotspots are listed for interaction stages only; the winning one is not marked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageView {
    pub index: usize,
    pub total: usize,
    pub key: StageKey,
    pub kind: StageKind,
    pub title: String,
    pub prompt: String,
    pub source: Option<String>,
    pub hotspots: Vec<Hotspot>,
    pub solved: bool,
    pub read_only: bool,
}

impl StageView {
    #[must_use]
    pub fn build(
        index: usize,
        total: usize,
        stage: &StageDescriptor,
        state: &SessionState,
    ) -> Self {
        let hotspots = match stage.oracle() {
            Oracle::Hotspot { hotspots, .. } => hotspots.clone(),
            _ => Vec::new(),
        };
        Self {
            index,
            total,
            key: stage.key().clone(),
            kind: stage.kind(),
            title: stage.title().to_string(),
            prompt: stage.prompt().to_string(),
            source: state.source(stage.key()).map(str::to_string),
            hotspots,
            solved: state.is_solved(stage.key()),
            read_only: state.is_locked(),
        }
    }
}
