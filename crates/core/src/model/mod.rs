mod ids;
mod session;
mod snapshot;
mod stage;

pub use ids::{LearnerId, MAX_LEARNER_ID_LEN, ParseIdError, StageKey};

pub use session::{DEFAULT_BACKGROUND, SessionState, SessionStateError};
pub use snapshot::{RestoreOutcome, Snapshot, SnapshotError};
pub use stage::{Hotspot, Oracle, StageCatalog, StageDescriptor, StageError, StageKind};
