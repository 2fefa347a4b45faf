mod progress;
mod runner;
mod service;
mod view;

pub use crate::error::SessionError;
pub use progress::RoomProgress;
pub use runner::run_current;
pub use service::{PendingRun, RoomSession, SharedSession, SyncGuard};
pub use view::StageView;
