#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod identity_service;
pub mod progress_sync;
pub mod room;
pub mod timer_driver;

pub use room_core::Clock;

pub use app_services::{AppServices, RoomConfig};
pub use error::{AppServicesError, SessionError, SyncError};
pub use identity_service::IdentityService;
pub use progress_sync::{ProgressSync, SyncOutcome, SyncTicket};
pub use room::{PendingRun, RoomProgress, RoomSession, SharedSession, StageView, SyncGuard};
pub use timer_driver::{TICK_INTERVAL, TimerDriver};
