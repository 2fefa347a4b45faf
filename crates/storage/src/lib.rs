#![forbid(unsafe_code)]

pub mod http;
pub mod repository;
pub mod sqlite;

pub use http::{HttpProgressConfig, HttpProgressRepository};
pub use repository::{
    IdentityRepository, InMemoryRepository, ProgressPatch, ProgressRecord, ProgressRepository,
    Storage, StorageError,
};
pub use sqlite::{SqliteInitError, SqliteRepository};
