use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use room_core::model::{LearnerId, Snapshot, StageKey};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persisted shape for a learner's saved progress.
///
/// `codes` and `solved` hold JSON object text (stage key to source / solved flag) so every
/// backend stores them the same way the remote service does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub user_id: LearnerId,
    pub stage_index: u32,
    pub bg_url: String,
    pub minutes_input: u32,
    pub time_left: u32,
    pub codes: String,
    pub solved: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Build the persisted shape of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the maps cannot be encoded.
    pub fn from_snapshot(snapshot: &Snapshot, now: DateTime<Utc>) -> Result<Self, StorageError> {
        Ok(Self {
            user_id: snapshot.identity.clone(),
            stage_index: snapshot.current_stage_index,
            bg_url: snapshot.background_reference.clone(),
            minutes_input: snapshot.configured_minutes,
            time_left: snapshot.remaining_seconds,
            codes: serde_json::to_string(&snapshot.source_by_stage).map_err(ser)?,
            solved: serde_json::to_string(&snapshot.solved_by_stage).map_err(ser)?,
            updated_at: now,
        })
    }

    /// Parse the record back into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if `codes` or `solved` is not the expected JSON object.
    pub fn into_snapshot(self) -> Result<Snapshot, StorageError> {
        let source_by_stage: BTreeMap<StageKey, String> = serde_json::from_str(&self.codes)
            .map_err(|err| StorageError::Corrupt(format!("codes: {err}")))?;
        let solved_by_stage: BTreeMap<StageKey, bool> = serde_json::from_str(&self.solved)
            .map_err(|err| StorageError::Corrupt(format!("solved: {err}")))?;
        Ok(Snapshot {
            identity: self.user_id,
            current_stage_index: self.stage_index,
            background_reference: self.bg_url,
            configured_minutes: self.minutes_input,
            remaining_seconds: self.time_left,
            source_by_stage,
            solved_by_stage,
        })
    }
}

/// Partial update of a stored record; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressPatch {
    pub stage_index: Option<u32>,
    pub bg_url: Option<String>,
    pub minutes_input: Option<u32>,
    pub time_left: Option<u32>,
    pub codes: Option<String>,
    pub solved: Option<String>,
}

impl ProgressPatch {
    /// Patch that moves the learner's position and countdown only.
    #[must_use]
    pub fn position(snapshot: &Snapshot) -> Self {
        Self {
            stage_index: Some(snapshot.current_stage_index),
            minutes_input: Some(snapshot.configured_minutes),
            time_left: Some(snapshot.remaining_seconds),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, record: &mut ProgressRecord, now: DateTime<Utc>) {
        if let Some(stage_index) = self.stage_index {
            record.stage_index = stage_index;
        }
        if let Some(bg_url) = &self.bg_url {
            record.bg_url.clone_from(bg_url);
        }
        if let Some(minutes_input) = self.minutes_input {
            record.minutes_input = minutes_input;
        }
        if let Some(time_left) = self.time_left {
            record.time_left = time_left;
        }
        if let Some(codes) = &self.codes {
            record.codes.clone_from(codes);
        }
        if let Some(solved) = &self.solved {
            record.solved.clone_from(solved);
        }
        record.updated_at = now;
    }
}

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Repository contract for saved progress, keyed by learner identity.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the record for a learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached or the row cannot be read.
    async fn get_progress(&self, user_id: &LearnerId)
    -> Result<Option<ProgressRecord>, StorageError>;

    /// Create the record, or fully replace an existing one. Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn upsert_progress(&self, record: &ProgressRecord)
    -> Result<ProgressRecord, StorageError>;

    /// Update some fields of an existing record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the learner has no record.
    async fn patch_progress(
        &self,
        user_id: &LearnerId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError>;

    /// Remove the record for a learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the learner has no record.
    async fn delete_progress(&self, user_id: &LearnerId) -> Result<(), StorageError>;
}

/// The locally persisted learner identity (one per installation).
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the stored identity cannot be read or is malformed.
    async fn load_identity(&self) -> Result<Option<LearnerId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the identity cannot be stored.
    async fn save_identity(&self, id: &LearnerId) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and offline play.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<LearnerId, ProgressRecord>>>,
    identity: Arc<Mutex<Option<LearnerId>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: &LearnerId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user_id).cloned())
    }

    async fn upsert_progress(
        &self,
        record: &ProgressRecord,
    ) -> Result<ProgressRecord, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(record.user_id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn patch_progress(
        &self,
        user_id: &LearnerId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard.get_mut(user_id).ok_or(StorageError::NotFound)?;
        patch.apply_to(record, Utc::now());
        Ok(record.clone())
    }

    async fn delete_progress(&self, user_id: &LearnerId) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .remove(user_id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl IdentityRepository for InMemoryRepository {
    async fn load_identity(&self) -> Result<Option<LearnerId>, StorageError> {
        let guard = self
            .identity
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn save_identity(&self, id: &LearnerId) -> Result<(), StorageError> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(id.clone());
        Ok(())
    }
}

/// Aggregates progress and identity repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub identity: Arc<dyn IdentityRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let identity: Arc<dyn IdentityRepository> = Arc::new(repo);
        Self { progress, identity }
    }

    /// Same storage, with progress served by another backend.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressRepository>) -> Self {
        self.progress = progress;
        self
    }
}
