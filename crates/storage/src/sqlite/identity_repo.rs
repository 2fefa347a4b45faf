use chrono::Utc;
use room_core::model::LearnerId;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::learner_id_from_text;
use crate::repository::{IdentityRepository, StorageError, ser};

#[async_trait::async_trait]
impl IdentityRepository for SqliteRepository {
    async fn load_identity(&self) -> Result<Option<LearnerId>, StorageError> {
        let row = sqlx::query("SELECT learner_id FROM learner_identity WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("learner_id").map_err(ser)?;
        learner_id_from_text(&raw).map(Some)
    }

    async fn save_identity(&self, id: &LearnerId) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO learner_identity (id, learner_id, created_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET learner_id = excluded.learner_id
            ",
        )
        .bind(id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}
