use chrono::Utc;
use room_core::model::LearnerId;

use super::SqliteRepository;
use super::mapping::map_progress_row;
use crate::repository::{ProgressPatch, ProgressRecord, ProgressRepository, StorageError};

const SELECT_PROGRESS: &str = r"
    SELECT user_id, stage_index, bg_url, minutes_input, time_left, codes, solved, updated_at
    FROM progress
    WHERE user_id = ?1
";

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: &LearnerId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let row = sqlx::query(SELECT_PROGRESS)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn upsert_progress(
        &self,
        record: &ProgressRecord,
    ) -> Result<ProgressRecord, StorageError> {
        sqlx::query(
            r"
            INSERT INTO progress (user_id, stage_index, bg_url, minutes_input, time_left, codes, solved, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                stage_index = excluded.stage_index,
                bg_url = excluded.bg_url,
                minutes_input = excluded.minutes_input,
                time_left = excluded.time_left,
                codes = excluded.codes,
                solved = excluded.solved,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.user_id.as_str())
        .bind(i64::from(record.stage_index))
        .bind(&record.bg_url)
        .bind(i64::from(record.minutes_input))
        .bind(i64::from(record.time_left))
        .bind(&record.codes)
        .bind(&record.solved)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(record.clone())
    }

    async fn patch_progress(
        &self,
        user_id: &LearnerId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let row = sqlx::query(SELECT_PROGRESS)
            .bind(user_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .ok_or(StorageError::NotFound)?;
        let mut record = map_progress_row(&row)?;
        patch.apply_to(&mut record, Utc::now());

        sqlx::query(
            r"
            UPDATE progress
            SET stage_index = ?2, bg_url = ?3, minutes_input = ?4, time_left = ?5,
                codes = ?6, solved = ?7, updated_at = ?8
            WHERE user_id = ?1
            ",
        )
        .bind(record.user_id.as_str())
        .bind(i64::from(record.stage_index))
        .bind(&record.bg_url)
        .bind(i64::from(record.minutes_input))
        .bind(i64::from(record.time_left))
        .bind(&record.codes)
        .bind(&record.solved)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(record)
    }

    async fn delete_progress(&self, user_id: &LearnerId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM progress WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
