use room_core::model::LearnerId;
use sqlx::Row;

use crate::repository::{ProgressRecord, StorageError, ser};

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn learner_id_from_text(raw: &str) -> Result<LearnerId, StorageError> {
    LearnerId::parse(raw).map_err(|err| StorageError::Corrupt(format!("{err}: {raw:?}")))
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ProgressRecord, StorageError> {
    let user_id: String = row.try_get("user_id").map_err(ser)?;
    Ok(ProgressRecord {
        user_id: learner_id_from_text(&user_id)?,
        stage_index: u32_from_i64("stage_index", row.try_get("stage_index").map_err(ser)?)?,
        bg_url: row.try_get("bg_url").map_err(ser)?,
        minutes_input: u32_from_i64("minutes_input", row.try_get("minutes_input").map_err(ser)?)?,
        time_left: u32_from_i64("time_left", row.try_get("time_left").map_err(ser)?)?,
        codes: row.try_get("codes").map_err(ser)?,
        solved: row.try_get("solved").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
