//! Remote progress service speaking the `/api/progress` REST shape.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use room_core::model::LearnerId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::repository::{ProgressPatch, ProgressRecord, ProgressRepository, StorageError};

#[derive(Clone, Debug)]
pub struct HttpProgressConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpProgressConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Reads `ESCAPE_PROGRESS_URL`; `None` when unset or blank.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("ESCAPE_PROGRESS_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self::new(base_url.trim()))
    }

    fn endpoint(&self) -> String {
        format!("{}/api/progress", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Clone)]
pub struct HttpProgressRepository {
    client: Client,
    config: HttpProgressConfig,
}

impl HttpProgressRepository {
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the HTTP client cannot be built.
    pub fn new(config: HttpProgressConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder) -> Result<Response, StorageError> {
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        debug!(status = %response.status(), url = %response.url(), "progress service replied");
        Ok(response)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, StorageError> {
        check_status(self.dispatch(request).await?)
    }

    /// Send a write aimed at an existing record.
    ///
    /// The service answers writes to a missing record with a server error, so a failed write
    /// is followed by a read; an empty read turns the failure into `NotFound`.
    async fn send_write(
        &self,
        user_id: &LearnerId,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, StorageError> {
        let response = self.dispatch(request).await?;
        if response.status().is_server_error()
            && matches!(self.get_progress(user_id).await, Ok(None))
        {
            debug!(status = %response.status(), "write failed against a missing record");
            return Err(StorageError::NotFound);
        }
        check_status(response)
    }
}

fn check_status(response: Response) -> Result<Response, StorageError> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(StorageError::NotFound),
        status if status.is_success() => Ok(response),
        status => Err(StorageError::Connection(format!(
            "progress service returned {status}"
        ))),
    }
}

#[async_trait]
impl ProgressRepository for HttpProgressRepository {
    async fn get_progress(
        &self,
        user_id: &LearnerId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let request = self
            .client
            .get(self.config.endpoint())
            .query(&[("userId", user_id.as_str())]);
        let body: Option<WireRecord> = match self.send(request).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            Err(StorageError::NotFound) => None,
            Err(err) => return Err(err),
        };
        body.map(WireRecord::into_record).transpose()
    }

    async fn upsert_progress(
        &self,
        record: &ProgressRecord,
    ) -> Result<ProgressRecord, StorageError> {
        let request = self
            .client
            .post(self.config.endpoint())
            .json(&WireRecord::from_record(record));
        let stored: WireRecord = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        stored.into_record()
    }

    async fn patch_progress(
        &self,
        user_id: &LearnerId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError> {
        let request = self
            .client
            .put(self.config.endpoint())
            .json(&WirePatch::new(user_id, patch));
        let stored: WireRecord = self
            .send_write(user_id, request)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        stored.into_record()
    }

    async fn delete_progress(&self, user_id: &LearnerId) -> Result<(), StorageError> {
        let request = self
            .client
            .delete(self.config.endpoint())
            .json(&WireIdentity {
                user_id: user_id.as_str(),
            });
        self.send_write(user_id, request).await?;
        Ok(())
    }
}

//
// ─── WIRE SHAPES ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    user_id: String,
    stage_index: u32,
    bg_url: String,
    minutes_input: u32,
    time_left: u32,
    codes: String,
    solved: String,
    #[serde(default, skip_serializing)]
    updated_at: Option<DateTime<Utc>>,
}

impl WireRecord {
    fn from_record(record: &ProgressRecord) -> Self {
        Self {
            user_id: record.user_id.as_str().to_string(),
            stage_index: record.stage_index,
            bg_url: record.bg_url.clone(),
            minutes_input: record.minutes_input,
            time_left: record.time_left,
            codes: record.codes.clone(),
            solved: record.solved.clone(),
            updated_at: None,
        }
    }

    fn into_record(self) -> Result<ProgressRecord, StorageError> {
        let user_id = LearnerId::parse(&self.user_id)
            .map_err(|err| StorageError::Corrupt(format!("{err}: {:?}", self.user_id)))?;
        Ok(ProgressRecord {
            user_id,
            stage_index: self.stage_index,
            bg_url: self.bg_url,
            minutes_input: self.minutes_input,
            time_left: self.time_left,
            codes: self.codes,
            solved: self.solved,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePatch<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bg_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minutes_input: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_left: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    codes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    solved: Option<&'a str>,
}

impl<'a> WirePatch<'a> {
    fn new(user_id: &'a LearnerId, patch: &'a ProgressPatch) -> Self {
        Self {
            user_id: user_id.as_str(),
            stage_index: patch.stage_index,
            bg_url: patch.bg_url.as_deref(),
            minutes_input: patch.minutes_input,
            time_left: patch.time_left,
            codes: patch.codes.as_deref(),
            solved: patch.solved.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireIdentity<'a> {
    user_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_core::time::frozen_instant;

    fn record() -> ProgressRecord {
        ProgressRecord {
            user_id: LearnerId::parse("learner-9").unwrap(),
            stage_index: 1,
            bg_url: "/bg/cell.png".into(),
            minutes_input: 10,
            time_left: 599,
            codes: r#"{"format":"x"}"#.into(),
            solved: r#"{"format":false}"#.into(),
            updated_at: frozen_instant(),
        }
    }

    #[test]
    fn record_uses_service_field_names() {
        let json = serde_json::to_value(WireRecord::from_record(&record())).unwrap();
        assert_eq!(json["userId"], "learner-9");
        assert_eq!(json["stageIndex"], 1);
        assert_eq!(json["bgUrl"], "/bg/cell.png");
        assert_eq!(json["minutesInput"], 10);
        assert_eq!(json["timeLeft"], 599);
        assert_eq!(json["codes"], r#"{"format":"x"}"#);
        assert!(json.get("updatedAt").is_none());
    }

    #[test]
    fn patch_only_sends_present_fields() {
        let id = LearnerId::parse("learner-9").unwrap();
        let patch = ProgressPatch {
            time_left: Some(42),
            ..ProgressPatch::default()
        };
        let json = serde_json::to_value(WirePatch::new(&id, &patch)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "userId": "learner-9", "timeLeft": 42 })
        );
    }

    #[test]
    fn service_rows_with_extra_columns_parse() {
        let body = r#"{
            "id": 7,
            "userId": "learner-9",
            "stageIndex": 3,
            "bgUrl": "",
            "minutesInput": 5,
            "timeLeft": 0,
            "codes": "{}",
            "solved": "{}",
            "updatedAt": "2023-11-14T22:13:20Z"
        }"#;
        let wire: WireRecord = serde_json::from_str(body).unwrap();
        let parsed = wire.into_record().unwrap();
        assert_eq!(parsed.stage_index, 3);
        assert_eq!(parsed.updated_at, frozen_instant());
    }

    #[test]
    fn blank_user_ids_from_the_service_are_corrupt() {
        let mut wire = WireRecord::from_record(&record());
        wire.user_id = "  ".into();
        assert!(matches!(wire.into_record(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        assert_eq!(
            HttpProgressConfig::new("http://localhost:3000/").endpoint(),
            "http://localhost:3000/api/progress"
        );
    }
}
