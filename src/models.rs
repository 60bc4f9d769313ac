use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_DURATION: &str = "5s";

/// Queue status reported by the provider. Anything outside the documented
/// set lands in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: QueueStatus,
    #[serde(default)]
    pub logs: Option<Vec<LogEntry>>,
    pub request_id: String,
    #[serde(default)]
    pub queue_position: Option<u32>,
}

impl StatusResponse {
    /// Most recent log message, if the provider sent any.
    pub fn latest_log(&self) -> Option<&str> {
        self.logs
            .as_ref()
            .and_then(|logs| logs.last())
            .map(|entry| entry.message.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub request_id: String,
}

/// Input for one image-to-video job. Built once per submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub prompt: String,
    pub image_url: String,
    pub aspect_ratio: String,
    pub duration: String,
}

/// Finalized job output as served by the result endpoint:
/// `{"data": <provider payload>, "requestId": "<id>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResult {
    pub data: Value,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl QueueResult {
    pub fn video_url(&self) -> Option<&str> {
        self.data.pointer("/video/url").and_then(Value::as_str)
    }
}

/// An image selected for upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}
