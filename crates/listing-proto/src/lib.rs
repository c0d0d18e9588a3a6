//! Wire frames exchanged with the console's `ws/objectManager` endpoint.
//! Kept separate from the client engine so test servers and tools can speak
//! the protocol without pulling in the runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub type RequestId = u64;

/// Session is no longer valid; the host must re-authenticate.
pub const CODE_SESSION_EXPIRED: i64 = 401;
/// Listing the requested path is not allowed for this session.
pub const CODE_FORBIDDEN: i64 = 403;

pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";
pub const DEFAULT_ERROR_DETAIL: &str =
    "An unknown error occurred. Please refer to Console logs to get more information.";

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame decoding failed: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    Objects,
    Rewind,
    Cancel,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub prefix: String,
    pub mode: ListMode,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<OffsetDateTime>,
    pub request_id: RequestId,
}

impl ListRequest {
    /// Live or point-in-time listing of `prefix` in `bucket_name`.
    pub fn listing(
        bucket_name: impl Into<String>,
        prefix: impl Into<String>,
        rewind: bool,
        date: OffsetDateTime,
        request_id: RequestId,
    ) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            prefix: prefix.into(),
            mode: if rewind {
                ListMode::Rewind
            } else {
                ListMode::Objects
            },
            date: Some(date),
            request_id,
        }
    }

    /// Asks the server to stop streaming frames for `request_id`.
    pub fn cancel(request_id: RequestId) -> Self {
        Self {
            bucket_name: String::new(),
            prefix: String::new(),
            mode: ListMode::Cancel,
            date: None,
            request_id,
        }
    }
}

/// One row of a listing. Prefixes ("folders") end in `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub delete_flag: bool,
}

impl ObjectEntry {
    /// Synthetic entry with only a name, as produced by the permission fallback.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_prefix(&self) -> bool {
        self.name.ends_with('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryPayload {
    Batch(Vec<ObjectEntry>),
    Single(ObjectEntry),
}

impl EntryPayload {
    pub fn into_entries(self) -> Vec<ObjectEntry> {
        match self {
            EntryPayload::Batch(entries) => entries,
            EntryPayload::Single(entry) => vec![entry],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "detailedMessage")]
    pub detailed_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameError {
    #[serde(rename = "Code")]
    pub code: i64,
    #[serde(default, rename = "APIError")]
    pub api_error: ApiErrorMessage,
}

impl FrameError {
    pub fn is_session_expired(&self) -> bool {
        self.code == CODE_SESSION_EXPIRED
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == CODE_FORBIDDEN
    }

    /// Message and detail with the console's generic fallbacks for blanks.
    pub fn messages(&self) -> (String, String) {
        let message = if self.api_error.message.is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            self.api_error.message.clone()
        };
        let detail = if self.api_error.detailed_message.is_empty() {
            DEFAULT_ERROR_DETAIL.to_string()
        } else {
            self.api_error.detailed_message.clone()
        };
        (message, detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(default)]
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EntryPayload>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_end: bool,
    #[serde(default, rename = "bucketName", skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FrameError>,
}

impl ResponseFrame {
    pub fn batch(request_id: RequestId, entries: Vec<ObjectEntry>) -> Self {
        Self {
            request_id,
            data: Some(EntryPayload::Batch(entries)),
            ..Self::default()
        }
    }

    pub fn end(request_id: RequestId) -> Self {
        Self {
            request_id,
            request_end: true,
            ..Self::default()
        }
    }

    pub fn error(request_id: RequestId, code: i64, message: &str, detailed_message: &str) -> Self {
        Self {
            request_id,
            error: Some(FrameError {
                code,
                api_error: ApiErrorMessage {
                    message: message.to_string(),
                    detailed_message: detailed_message.to_string(),
                },
            }),
            ..Self::default()
        }
    }
}

/// Allow-list entry from the session endpoint (`allowResources`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResource {
    #[serde(default)]
    pub resource: String,
    #[serde(default, rename = "conditionOperator", skip_serializing_if = "Option::is_none")]
    pub condition_operator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,
}

impl PermissionResource {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }
}

pub fn encode_request(request: &ListRequest) -> Result<String, ProtoError> {
    serde_json::to_string(request).map_err(ProtoError::Encode)
}

pub fn decode_request(text: &str) -> Result<ListRequest, ProtoError> {
    serde_json::from_str(text).map_err(ProtoError::Decode)
}

pub fn encode_frame(frame: &ResponseFrame) -> Result<String, ProtoError> {
    serde_json::to_string(frame).map_err(ProtoError::Encode)
}

pub fn decode_frame(text: &str) -> Result<ResponseFrame, ProtoError> {
    serde_json::from_str(text).map_err(ProtoError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn listing_request_uses_console_field_names() {
        let request = ListRequest::listing(
            "photos",
            "2024/",
            false,
            datetime!(2024-05-01 12:00:00 UTC),
            7,
        );
        let value: serde_json::Value =
            serde_json::from_str(&encode_request(&request).expect("encode")).expect("json");
        assert_eq!(value["bucket_name"], "photos");
        assert_eq!(value["prefix"], "2024/");
        assert_eq!(value["mode"], "objects");
        assert_eq!(value["date"], "2024-05-01T12:00:00Z");
        assert_eq!(value["request_id"], 7);
    }

    #[test]
    fn cancel_request_omits_date() {
        let value: serde_json::Value =
            serde_json::from_str(&encode_request(&ListRequest::cancel(3)).expect("encode"))
                .expect("json");
        assert_eq!(value["mode"], "cancel");
        assert_eq!(value["request_id"], 3);
        assert!(value.get("date").is_none());
    }

    #[test]
    fn decodes_batch_and_single_payloads() {
        let batch = decode_frame(
            r#"{"request_id":2,"data":[{"name":"a.txt","size":3},{"name":"dir/"}]}"#,
        )
        .expect("batch");
        let entries = batch.data.expect("data").into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].size, 3);
        assert!(entries[1].is_prefix());

        let single = decode_frame(r#"{"request_id":2,"data":{"name":"b.txt"}}"#).expect("single");
        assert_eq!(
            single.data.expect("data").into_entries(),
            vec![ObjectEntry::named("b.txt")]
        );
        assert!(!single.request_end);
    }

    #[test]
    fn decodes_permission_error_frame() {
        let frame = decode_frame(
            r#"{"request_id":5,"error":{"Code":403,"APIError":{"message":"Access Denied.","detailedMessage":"denied"}},"bucketName":"public","prefix":"docs/"}"#,
        )
        .expect("frame");
        let error = frame.error.expect("error");
        assert!(error.is_forbidden());
        assert_eq!(error.api_error.message, "Access Denied.");
        assert_eq!(frame.bucket_name.as_deref(), Some("public"));
        assert_eq!(frame.prefix.as_deref(), Some("docs/"));
    }

    #[test]
    fn blank_error_messages_fall_back_to_defaults() {
        let frame = decode_frame(r#"{"request_id":1,"error":{"Code":500}}"#).expect("frame");
        let (message, detail) = frame.error.expect("error").messages();
        assert_eq!(message, DEFAULT_ERROR_MESSAGE);
        assert_eq!(detail, DEFAULT_ERROR_DETAIL);
    }

    #[test]
    fn rejects_non_json_frames() {
        assert!(matches!(decode_frame("not json"), Err(ProtoError::Decode(_))));
    }
}
