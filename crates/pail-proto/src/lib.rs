//! Wire frames exchanged between `beach-pail` clients and the packaging worker.
//!
//! A client sends exactly one [`SessionRequest`] right after the websocket
//! opens, then consumes [`WorkerFrame`]s until one of them carries a terminal
//! field. A single frame may carry several fields at once;
//! [`WorkerFrame::into_updates`] flattens it into the order the client must
//! apply them in.
//!
//! Inbound fields are decoded one at a time. A known field holding the wrong
//! JSON type is reported in [`ParsedFrame::invalid`] and dropped without
//! affecting its siblings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The one outbound frame of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub url: String,
}

impl SessionRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn to_text(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }
}

/// Inbound update from the worker. Every field is optional and unknown fields
/// are tolerated so newer workers can add to the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Archive name the worker reports next to `download_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One field of a [`WorkerFrame`], ready to be applied to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameUpdate {
    Status(String),
    Progress(f64),
    ArtifactReady {
        url: String,
        filename: Option<String>,
    },
    Failed(String),
}

/// A known field whose value had the wrong JSON type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidField {
    pub name: &'static str,
    pub found: &'static str,
}

/// Result of decoding one inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub frame: WorkerFrame,
    pub invalid: Vec<InvalidField>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid utf-8: {0}")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error("frame is not valid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame must be a json object, got {0}")]
    NotAnObject(&'static str),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

impl WorkerFrame {
    pub fn parse(text: &str) -> Result<ParsedFrame, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
        Self::from_value(value)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedFrame, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(FrameError::InvalidUtf8)?;
        Self::parse(text)
    }

    fn from_value(value: Value) -> Result<ParsedFrame, FrameError> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => return Err(FrameError::NotAnObject(json_kind(&other))),
        };
        let mut invalid = Vec::new();
        let frame = WorkerFrame {
            status: take_string(&mut fields, "status", &mut invalid),
            progress: take_number(&mut fields, "progress", &mut invalid),
            download_url: take_string(&mut fields, "download_url", &mut invalid),
            filename: take_string(&mut fields, "filename", &mut invalid),
            error: take_string(&mut fields, "error", &mut invalid),
        };
        Ok(ParsedFrame { frame, invalid })
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn progress(value: f64) -> Self {
        Self {
            progress: Some(value),
            ..Self::default()
        }
    }

    pub fn ready(download_url: impl Into<String>) -> Self {
        Self {
            download_url: Some(download_url.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_progress(mut self, value: f64) -> Self {
        self.progress = Some(value);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn to_text(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Fields present in this frame, in application order: status, progress,
    /// download_url, error. Empty strings count as absent.
    pub fn into_updates(self) -> Vec<FrameUpdate> {
        let mut updates = Vec::with_capacity(2);
        if let Some(status) = non_empty(self.status) {
            updates.push(FrameUpdate::Status(status));
        }
        if let Some(progress) = self.progress {
            updates.push(FrameUpdate::Progress(progress));
        }
        if let Some(url) = non_empty(self.download_url) {
            updates.push(FrameUpdate::ArtifactReady {
                url,
                filename: non_empty(self.filename),
            });
        }
        if let Some(error) = non_empty(self.error) {
            updates.push(FrameUpdate::Failed(error));
        }
        updates
    }
}

fn take_string(
    fields: &mut Map<String, Value>,
    name: &'static str,
    invalid: &mut Vec<InvalidField>,
) -> Option<String> {
    match fields.remove(name)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => {
            invalid.push(InvalidField {
                name,
                found: json_kind(&other),
            });
            None
        }
    }
}

fn take_number(
    fields: &mut Map<String, Value>,
    name: &'static str,
    invalid: &mut Vec<InvalidField>,
) -> Option<f64> {
    match fields.remove(name)? {
        Value::Null => None,
        Value::Number(number) => number.as_f64(),
        other => {
            invalid.push(InvalidField {
                name,
                found: json_kind(&other),
            });
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates_of(text: &str) -> Vec<FrameUpdate> {
        let parsed = WorkerFrame::parse(text).expect("parse");
        assert!(parsed.invalid.is_empty(), "unexpected invalid fields: {:?}", parsed.invalid);
        parsed.frame.into_updates()
    }

    #[test]
    fn request_encodes_url_only() {
        let text = SessionRequest::new("https://open.example/playlist/42")
            .to_text()
            .expect("encode");
        assert_eq!(text, r#"{"url":"https://open.example/playlist/42"}"#);
    }

    #[test]
    fn combined_frame_yields_updates_in_fixed_order() {
        assert_eq!(
            updates_of(
                r#"{"error":"boom","download_url":"/files/x.zip","progress":40,"status":"processed: 2/5"}"#
            ),
            vec![
                FrameUpdate::Status("processed: 2/5".into()),
                FrameUpdate::Progress(40.0),
                FrameUpdate::ArtifactReady {
                    url: "/files/x.zip".into(),
                    filename: None,
                },
                FrameUpdate::Failed("boom".into()),
            ]
        );
    }

    #[test]
    fn ready_frame_carries_filename() {
        let updates = updates_of(
            r#"{"status":"READY","download_url":"http://localhost:8000/download_once/mix_1.zip","filename":"mix_1.zip"}"#,
        );
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[1],
            FrameUpdate::ArtifactReady {
                url: "http://localhost:8000/download_once/mix_1.zip".into(),
                filename: Some("mix_1.zip".into()),
            }
        );
    }

    #[test]
    fn empty_and_null_fields_are_absent() {
        assert!(
            updates_of(r#"{"status":"","progress":null,"download_url":"","error":null}"#)
                .is_empty()
        );
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        assert_eq!(
            updates_of(r#"{"status":"analyzing link...","eta_secs":12}"#),
            vec![FrameUpdate::Status("analyzing link...".into())]
        );
    }

    #[test]
    fn mistyped_field_does_not_hide_its_siblings() {
        let parsed = WorkerFrame::parse(r#"{"error":"invalid url","progress":"n/a"}"#)
            .expect("parse");
        assert_eq!(
            parsed.invalid,
            vec![InvalidField {
                name: "progress",
                found: "string"
            }]
        );
        assert_eq!(
            parsed.frame.into_updates(),
            vec![FrameUpdate::Failed("invalid url".into())]
        );
    }

    #[test]
    fn mistyped_filename_keeps_download_url() {
        let parsed =
            WorkerFrame::parse(r#"{"status":"READY","download_url":"/files/x.zip","filename":7}"#)
                .expect("parse");
        assert_eq!(
            parsed.invalid,
            vec![InvalidField {
                name: "filename",
                found: "number"
            }]
        );
        assert_eq!(
            parsed.frame.into_updates(),
            vec![
                FrameUpdate::Status("READY".into()),
                FrameUpdate::ArtifactReady {
                    url: "/files/x.zip".into(),
                    filename: None,
                },
            ]
        );
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            WorkerFrame::parse(r#"["READY", 100]"#),
            Err(FrameError::NotAnObject("array"))
        ));
        assert!(matches!(
            WorkerFrame::parse("42"),
            Err(FrameError::NotAnObject("number"))
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            WorkerFrame::parse("{status:"),
            Err(FrameError::InvalidJson(_))
        ));
    }

    #[test]
    fn binary_payload_must_be_utf8() {
        assert!(matches!(
            WorkerFrame::parse_bytes(b"{\"status\":\"ok \xff\xfe\"}"),
            Err(FrameError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn builder_output_parses_back() {
        let text = WorkerFrame::progress(75.0)
            .with_status("processed: 3/4")
            .to_text()
            .expect("encode");
        let parsed = WorkerFrame::parse_bytes(text.as_bytes()).expect("parse");
        assert!(parsed.invalid.is_empty());
        assert_eq!(parsed.frame.progress, Some(75.0));
        assert_eq!(parsed.frame.status.as_deref(), Some("processed: 3/4"));
        assert_eq!(parsed.frame.download_url, None);
    }
}
