//! Job payload codec.
//!
//! A payload is a JSON object with a required `job` field naming the handler
//! (`"Class@method"` or bare `"Class"`) and an opaque `data` value that is
//! handed to the handler untouched. Backends may add their own metadata
//! (`id`, `attempts`, `pushed_at`, ...); unknown fields are preserved.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{QueueError, Result};

/// Method invoked when a handler reference carries no `@method` suffix.
pub const DEFAULT_METHOD: &str = "fire";

/// Name reported for jobs whose payload has no readable handler reference.
pub const UNDEFINED_NAME: &str = "(undefined)";

static SLUG_SEPARATORS: OnceLock<regex::Regex> = OnceLock::new();

/// Decoded job payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPayload {
    /// Handler reference, `"Class@method"` or `"Class"`.
    #[serde(rename = "job")]
    pub handler_ref: String,

    /// Opaque data passed through to the handler.
    pub data: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unix timestamp (seconds) at which the job was pushed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Backend metadata this codec does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobPayload {
    /// Build a fresh payload for pushing, stamped with an id and push time.
    pub fn new(handler_ref: impl Into<String>, data: Value) -> Self {
        Self {
            handler_ref: handler_ref.into(),
            data,
            id: Some(uuid::Uuid::new_v4().to_string()),
            pushed_at: Some(Utc::now().timestamp()),
            attempts: None,
            extra: Map::new(),
        }
    }

    /// Split the handler reference into class and method.
    pub fn handler(&self) -> HandlerRef {
        parse_handler_ref(&self.handler_ref)
    }
}

/// Parse a raw payload.
///
/// # Errors
///
/// `MalformedPayload` when `raw` is not a JSON object, `MissingHandlerRef`
/// when the object has no non-empty string `job` field.
pub fn decode(raw: &str) -> Result<JobPayload> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| QueueError::malformed_payload(e.to_string()))?;

    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(QueueError::malformed_payload(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            )))
        }
    };

    let handler_ref = match fields.remove("job") {
        Some(Value::String(job)) if !job.is_empty() => job,
        _ => return Err(QueueError::missing_handler_ref()),
    };

    let data = fields.remove("data").unwrap_or(Value::Null);
    let id = fields.remove("id").and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let pushed_at = fields.remove("pushed_at").and_then(|v| v.as_i64());
    let attempts = fields
        .remove("attempts")
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok());

    Ok(JobPayload {
        handler_ref,
        data,
        id,
        pushed_at,
        attempts,
        extra: fields,
    })
}

/// Serialize a payload back to its wire form.
pub fn encode(payload: &JobPayload) -> Result<String> {
    Ok(serde_json::to_string(payload)?)
}

/// Read the `job` field out of a raw body as written, empty string included.
/// Falls back to [`UNDEFINED_NAME`] when there is no string `job` field.
pub fn job_name(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .as_ref()
        .and_then(|value| value.get("job"))
        .and_then(Value::as_str)
        .map_or_else(|| UNDEFINED_NAME.to_string(), str::to_string)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler References
// ═══════════════════════════════════════════════════════════════════════════════

/// A handler reference split into its class and method parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerRef {
    pub class: String,
    pub method: String,
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class, self.method)
    }
}

/// Split `"Class@method"` into its parts. A bare `"Class"` gets the
/// [`DEFAULT_METHOD`]. Segments after the second `@` are ignored.
pub fn parse_handler_ref(handler_ref: &str) -> HandlerRef {
    let mut segments = handler_ref.split('@');
    let class = segments.next().unwrap_or_default().to_string();
    let method = segments
        .next()
        .unwrap_or(DEFAULT_METHOD)
        .to_string();

    HandlerRef { class, method }
}

/// Slug keying monitoring checkpoints for a handler reference.
///
/// `"ReportMailer@send"` becomes `"reportmailer-at-send"`.
pub fn monitor_slug(handler_ref: &str) -> String {
    let separators = SLUG_SEPARATORS
        .get_or_init(|| regex::Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

    let lowered = handler_ref.replace('@', "-at-").to_lowercase();
    separators
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_decode_full_payload() {
        let payload =
            decode(r#"{"job":"ReportMailer@send","data":{"id":42},"attempts":2,"queue":"mail"}"#)
                .unwrap();

        assert_eq!(payload.handler_ref, "ReportMailer@send");
        assert_eq!(payload.data, json!({"id": 42}));
        assert_eq!(payload.attempts, Some(2));
        assert_eq!(payload.extra.get("queue"), Some(&json!("mail")));
    }

    #[test]
    fn test_decode_missing_data_is_null() {
        let payload = decode(r#"{"job":"FlakyJob"}"#).unwrap();
        assert_eq!(payload.data, Value::Null);
        assert!(payload.id.is_none());
    }

    #[test]
    fn test_decode_numeric_id() {
        let payload = decode(r#"{"job":"A","id":17}"#).unwrap();
        assert_eq!(payload.id.as_deref(), Some("17"));
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode("{not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPayload);

        let err = decode("[1, 2, 3]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPayload);
    }

    #[test]
    fn test_decode_missing_handler() {
        for raw in [r#"{"data":{}}"#, r#"{"job":""}"#, r#"{"job":12}"#] {
            let err = decode(raw).unwrap_err();
            assert_eq!(err.code(), ErrorCode::MissingHandlerRef, "payload: {}", raw);
        }
    }

    #[test]
    fn test_encode_keeps_extra_fields() {
        let payload = decode(r#"{"job":"A@b","data":[1],"trace":"abc"}"#).unwrap();
        let encoded = encode(&payload).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["job"], json!("A@b"));
        assert_eq!(value["data"], json!([1]));
        assert_eq!(value["trace"], json!("abc"));
        assert!(value.get("attempts").is_none());
    }

    #[test]
    fn test_new_payload_is_stamped() {
        let payload = JobPayload::new("Cleanup", json!(null));
        assert!(payload.id.is_some());
        assert!(payload.pushed_at.is_some());
    }

    #[test]
    fn test_parse_handler_ref() {
        let parsed = parse_handler_ref("ReportMailer@send");
        assert_eq!(parsed.class, "ReportMailer");
        assert_eq!(parsed.method, "send");

        let bare = parse_handler_ref("ReportMailer");
        assert_eq!(bare.class, "ReportMailer");
        assert_eq!(bare.method, DEFAULT_METHOD);

        let extra = parse_handler_ref("A@b@c");
        assert_eq!((extra.class.as_str(), extra.method.as_str()), ("A", "b"));
    }

    #[test]
    fn test_job_name_fallback() {
        assert_eq!(job_name(r#"{"job":"A@b"}"#), "A@b");
        assert_eq!(job_name("garbage"), UNDEFINED_NAME);
        assert_eq!(job_name(r#"{"data":1}"#), UNDEFINED_NAME);
        assert_eq!(job_name(r#"{"job":7}"#), UNDEFINED_NAME);
        assert_eq!(job_name("[1, 2]"), UNDEFINED_NAME);
    }

    #[test]
    fn test_job_name_keeps_empty_reference() {
        assert_eq!(job_name(r#"{"job":"","data":null}"#), "");
        assert!(decode(r#"{"job":""}"#).is_err());
    }

    #[test]
    fn test_monitor_slug() {
        assert_eq!(monitor_slug("ReportMailer@send"), "reportmailer-at-send");
        assert_eq!(monitor_slug("App\\Jobs\\Cleanup"), "app-jobs-cleanup");
        assert_eq!(monitor_slug("  Weird__Name!! "), "weird-name");
    }
}
