use serde::{Deserialize, Serialize};

use crate::errors::NormalizeError;
use crate::normalize::{non_blank, wire_payload};

const UNKNOWN_BACKEND_ERROR: &str = "pipeline reported an error";

/// Free-text progress message (`status` event).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub message: String,
}

/// Overall progress counter (`progress` event).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub processed: u32,
    pub total: u32,
    pub percent: u8,
}

/// Error reported by the backend inside the event stream (`error` event).
///
/// A `scene_id` scopes the error to one item; without it the whole run failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackendError {
    pub message: String,
    pub scene_id: Option<String>,
}

impl BackendError {
    /// True when the error only concerns a single item of the run.
    pub fn is_scoped(&self) -> bool {
        self.scene_id.is_some()
    }
}

#[derive(Deserialize)]
struct WireStatus {
    message: Option<String>,
}

#[derive(Deserialize)]
struct WireProgress {
    processed: Option<u32>,
    total: Option<u32>,
    percent: Option<f64>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    error: Option<String>,
    scene_id: Option<String>,
}

pub(crate) fn status(event: &str, payload: serde_json::Value) -> Result<StatusMessage, NormalizeError> {
    let wire: WireStatus = wire_payload(event, payload)?;
    Ok(StatusMessage {
        message: wire.message.unwrap_or_default(),
    })
}

pub(crate) fn progress(
    event: &str,
    payload: serde_json::Value,
) -> Result<ProgressUpdate, NormalizeError> {
    let wire: WireProgress = wire_payload(event, payload)?;
    let processed = wire.processed.unwrap_or(0);
    let total = wire.total.unwrap_or(0);
    let percent = match wire.percent {
        Some(p) => p.round().clamp(0.0, 100.0) as u8,
        None if total > 0 => ((u64::from(processed) * 100 / u64::from(total)).min(100)) as u8,
        None => 0,
    };
    Ok(ProgressUpdate {
        processed,
        total,
        percent,
    })
}

pub(crate) fn backend_error(
    event: &str,
    payload: serde_json::Value,
) -> Result<BackendError, NormalizeError> {
    let wire: WireError = wire_payload(event, payload)?;
    let message = non_blank(wire.message)
        .or_else(|| non_blank(wire.error))
        .unwrap_or_else(|| UNKNOWN_BACKEND_ERROR.to_string());
    Ok(BackendError {
        message,
        scene_id: non_blank(wire.scene_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_derives_missing_percent() {
        let update = progress("progress", json!({"processed": 1, "total": 3})).expect("progress");
        assert_eq!(update.percent, 33);
        let update = progress("progress", json!({"processed": 2, "total": 4, "percent": 50}))
            .expect("progress");
        assert_eq!(update.percent, 50);
        let update = progress("progress", json!({})).expect("progress");
        assert_eq!(update, ProgressUpdate { processed: 0, total: 0, percent: 0 });
    }

    #[test]
    fn error_accepts_message_or_error_key() {
        let scoped = backend_error("error", json!({"scene_id": "s1", "error": "Scene not found"}))
            .expect("error");
        assert_eq!(scoped.message, "Scene not found");
        assert!(scoped.is_scoped());

        let global = backend_error("error", json!({"message": "quota exceeded"})).expect("error");
        assert_eq!(global.message, "quota exceeded");
        assert!(!global.is_scoped());

        let empty = backend_error("error", json!({"scene_id": ""})).expect("error");
        assert_eq!(empty.message, UNKNOWN_BACKEND_ERROR);
        assert!(!empty.is_scoped());
    }

    #[test]
    fn status_defaults_to_empty_message() {
        assert_eq!(status("status", json!({})).expect("status").message, "");
    }
}
