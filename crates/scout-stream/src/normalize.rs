//! Payload parsing and schema mapping shared by every pipeline.
use std::fmt;

use serde::de::DeserializeOwned;

use crate::errors::NormalizeError;
use crate::frame::EventFrame;
use crate::pipelines::{BackendError, Pipeline};

/// A normalized, typed event handed to consumers.
pub trait DomainEvent: Clone + fmt::Debug + Send + 'static {
    /// Wire name of the event (`status`, `candidate`, ...).
    fn name(&self) -> &str;

    /// The backend error carried by an `error` event, if this is one.
    fn backend_error(&self) -> Option<&BackendError>;
}

/// Parses a flushed frame and maps it into `P`'s event union.
pub fn normalize_frame<P: Pipeline>(frame: &EventFrame) -> Result<P::Event, NormalizeError> {
    let payload: serde_json::Value =
        serde_json::from_str(&frame.raw_payload).map_err(|source| NormalizeError::InvalidJson {
            event: frame.event_name.clone(),
            source,
        })?;
    P::normalize(&frame.event_name, payload)
}

/// Deserializes a wire payload into its backend-shaped struct.
pub(crate) fn wire_payload<T: DeserializeOwned>(
    event: &str,
    payload: serde_json::Value,
) -> Result<T, NormalizeError> {
    serde_json::from_value(payload).map_err(|source| NormalizeError::Shape {
        event: event.to_string(),
        source,
    })
}

/// Unwraps a field the domain schema cannot default.
pub(crate) fn required<T>(
    event: &str,
    field: &'static str,
    value: Option<T>,
) -> Result<T, NormalizeError> {
    value.ok_or_else(|| NormalizeError::MissingField {
        event: event.to_string(),
        field,
    })
}

/// Non-blank string or `None`.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::{AnalysisEvent, ScriptAnalysis};

    fn frame(name: &str, payload: &str) -> EventFrame {
        EventFrame {
            event_name: name.into(),
            raw_payload: payload.into(),
        }
    }

    #[test]
    fn invalid_json_is_a_recoverable_error() {
        let err = normalize_frame::<ScriptAnalysis>(&frame("status", "{not json"))
            .expect_err("should fail");
        assert!(matches!(err, NormalizeError::InvalidJson { .. }));
    }

    #[test]
    fn wrong_shape_is_a_recoverable_error() {
        let err = normalize_frame::<ScriptAnalysis>(&frame("progress", "\"halfway\""))
            .expect_err("should fail");
        assert!(matches!(err, NormalizeError::Shape { .. }));
    }

    #[test]
    fn unknown_event_name_is_forwarded_verbatim() {
        let event = normalize_frame::<ScriptAnalysis>(&frame("keepalive", "{}")).expect("event");
        match event {
            AnalysisEvent::Unknown { name, payload } => {
                assert_eq!(name, "keepalive");
                assert_eq!(payload, serde_json::json!({}));
            }
            other => panic!("expected unknown event, got {other:?}"),
        }
    }

    #[test]
    fn required_reports_missing_field() {
        let err = required::<String>("candidate", "venue_name", None).expect_err("missing");
        assert!(err.to_string().contains("venue_name"));
    }
}
