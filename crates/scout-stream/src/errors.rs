use crate::pipelines::PipelineId;

/// Errors returned before a session is running (configuration, request
/// construction, client setup).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client or session configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty scene list, blank file path, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// Internal invariant violation, such as a session task that panicked.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Terminal failure delivered once through `EventSink::on_error`.
///
/// Transport failures are connection-level; backend failures come from an
/// `error` event the pipeline sent on an otherwise healthy connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum SessionError {
    /// The connection failed or broke before natural end-of-stream.
    #[error("transport failure ({pipeline}): {message}")]
    Transport {
        pipeline: PipelineId,
        message: String,
        status_code: Option<u16>,
    },
    /// The backend reported a fatal `error` event.
    #[error("backend failure ({pipeline}): {message}")]
    Backend {
        pipeline: PipelineId,
        message: String,
    },
}

impl SessionError {
    /// Creates a transport-level error.
    pub fn transport(pipeline: PipelineId, message: impl Into<String>) -> Self {
        Self::Transport {
            pipeline,
            message: message.into(),
            status_code: None,
        }
    }

    /// Creates a transport-level error for a non-success HTTP status.
    pub fn http_status(pipeline: PipelineId, status_code: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            pipeline,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Creates a backend (protocol-level) error.
    pub fn backend(pipeline: PipelineId, message: impl Into<String>) -> Self {
        Self::Backend {
            pipeline,
            message: message.into(),
        }
    }

    /// Returns the pipeline that produced this error.
    pub fn pipeline(&self) -> PipelineId {
        match self {
            Self::Transport { pipeline, .. } | Self::Backend { pipeline, .. } => *pipeline,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. } | Self::Backend { message, .. } => message,
        }
    }

    /// Returns true when the connection itself failed.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A flushed frame that could not be turned into a domain event.
///
/// These never end a session; the decoder logs and drops the frame.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Payload was not valid JSON.
    #[error("invalid JSON payload for `{event}` event: {source}")]
    InvalidJson {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    /// Payload was JSON but did not have the shape expected for the event.
    #[error("unexpected payload shape for `{event}` event: {source}")]
    Shape {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    /// A field the domain schema cannot default was absent or null.
    #[error("`{event}` event is missing required field `{field}`")]
    MissingField { event: String, field: &'static str },
}

impl NormalizeError {
    /// Returns the event name of the rejected frame.
    pub fn event(&self) -> &str {
        match self {
            Self::InvalidJson { event, .. }
            | Self::Shape { event, .. }
            | Self::MissingField { event, .. } => event,
        }
    }
}

/// Failure reported by the byte transport (connect, HTTP status, body read).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub status_code: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub(crate) fn into_session_error(self, pipeline: PipelineId) -> SessionError {
        SessionError::Transport {
            pipeline,
            message: self.message,
            status_code: self.status_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_backend_errors_are_distinct() {
        let transport = SessionError::http_status(PipelineId::Grounding, 502, "bad gateway");
        let backend = SessionError::backend(PipelineId::Grounding, "no scenes");
        assert!(transport.is_transport());
        assert!(!backend.is_transport());
        assert_eq!(transport.pipeline(), PipelineId::Grounding);
        assert_eq!(backend.message(), "no scenes");
        assert_eq!(
            transport.to_string(),
            "transport failure (grounding): bad gateway"
        );
    }

    #[test]
    fn normalize_error_reports_event_name() {
        let source = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid");
        let err = NormalizeError::InvalidJson {
            event: "location".into(),
            source,
        };
        assert_eq!(err.event(), "location");
        assert!(err.to_string().starts_with("invalid JSON payload for `location`"));
    }
}
