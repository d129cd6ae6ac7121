//! HTTP entry points for the two streaming pipelines.
use std::time::Duration;

use futures::StreamExt as _;
use serde::Serialize;
use tracing::debug;

use crate::chunk::ByteStream;
use crate::errors::{StreamError, TransportError};
use crate::pipelines::analysis::DEFAULT_TARGET_CITY;
use crate::pipelines::{LocationGrounding, ScriptAnalysis};
use crate::session::{self, Connect, EventSink, SessionHandle, SessionOptions};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_GROUNDING_MAX_RESULTS: u32 = 10;
const DEFAULT_GROUNDING_WORKERS: u32 = 5;

/// Configuration for the pipeline backend client.
#[derive(Clone, Debug)]
pub struct PipelineClientConfig {
    /// Base URL of the backend serving `/api/...`.
    pub base_url: String,
    /// Timeout for establishing the connection.
    ///
    /// Streams are long-lived, so there is no whole-request timeout; use
    /// [`SessionHandle::cancel_after`] for a deadline.
    pub connect_timeout: Duration,
}

impl Default for PipelineClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PipelineClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().base_url(base_url)
    }

    /// Builds a config from `SCOUT_API_BASE_URL` and `SCOUT_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, StreamError> {
        let mut config = Self::default();
        if let Some(base_url) = std::env::var("SCOUT_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            config.base_url = base_url.trim().to_string();
        }
        if let Ok(raw) = std::env::var("SCOUT_CONNECT_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                StreamError::Config(format!(
                    "SCOUT_CONNECT_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn analyze_url(&self) -> String {
        format!("{}/api/scripts/analyze", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn grounding_url(&self) -> String {
        format!("{}/api/grounding/ground", self.base_url.trim_end_matches('/'))
    }
}

/// Input for a script analysis run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalyzeScriptRequest {
    /// Server-side path of the screenplay PDF.
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_city: Option<String>,
}

impl AnalyzeScriptRequest {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            project_id: None,
            target_city: None,
        }
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn target_city(mut self, target_city: impl Into<String>) -> Self {
        self.target_city = Some(target_city.into());
        self
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.file_path.trim().is_empty() {
            return Err(StreamError::Validation("file_path must not be empty".into()));
        }
        Ok(())
    }
}

/// Input for a location grounding run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroundScenesRequest {
    pub scene_ids: Vec<String>,
    pub target_city: String,
    pub max_results: u32,
    pub save_to_db: bool,
    pub parallel_workers: u32,
}

impl GroundScenesRequest {
    pub fn new<I, S>(scene_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scene_ids: scene_ids.into_iter().map(Into::into).collect(),
            target_city: DEFAULT_TARGET_CITY.to_string(),
            max_results: DEFAULT_GROUNDING_MAX_RESULTS,
            save_to_db: true,
            parallel_workers: DEFAULT_GROUNDING_WORKERS,
        }
    }

    pub fn target_city(mut self, target_city: impl Into<String>) -> Self {
        self.target_city = target_city.into();
        self
    }

    pub fn max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn save_to_db(mut self, save: bool) -> Self {
        self.save_to_db = save;
        self
    }

    pub fn parallel_workers(mut self, workers: u32) -> Self {
        self.parallel_workers = workers;
        self
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.scene_ids.is_empty() {
            return Err(StreamError::Validation(
                "at least one scene id is required".into(),
            ));
        }
        if self.scene_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(StreamError::Validation("scene ids must not be blank".into()));
        }
        if self.max_results == 0 {
            return Err(StreamError::Validation(
                "max_results must be greater than 0".into(),
            ));
        }
        if self.parallel_workers == 0 {
            return Err(StreamError::Validation(
                "parallel_workers must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Client that opens streaming sessions against the pipeline backend.
#[derive(Clone)]
pub struct PipelineClient {
    http: reqwest::Client,
    config: PipelineClientConfig,
}

impl PipelineClient {
    pub fn new(config: PipelineClientConfig) -> Result<Self, StreamError> {
        if config.base_url.trim().is_empty() {
            return Err(StreamError::Config("base_url must not be empty".into()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(PipelineClientConfig::from_env()?)
    }

    pub fn config(&self) -> &PipelineClientConfig {
        &self.config
    }

    /// Starts a script analysis session. Must be called inside a tokio runtime.
    pub fn analyze_script<S>(
        &self,
        request: AnalyzeScriptRequest,
        sink: S,
        options: SessionOptions,
    ) -> Result<SessionHandle<ScriptAnalysis>, StreamError>
    where
        S: EventSink<crate::pipelines::AnalysisEvent>,
    {
        request.validate()?;
        debug!(file_path = %request.file_path, "opening analysis stream");
        let http = self.http.get(self.config.analyze_url()).query(&request);
        Ok(session::start(open_stream(http), sink, options))
    }

    /// Starts a location grounding session. Must be called inside a tokio runtime.
    pub fn ground_scenes<S>(
        &self,
        request: GroundScenesRequest,
        sink: S,
        options: SessionOptions,
    ) -> Result<SessionHandle<LocationGrounding>, StreamError>
    where
        S: EventSink<crate::pipelines::GroundingEvent>,
    {
        request.validate()?;
        debug!(scenes = request.scene_ids.len(), target_city = %request.target_city, "opening grounding stream");
        let http = self.http.post(self.config.grounding_url()).json(&request);
        Ok(session::start(open_stream(http), sink, options))
    }
}

fn open_stream(request: reqwest::RequestBuilder) -> Connect {
    Box::pin(async move {
        let response = request
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::new(format!("pipeline request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::with_status(
                status.as_u16(),
                format!("pipeline request failed with status {status}: {body}"),
            ));
        }
        let stream: ByteStream = Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| TransportError::new(format!("stream read failed: {e}")))
        }));
        Ok(stream)
    })
}
