//! Common imports for consuming pipeline sessions.
pub use crate::{
    AnalysisEvent, AnalyzeScriptRequest, CancelHandle, ChannelSink, EventSink, GroundScenesRequest,
    GroundingEvent, PhaseTracker, PipelineClient, PipelineClientConfig, SessionError,
    SessionHandle, SessionOptions, SessionState, SessionUpdate, StreamError,
};
