//! Client-side ingestion of the location-scout pipeline event streams.
//!
//! The script analysis and location grounding backends both answer with a
//! `text/event-stream` body of `event:`/`data:` frames. This crate turns those
//! bytes into typed domain events, tracks the coarse phase of each run, and
//! delivers everything to an [`EventSink`] in wire order with a single
//! terminal callback.
//!
//! ```no_run
//! use scout_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let client = PipelineClient::from_env()?;
//! let (sink, mut updates) = ChannelSink::new();
//! let session = client.analyze_script(
//!     AnalyzeScriptRequest::new("/data/scripts/heist.pdf"),
//!     sink,
//!     SessionOptions::default(),
//! )?;
//!
//! while let Some(update) = updates.recv().await {
//!     if let SessionUpdate::Event(AnalysisEvent::Location(location)) = update {
//!         println!("{}: {}", location.scene_id, location.scene_header);
//!     }
//! }
//! println!("phase: {:?}", session.phase());
//! # Ok(())
//! # }
//! ```

/// Cancellation switch shared between a session and its callers.
pub mod cancel;
/// Cancellable reads from the response byte stream.
pub mod chunk;
/// Backend client and request types.
pub mod client;
/// Bytes-to-events decoder shared by both pipelines.
pub mod decoder;
/// Public error types.
pub mod errors;
/// `event:`/`data:` frame assembly.
pub mod frame;
/// Newline reassembly across chunk boundaries.
pub mod lines;
/// Payload parsing and domain mapping helpers.
pub mod normalize;
/// Process-wide logging setup.
pub mod observability;
/// Phase inference over free-text status messages.
pub mod phase;
/// Per-pipeline event vocabularies and phase trackers.
pub mod pipelines;
/// Common imports for typical usage.
pub mod prelude;
/// Session state machine and event delivery.
pub mod session;

pub use cancel::CancelHandle;
pub use chunk::{ByteStream, ChunkRead};
pub use client::{AnalyzeScriptRequest, GroundScenesRequest, PipelineClient, PipelineClientConfig};
pub use decoder::EventDecoder;
pub use errors::{NormalizeError, SessionError, StreamError, TransportError};
pub use frame::{EventFrame, FrameAssembler};
pub use lines::LineAccumulator;
pub use normalize::DomainEvent;
pub use observability::init_observability;
pub use phase::PhaseTracker;
pub use pipelines::{
    AnalysisEvent, AnalysisPhase, AnalysisProgress, GroundingEvent, GroundingPhase,
    GroundingProgress, LocationCandidate, LocationGrounding, LocationRequirement, Pipeline,
    PipelineId, ScriptAnalysis,
};
pub use session::{
    Callbacks, ChannelSink, Connect, EventSink, FatalBackendErrors, SessionHandle, SessionOptions,
    SessionState, SessionUpdate, start,
};
