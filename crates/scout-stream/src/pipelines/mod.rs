//! Per-pipeline event vocabularies.
//!
//! Both remote pipelines speak the same framing; they differ only in event
//! names, payload shapes and phase vocabulary. Each one is a marker type that
//! implements [`Pipeline`] and plugs into the generic decoder and session.
use std::fmt;

use crate::errors::NormalizeError;
use crate::normalize::DomainEvent;
use crate::phase::PhaseTracker;

pub mod analysis;
mod common;
pub mod grounding;

pub use analysis::{
    AnalysisEvent, AnalysisPhase, AnalysisProgress, AnalysisSummary, Constraints, InteriorExterior,
    LocationRequirement, Priority, ScriptAnalysis, TimeOfDay, Vibe, VibeCategory,
};
pub use common::{BackendError, ProgressUpdate, StatusMessage};
pub use grounding::{
    CandidateFound, CandidateStatus, GroundingEvent, GroundingPhase, GroundingProgress,
    GroundingSummary, LocationCandidate, LocationGrounding, SceneComplete, SceneStart,
    VapiCallStatus,
};

/// Stable identifier for one of the remote pipelines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineId {
    /// Script analysis: screenplay in, location requirements out.
    Analysis,
    /// Location grounding: scenes in, real-world venue candidates out.
    Grounding,
}

impl PipelineId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Grounding => "grounding",
        }
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event vocabulary of one pipeline.
pub trait Pipeline: Send + Sync + 'static {
    /// Pipeline identifier used in logs and errors.
    const ID: PipelineId;
    /// Event names this pipeline understands; anything else decodes as an
    /// unknown event.
    const EVENT_NAMES: &'static [&'static str];

    /// Normalized event union.
    type Event: DomainEvent;
    /// Phase tracker fed with every delivered event.
    type Progress: PhaseTracker<Event = Self::Event>;

    /// Maps a parsed payload to a domain event for the given event name.
    fn normalize(
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<Self::Event, NormalizeError>;

    /// Returns true when `event_name` is part of this pipeline's vocabulary.
    fn knows(event_name: &str) -> bool {
        Self::EVENT_NAMES.contains(&event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_ids_render_snake_case() {
        assert_eq!(PipelineId::Analysis.to_string(), "analysis");
        assert_eq!(
            serde_json::to_value(PipelineId::Grounding).expect("serialize"),
            serde_json::json!("grounding")
        );
    }

    #[test]
    fn vocabularies_match_wire_protocol() {
        assert!(ScriptAnalysis::knows("location"));
        assert!(!ScriptAnalysis::knows("candidate"));
        assert!(LocationGrounding::knows("scene_complete"));
        assert_eq!(LocationGrounding::EVENT_NAMES.len(), 7);
        assert_eq!(ScriptAnalysis::EVENT_NAMES.len(), 5);
    }
}
