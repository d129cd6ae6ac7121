//! Script analysis pipeline: `status`, `location`, `progress`, `complete`, `error`.
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::errors::NormalizeError;
use crate::normalize::{DomainEvent, non_blank, required, wire_payload};
use crate::phase::{PhaseLog, PhaseRules, PhaseTracker};

use super::common::{self, BackendError, ProgressUpdate, StatusMessage};
use super::{Pipeline, PipelineId};

pub const DEFAULT_SHOOT_HOURS: u32 = 8;
pub const DEFAULT_TARGET_CITY: &str = "Los Angeles, CA";
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 50.0;
pub const DEFAULT_MAX_RESULTS: u32 = 10;
const DEFAULT_VIBE_CONFIDENCE: f64 = 0.5;

/// Marker type for the script analysis pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptAnalysis;

impl Pipeline for ScriptAnalysis {
    const ID: PipelineId = PipelineId::Analysis;
    const EVENT_NAMES: &'static [&'static str] =
        &["status", "location", "progress", "complete", "error"];

    type Event = AnalysisEvent;
    type Progress = AnalysisProgress;

    fn normalize(
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<AnalysisEvent, NormalizeError> {
        Ok(match event_name {
            "status" => AnalysisEvent::Status(common::status(event_name, payload)?),
            "location" => AnalysisEvent::Location(map_location(event_name, payload)?),
            "progress" => AnalysisEvent::Progress(common::progress(event_name, payload)?),
            "complete" => AnalysisEvent::Complete(map_summary(event_name, payload)?),
            "error" => AnalysisEvent::Error(common::backend_error(event_name, payload)?),
            _ => AnalysisEvent::Unknown {
                name: event_name.to_string(),
                payload,
            },
        })
    }
}

/// Normalized analysis event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Status(StatusMessage),
    /// One analyzed location, ready to be grounded.
    Location(LocationRequirement),
    Progress(ProgressUpdate),
    Complete(AnalysisSummary),
    Error(BackendError),
    /// Event name outside this pipeline's vocabulary, kept for forward compatibility.
    Unknown {
        name: String,
        payload: serde_json::Value,
    },
}

impl DomainEvent for AnalysisEvent {
    fn name(&self) -> &str {
        match self {
            Self::Status(_) => "status",
            Self::Location(_) => "location",
            Self::Progress(_) => "progress",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
            Self::Unknown { name, .. } => name,
        }
    }

    fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Final summary of an analysis run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub success: bool,
    pub total_locations: Option<usize>,
    pub message: Option<String>,
}

/// Aesthetic category of a location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VibeCategory {
    Industrial,
    Luxury,
    UrbanGritty,
    Suburban,
    Natural,
    RetroVintage,
    Futuristic,
    Institutional,
    Commercial,
    Residential,
}

impl VibeCategory {
    /// Lenient parse: case-insensitive, accepts `_` or spaces for `-`.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Some(match key.as_str() {
            "industrial" => Self::Industrial,
            "luxury" => Self::Luxury,
            "urban-gritty" => Self::UrbanGritty,
            "suburban" => Self::Suburban,
            "natural" => Self::Natural,
            "retro-vintage" => Self::RetroVintage,
            "futuristic" => Self::Futuristic,
            "institutional" => Self::Institutional,
            "commercial" => Self::Commercial,
            "residential" => Self::Residential,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    #[default]
    Important,
    Flexible,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "important" => Some(Self::Important),
            "flexible" => Some(Self::Flexible),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InteriorExterior {
    Interior,
    Exterior,
    #[default]
    Both,
}

impl InteriorExterior {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "interior" | "int" => Some(Self::Interior),
            "exterior" | "ext" => Some(Self::Exterior),
            "both" | "int/ext" => Some(Self::Both),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Day,
    Night,
    #[default]
    Both,
}

impl TimeOfDay {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "night" => Some(Self::Night),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Vibe {
    pub primary: VibeCategory,
    pub secondary: Option<VibeCategory>,
    pub descriptors: Vec<String>,
    pub confidence: f64,
}

impl Default for Vibe {
    fn default() -> Self {
        Self {
            primary: VibeCategory::Commercial,
            secondary: None,
            descriptors: Vec::new(),
            confidence: DEFAULT_VIBE_CONFIDENCE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Constraints {
    pub interior_exterior: InteriorExterior,
    pub time_of_day: TimeOfDay,
    pub special_requirements: Vec<String>,
}

/// What a location scout needs to find for one scene.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationRequirement {
    pub scene_id: String,
    pub project_id: String,
    pub scene_number: String,
    pub scene_header: String,
    pub page_numbers: Vec<u32>,
    pub script_excerpt: String,
    pub vibe: Vibe,
    pub constraints: Constraints,
    pub estimated_shoot_hours: u32,
    pub priority: Priority,
    pub target_city: String,
    pub search_radius_km: f64,
    pub max_results: u32,
    pub location_description: String,
    pub scouting_notes: String,
}

#[derive(Deserialize)]
struct WireVibe {
    primary: Option<String>,
    secondary: Option<String>,
    descriptors: Option<Vec<String>>,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
struct WireConstraints {
    interior_exterior: Option<String>,
    time_of_day: Option<String>,
    special_requirements: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct WireLocation {
    scene_id: Option<String>,
    id: Option<String>,
    project_id: Option<String>,
    scene_number: Option<String>,
    scene_header: Option<String>,
    page_numbers: Option<Vec<u32>>,
    script_excerpt: Option<String>,
    vibe: Option<WireVibe>,
    constraints: Option<WireConstraints>,
    estimated_shoot_hours: Option<f64>,
    priority: Option<String>,
    target_city: Option<String>,
    search_radius_km: Option<f64>,
    max_results: Option<u32>,
    location_description: Option<String>,
    scouting_notes: Option<String>,
}

#[derive(Deserialize)]
struct WireSummary {
    success: Option<bool>,
    total_locations: Option<usize>,
    message: Option<String>,
}

fn map_location(event: &str, payload: serde_json::Value) -> Result<LocationRequirement, NormalizeError> {
    let wire: WireLocation = wire_payload(event, payload)?;
    let scene_header = required(event, "scene_header", non_blank(wire.scene_header))?;
    let vibe = wire.vibe.map(map_vibe).unwrap_or_default();
    let constraints = wire.constraints.map(map_constraints).unwrap_or_default();
    Ok(LocationRequirement {
        scene_id: non_blank(wire.scene_id)
            .or_else(|| non_blank(wire.id))
            .unwrap_or_default(),
        project_id: wire.project_id.unwrap_or_default(),
        scene_number: wire.scene_number.unwrap_or_default(),
        scene_header,
        page_numbers: wire.page_numbers.unwrap_or_default(),
        script_excerpt: wire.script_excerpt.unwrap_or_default(),
        vibe,
        constraints,
        estimated_shoot_hours: wire
            .estimated_shoot_hours
            .filter(|h| h.is_finite() && *h > 0.0)
            .map(|h| h.round() as u32)
            .unwrap_or(DEFAULT_SHOOT_HOURS),
        priority: wire
            .priority
            .as_deref()
            .and_then(Priority::parse)
            .unwrap_or_default(),
        target_city: non_blank(wire.target_city).unwrap_or_else(|| DEFAULT_TARGET_CITY.to_string()),
        search_radius_km: wire.search_radius_km.unwrap_or(DEFAULT_SEARCH_RADIUS_KM),
        max_results: wire.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        location_description: wire.location_description.unwrap_or_default(),
        scouting_notes: wire.scouting_notes.unwrap_or_default(),
    })
}

fn map_vibe(wire: WireVibe) -> Vibe {
    Vibe {
        primary: wire
            .primary
            .as_deref()
            .and_then(VibeCategory::parse)
            .unwrap_or(VibeCategory::Commercial),
        secondary: wire.secondary.as_deref().and_then(VibeCategory::parse),
        descriptors: wire.descriptors.unwrap_or_default(),
        confidence: wire
            .confidence
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_VIBE_CONFIDENCE),
    }
}

fn map_constraints(wire: WireConstraints) -> Constraints {
    Constraints {
        interior_exterior: wire
            .interior_exterior
            .as_deref()
            .and_then(InteriorExterior::parse)
            .unwrap_or_default(),
        time_of_day: wire
            .time_of_day
            .as_deref()
            .and_then(TimeOfDay::parse)
            .unwrap_or_default(),
        special_requirements: wire.special_requirements.unwrap_or_default(),
    }
}

fn map_summary(event: &str, payload: serde_json::Value) -> Result<AnalysisSummary, NormalizeError> {
    let wire: WireSummary = wire_payload(event, payload)?;
    Ok(AnalysisSummary {
        success: wire.success.unwrap_or(true),
        total_locations: wire.total_locations,
        message: non_blank(wire.message),
    })
}

/// Coarse stage of an analysis run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Parsing,
    Deduplicating,
    Analyzing,
    Complete,
    Failed,
}

/// Phase and counters derived from an analysis event sequence.
#[derive(Clone, Debug)]
pub struct AnalysisProgress {
    phases: PhaseLog<AnalysisPhase>,
    pub pages: Option<usize>,
    pub locations_before_merge: Option<usize>,
    pub locations_after_merge: Option<usize>,
    pub locations_received: usize,
    pub progress: Option<ProgressUpdate>,
    pub last_status: Option<String>,
    pub reported_total: Option<usize>,
    pub failed_items: usize,
    pub error: Option<String>,
}

impl Default for AnalysisProgress {
    fn default() -> Self {
        Self {
            phases: PhaseLog::new(AnalysisPhase::Parsing),
            pages: None,
            locations_before_merge: None,
            locations_after_merge: None,
            locations_received: 0,
            progress: None,
            last_status: None,
            reported_total: None,
            failed_items: 0,
            error: None,
        }
    }
}

static ANALYSIS_RULES: Lazy<PhaseRules<AnalysisProgress>> = Lazy::new(|| {
    PhaseRules::new(&[
        (
            "pages_extracted",
            r"(?i)\bextracted\b.*\bpages?\b",
            AnalysisProgress::on_pages_extracted,
        ),
        (
            "deduplicating",
            r"(?i)\bdeduplicat",
            AnalysisProgress::on_deduplicating,
        ),
        ("merged", r"(?i)\bmerged\b", AnalysisProgress::on_merged),
        (
            "analyzing",
            r"(?i)\banalyz(?:ing|e)\b",
            AnalysisProgress::on_analyzing,
        ),
    ])
});

impl AnalysisProgress {
    /// True once the merge result has been captured.
    pub fn merge_completed(&self) -> bool {
        self.locations_after_merge.is_some()
    }

    fn on_pages_extracted(&mut self, count: Option<usize>) {
        if count.is_some() {
            self.pages = count;
        }
    }

    fn on_deduplicating(&mut self, count: Option<usize>) {
        self.phases.advance(AnalysisPhase::Deduplicating);
        if self.locations_before_merge.is_none() {
            self.locations_before_merge = count;
        }
    }

    fn on_merged(&mut self, count: Option<usize>) {
        if self.locations_after_merge.is_some() {
            debug!(?count, "ignoring repeated merge result");
            return;
        }
        self.locations_after_merge = count;
    }

    fn on_analyzing(&mut self, _count: Option<usize>) {
        self.phases.advance(AnalysisPhase::Analyzing);
    }
}

impl PhaseTracker for AnalysisProgress {
    type Event = AnalysisEvent;
    type Phase = AnalysisPhase;

    fn observe(&mut self, event: &AnalysisEvent) {
        match event {
            AnalysisEvent::Status(status) => {
                let matched = ANALYSIS_RULES.apply(self, &status.message);
                trace!(message = %status.message, ?matched, "analysis status");
                self.last_status = Some(status.message.clone());
            }
            AnalysisEvent::Location(_) => self.locations_received += 1,
            AnalysisEvent::Progress(update) => self.progress = Some(*update),
            AnalysisEvent::Complete(summary) => {
                self.phases.force(AnalysisPhase::Complete);
                self.reported_total = summary.total_locations;
            }
            AnalysisEvent::Error(err) if err.is_scoped() => self.failed_items += 1,
            AnalysisEvent::Error(err) => {
                if self.phases.current() != AnalysisPhase::Complete {
                    self.phases.force(AnalysisPhase::Failed);
                }
                self.error = Some(err.message.clone());
            }
            AnalysisEvent::Unknown { .. } => {}
        }
    }

    fn phase(&self) -> AnalysisPhase {
        self.phases.current()
    }

    fn history(&self) -> &[AnalysisPhase] {
        self.phases.history()
    }
}
