//! Location grounding pipeline: per-scene venue discovery.
//!
//! Vocabulary: `status`, `scene_start`, `candidate`, `scene_complete`,
//! `progress`, `complete`, `error`. Scenes are processed by parallel backend
//! workers, so events for different scenes interleave.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::errors::NormalizeError;
use crate::normalize::{DomainEvent, non_blank, required, wire_payload};
use crate::phase::{PhaseLog, PhaseRules, PhaseTracker};

use super::common::{self, BackendError, ProgressUpdate, StatusMessage};
use super::{Pipeline, PipelineId};

/// Marker type for the location grounding pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocationGrounding;

impl Pipeline for LocationGrounding {
    const ID: PipelineId = PipelineId::Grounding;
    const EVENT_NAMES: &'static [&'static str] = &[
        "status",
        "scene_start",
        "candidate",
        "scene_complete",
        "progress",
        "complete",
        "error",
    ];

    type Event = GroundingEvent;
    type Progress = GroundingProgress;

    fn normalize(
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<GroundingEvent, NormalizeError> {
        Ok(match event_name {
            "status" => GroundingEvent::Status(common::status(event_name, payload)?),
            "scene_start" => GroundingEvent::SceneStart(map_scene_start(event_name, payload)?),
            "candidate" => GroundingEvent::Candidate(map_candidate_found(event_name, payload)?),
            "scene_complete" => {
                GroundingEvent::SceneComplete(map_scene_complete(event_name, payload)?)
            }
            "progress" => GroundingEvent::Progress(common::progress(event_name, payload)?),
            "complete" => GroundingEvent::Complete(map_summary(event_name, payload)?),
            "error" => GroundingEvent::Error(common::backend_error(event_name, payload)?),
            _ => GroundingEvent::Unknown {
                name: event_name.to_string(),
                payload,
            },
        })
    }
}

/// Normalized grounding event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroundingEvent {
    Status(StatusMessage),
    SceneStart(SceneStart),
    Candidate(CandidateFound),
    SceneComplete(SceneComplete),
    Progress(ProgressUpdate),
    Complete(GroundingSummary),
    Error(BackendError),
    Unknown {
        name: String,
        payload: serde_json::Value,
    },
}

impl DomainEvent for GroundingEvent {
    fn name(&self) -> &str {
        match self {
            Self::Status(_) => "status",
            Self::SceneStart(_) => "scene_start",
            Self::Candidate(_) => "candidate",
            Self::SceneComplete(_) => "scene_complete",
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

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SceneStart {
    pub scene_id: String,
    pub scene_header: String,
    pub worker_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateFound {
    pub scene_id: String,
    pub candidate: LocationCandidate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SceneComplete {
    pub scene_id: String,
    pub scene_header: String,
    pub candidates_found: usize,
    pub candidates: Vec<LocationCandidate>,
    pub query_used: Option<String>,
    /// Backend processing time in seconds.
    pub processing_time: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroundingSummary {
    pub success: bool,
    pub total_scenes: Option<usize>,
    pub total_candidates: Option<usize>,
    pub workers_used: Option<u32>,
    pub message: Option<String>,
}

/// Workflow status of a discovered venue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    #[default]
    Discovered,
    CallPending,
    CallInProgress,
    CallCompleted,
    CallFailed,
    HumanReview,
    Approved,
    Rejected,
    Booked,
}

impl CandidateStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "discovered" => Self::Discovered,
            "call_pending" => Self::CallPending,
            "call_in_progress" => Self::CallInProgress,
            "call_completed" => Self::CallCompleted,
            "call_failed" => Self::CallFailed,
            "human_review" => Self::HumanReview,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "booked" => Self::Booked,
            _ => return None,
        })
    }
}

/// Status of the outbound voice call to a venue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VapiCallStatus {
    #[default]
    NotInitiated,
    Queued,
    Ringing,
    InProgress,
    Completed,
    Voicemail,
    NoAnswer,
    Busy,
    Failed,
    NoPhoneNumber,
}

impl VapiCallStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "not_initiated" => Self::NotInitiated,
            "queued" => Self::Queued,
            "ringing" => Self::Ringing,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "voicemail" => Self::Voicemail,
            "no_answer" => Self::NoAnswer,
            "busy" => Self::Busy,
            "failed" => Self::Failed,
            "no_phone_number" => Self::NoPhoneNumber,
            _ => return None,
        })
    }
}

/// A real-world venue proposed for a scene.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationCandidate {
    pub id: String,
    pub scene_id: String,
    pub project_id: String,
    pub google_place_id: Option<String>,
    pub venue_name: String,
    pub formatted_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub phone_number: Option<String>,
    pub website_url: Option<String>,
    pub google_rating: Option<f64>,
    pub google_review_count: u32,
    /// 1-4 scale.
    pub price_level: Option<u8>,
    pub photo_urls: Vec<String>,
    pub photo_attributions: Vec<String>,
    pub match_score: f64,
    pub match_reasoning: String,
    pub distance_from_center_km: f64,
    /// Vision model's 0-1 fit with the scene's vibe, when photos were analyzed.
    pub visual_vibe_score: Option<f64>,
    pub visual_features_detected: Vec<String>,
    pub visual_concerns: Vec<String>,
    pub red_flags: Vec<String>,
    pub status: CandidateStatus,
    pub vapi_call_status: VapiCallStatus,
}

#[derive(Deserialize)]
struct WireSceneStart {
    scene_id: Option<String>,
    scene_header: Option<String>,
    worker_id: Option<u32>,
}

#[derive(Deserialize)]
struct WireCandidate {
    id: Option<String>,
    scene_id: Option<String>,
    project_id: Option<String>,
    google_place_id: Option<String>,
    venue_name: Option<String>,
    formatted_address: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    phone_number: Option<String>,
    website_url: Option<String>,
    google_rating: Option<f64>,
    google_review_count: Option<u32>,
    price_level: Option<u8>,
    photo_urls: Option<Vec<String>>,
    photo_attributions: Option<Vec<String>>,
    match_score: Option<f64>,
    match_reasoning: Option<String>,
    distance_from_center_km: Option<f64>,
    visual_vibe_score: Option<f64>,
    visual_features_detected: Option<Vec<String>>,
    visual_concerns: Option<Vec<String>>,
    red_flags: Option<Vec<String>>,
    status: Option<String>,
    vapi_call_status: Option<String>,
}

#[derive(Deserialize)]
struct WireCandidateFound {
    scene_id: Option<String>,
    candidate: Option<WireCandidate>,
}

#[derive(Deserialize)]
struct WireSceneComplete {
    scene_id: Option<String>,
    scene_header: Option<String>,
    candidates_found: Option<usize>,
    candidates: Option<Vec<WireCandidate>>,
    query_used: Option<String>,
    processing_time: Option<f64>,
}

#[derive(Deserialize)]
struct WireSummary {
    success: Option<bool>,
    total_scenes: Option<usize>,
    total_candidates: Option<usize>,
    workers_used: Option<u32>,
    message: Option<String>,
}

fn map_scene_start(event: &str, payload: serde_json::Value) -> Result<SceneStart, NormalizeError> {
    let wire: WireSceneStart = wire_payload(event, payload)?;
    Ok(SceneStart {
        scene_id: required(event, "scene_id", non_blank(wire.scene_id))?,
        scene_header: wire.scene_header.unwrap_or_default(),
        worker_id: wire.worker_id,
    })
}

fn map_candidate_found(
    event: &str,
    payload: serde_json::Value,
) -> Result<CandidateFound, NormalizeError> {
    let wire: WireCandidateFound = wire_payload(event, payload)?;
    let wire_candidate = required(event, "candidate", wire.candidate)?;
    let candidate = map_candidate(event, wire_candidate, wire.scene_id.as_deref())?;
    let scene_id = required(
        event,
        "scene_id",
        non_blank(wire.scene_id).or_else(|| non_blank(Some(candidate.scene_id.clone()))),
    )?;
    Ok(CandidateFound {
        scene_id,
        candidate,
    })
}

fn map_scene_complete(
    event: &str,
    payload: serde_json::Value,
) -> Result<SceneComplete, NormalizeError> {
    let wire: WireSceneComplete = wire_payload(event, payload)?;
    let scene_id = required(event, "scene_id", non_blank(wire.scene_id))?;
    // A bad nested candidate must not hide the scene's completion.
    let candidates: Vec<LocationCandidate> = wire
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| match map_candidate(event, c, Some(&scene_id)) {
            Ok(candidate) => Some(candidate),
            Err(err) => {
                warn!(
                    event,
                    scene_id = %scene_id,
                    error = %err,
                    "skipping malformed nested candidate"
                );
                None
            }
        })
        .collect();
    Ok(SceneComplete {
        candidates_found: wire.candidates_found.unwrap_or(candidates.len()),
        scene_id,
        scene_header: wire.scene_header.unwrap_or_default(),
        candidates,
        query_used: non_blank(wire.query_used),
        processing_time: wire.processing_time,
    })
}

fn map_candidate(
    event: &str,
    wire: WireCandidate,
    scene_id: Option<&str>,
) -> Result<LocationCandidate, NormalizeError> {
    Ok(LocationCandidate {
        id: wire.id.unwrap_or_default(),
        scene_id: non_blank(wire.scene_id)
            .or_else(|| scene_id.map(str::to_string))
            .unwrap_or_default(),
        project_id: wire.project_id.unwrap_or_default(),
        google_place_id: non_blank(wire.google_place_id),
        venue_name: required(event, "venue_name", non_blank(wire.venue_name))?,
        formatted_address: wire.formatted_address.unwrap_or_default(),
        latitude: wire.latitude.unwrap_or_default(),
        longitude: wire.longitude.unwrap_or_default(),
        phone_number: non_blank(wire.phone_number),
        website_url: non_blank(wire.website_url),
        google_rating: wire.google_rating,
        google_review_count: wire.google_review_count.unwrap_or(0),
        price_level: wire.price_level,
        photo_urls: wire.photo_urls.unwrap_or_default(),
        photo_attributions: wire.photo_attributions.unwrap_or_default(),
        match_score: wire.match_score.map(|s| s.clamp(0.0, 1.0)).unwrap_or(0.0),
        match_reasoning: wire.match_reasoning.unwrap_or_default(),
        distance_from_center_km: wire.distance_from_center_km.unwrap_or(0.0),
        visual_vibe_score: wire.visual_vibe_score,
        visual_features_detected: wire.visual_features_detected.unwrap_or_default(),
        visual_concerns: wire.visual_concerns.unwrap_or_default(),
        red_flags: wire.red_flags.unwrap_or_default(),
        status: wire
            .status
            .as_deref()
            .and_then(CandidateStatus::parse)
            .unwrap_or_default(),
        vapi_call_status: wire
            .vapi_call_status
            .as_deref()
            .and_then(VapiCallStatus::parse)
            .unwrap_or_default(),
    })
}

fn map_summary(event: &str, payload: serde_json::Value) -> Result<GroundingSummary, NormalizeError> {
    let wire: WireSummary = wire_payload(event, payload)?;
    Ok(GroundingSummary {
        success: wire.success.unwrap_or(true),
        total_scenes: wire.total_scenes,
        total_candidates: wire.total_candidates,
        workers_used: wire.workers_used,
        message: non_blank(wire.message),
    })
}

/// Coarse stage of a grounding run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingPhase {
    Pending,
    Starting,
    Grounding,
    Complete,
    Failed,
}

/// Phase and aggregates derived from a grounding event sequence.
#[derive(Clone, Debug)]
pub struct GroundingProgress {
    phases: PhaseLog<GroundingPhase>,
    pub total_scenes: Option<usize>,
    pub scenes_started: Vec<String>,
    pub scenes_completed: Vec<String>,
    pub failed_scenes: Vec<String>,
    pub candidates_per_scene: BTreeMap<String, usize>,
    pub candidates_seen: usize,
    /// Most recently discovered venue.
    pub latest_candidate: Option<LocationCandidate>,
    pub progress: Option<ProgressUpdate>,
    pub summary: Option<GroundingSummary>,
    pub last_status: Option<String>,
    pub error: Option<String>,
}

impl Default for GroundingProgress {
    fn default() -> Self {
        Self {
            phases: PhaseLog::new(GroundingPhase::Pending),
            total_scenes: None,
            scenes_started: Vec::new(),
            scenes_completed: Vec::new(),
            failed_scenes: Vec::new(),
            candidates_per_scene: BTreeMap::new(),
            candidates_seen: 0,
            latest_candidate: None,
            progress: None,
            summary: None,
            last_status: None,
            error: None,
        }
    }
}

static GROUNDING_RULES: Lazy<PhaseRules<GroundingProgress>> = Lazy::new(|| {
    PhaseRules::new(&[(
        "starting",
        r"(?i)\bstarting\b.*\bgrounding\b",
        GroundingProgress::on_starting,
    )])
});

impl GroundingProgress {
    /// Scenes started but neither completed nor failed.
    pub fn scenes_in_flight(&self) -> usize {
        self.scenes_started
            .iter()
            .filter(|id| !self.scenes_completed.contains(*id) && !self.failed_scenes.contains(*id))
            .count()
    }

    fn on_starting(&mut self, count: Option<usize>) {
        self.phases.advance(GroundingPhase::Starting);
        if count.is_some() {
            self.total_scenes = count;
        }
    }
}

impl PhaseTracker for GroundingProgress {
    type Event = GroundingEvent;
    type Phase = GroundingPhase;

    fn observe(&mut self, event: &GroundingEvent) {
        match event {
            GroundingEvent::Status(status) => {
                let matched = GROUNDING_RULES.apply(self, &status.message);
                trace!(message = %status.message, ?matched, "grounding status");
                self.last_status = Some(status.message.clone());
            }
            GroundingEvent::SceneStart(start) => {
                self.phases.advance(GroundingPhase::Grounding);
                if !self.scenes_started.contains(&start.scene_id) {
                    self.scenes_started.push(start.scene_id.clone());
                }
            }
            GroundingEvent::Candidate(found) => {
                self.phases.advance(GroundingPhase::Grounding);
                self.candidates_seen += 1;
                *self
                    .candidates_per_scene
                    .entry(found.scene_id.clone())
                    .or_default() += 1;
                self.latest_candidate = Some(found.candidate.clone());
            }
            GroundingEvent::SceneComplete(done) => {
                self.candidates_per_scene
                    .entry(done.scene_id.clone())
                    .or_default();
                if !self.scenes_completed.contains(&done.scene_id) {
                    self.scenes_completed.push(done.scene_id.clone());
                }
            }
            GroundingEvent::Progress(update) => self.progress = Some(*update),
            GroundingEvent::Complete(summary) => {
                self.phases.force(GroundingPhase::Complete);
                self.summary = Some(summary.clone());
            }
            GroundingEvent::Error(err) => match &err.scene_id {
                Some(scene_id) => {
                    if !self.failed_scenes.contains(scene_id) {
                        self.failed_scenes.push(scene_id.clone());
                    }
                }
                None => {
                    if self.phases.current() != GroundingPhase::Complete {
                        self.phases.force(GroundingPhase::Failed);
                    }
                    self.error = Some(err.message.clone());
                }
            },
            GroundingEvent::Unknown { .. } => {}
        }
    }

    fn phase(&self) -> GroundingPhase {
        self.phases.current()
    }

    fn history(&self) -> &[GroundingPhase] {
        self.phases.history()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate_payload(scene_id: &str, venue: &str) -> serde_json::Value {
        json!({
            "scene_id": scene_id,
            "candidate": {
                "id": format!("{scene_id}-{venue}"),
                "scene_id": scene_id,
                "project_id": "p1",
                "venue_name": venue,
                "formatted_address": "1 Main St, Los Angeles, CA",
                "latitude": 34.05,
                "longitude": -118.24,
                "google_rating": 4.5,
                "price_level": null,
                "photo_attributions": ["<a href=\"https://maps.google.com/\">J. Doe</a>"],
                "match_score": 0.82,
                "visual_vibe_score": 0.74,
                "visual_features_detected": ["brick walls", "loading dock"],
                "visual_concerns": ["freeway noise"],
                "status": "discovered",
                "vapi_call_status": "not_initiated"
            }
        })
    }

    #[test]
    fn candidate_maps_backend_fields() {
        let event = LocationGrounding::normalize("candidate", candidate_payload("s1", "Warehouse 9"))
            .expect("candidate");
        let GroundingEvent::Candidate(found) = event else {
            panic!("expected candidate");
        };
        assert_eq!(found.scene_id, "s1");
        assert_eq!(found.candidate.venue_name, "Warehouse 9");
        assert_eq!(found.candidate.google_rating, Some(4.5));
        assert_eq!(found.candidate.price_level, None);
        assert_eq!(found.candidate.status, CandidateStatus::Discovered);
        assert_eq!(found.candidate.google_review_count, 0);
        assert_eq!(found.candidate.photo_attributions.len(), 1);
        assert!(found.candidate.photo_attributions[0].contains("J. Doe"));
        assert_eq!(found.candidate.visual_vibe_score, Some(0.74));
        assert_eq!(
            found.candidate.visual_features_detected,
            vec!["brick walls", "loading dock"]
        );
        assert_eq!(found.candidate.visual_concerns, vec!["freeway noise"]);
    }

    #[test]
    fn candidate_without_visual_analysis_defaults_empty() {
        let event = LocationGrounding::normalize(
            "candidate",
            json!({"scene_id": "s1", "candidate": {"venue_name": "Diner"}}),
        )
        .expect("candidate");
        let GroundingEvent::Candidate(found) = event else {
            panic!("expected candidate");
        };
        assert!(found.candidate.photo_attributions.is_empty());
        assert_eq!(found.candidate.visual_vibe_score, None);
        assert!(found.candidate.visual_features_detected.is_empty());
        assert!(found.candidate.visual_concerns.is_empty());
    }

    #[test]
    fn candidate_scene_falls_back_to_nested_scene_id() {
        let event = LocationGrounding::normalize(
            "candidate",
            json!({"candidate": {"scene_id": "s9", "venue_name": "Diner", "status": "mystery"}}),
        )
        .expect("candidate");
        let GroundingEvent::Candidate(found) = event else {
            panic!("expected candidate");
        };
        assert_eq!(found.scene_id, "s9");
        assert_eq!(found.candidate.status, CandidateStatus::Discovered);
    }

    #[test]
    fn candidate_without_venue_name_is_rejected() {
        let err = LocationGrounding::normalize(
            "candidate",
            json!({"scene_id": "s1", "candidate": {"formatted_address": "?"}}),
        )
        .expect_err("missing venue");
        assert!(matches!(err, NormalizeError::MissingField { field: "venue_name", .. }));
    }

    #[test]
    fn scene_complete_defaults_count_to_candidate_list() {
        let event = LocationGrounding::normalize(
            "scene_complete",
            json!({
                "scene_id": "s1",
                "scene_header": "INT. DINER - DAY",
                "candidates": [{"venue_name": "Rosie's"}],
                "query_used": "retro diner los angeles",
                "processing_time": 4.2
            }),
        )
        .expect("scene_complete");
        let GroundingEvent::SceneComplete(done) = event else {
            panic!("expected scene_complete");
        };
        assert_eq!(done.candidates_found, 1);
        assert_eq!(done.candidates[0].scene_id, "s1");
        assert_eq!(done.query_used.as_deref(), Some("retro diner los angeles"));
    }

    #[test]
    fn scene_complete_skips_nested_candidate_without_venue() {
        let event = LocationGrounding::normalize(
            "scene_complete",
            json!({
                "scene_id": "s2",
                "candidates_found": 2,
                "candidates": [{"venue_name": "A"}, {"venue_name": null}]
            }),
        )
        .expect("scene_complete survives a bad nested candidate");
        let GroundingEvent::SceneComplete(done) = event else {
            panic!("expected scene_complete");
        };
        assert_eq!(done.scene_id, "s2");
        assert_eq!(done.candidates.len(), 1);
        assert_eq!(done.candidates[0].venue_name, "A");
        assert_eq!(done.candidates_found, 2);

        let mut progress = GroundingProgress::default();
        progress.observe(&GroundingEvent::SceneComplete(done));
        assert_eq!(progress.scenes_completed, vec!["s2"]);
    }

    #[test]
    fn tracker_aggregates_scenes_and_candidates() {
        let mut progress = GroundingProgress::default();
        let events = vec![
            GroundingEvent::Status(StatusMessage {
                message: "Starting parallel grounding for 2 scenes with 2 workers".into(),
            }),
            LocationGrounding::normalize(
                "scene_start",
                json!({"scene_id": "a", "scene_header": "EXT. PIER", "worker_id": 0}),
            )
            .expect("start"),
            LocationGrounding::normalize("candidate", candidate_payload("a", "Santa Monica Pier"))
                .expect("candidate"),
            LocationGrounding::normalize(
                "scene_start",
                json!({"scene_id": "b", "scene_header": "INT. VAULT", "worker_id": 1}),
            )
            .expect("start"),
            LocationGrounding::normalize("error", json!({"scene_id": "b", "error": "no results"}))
                .expect("error"),
        ];
        for event in &events {
            progress.observe(event);
        }
        assert_eq!(progress.phase(), GroundingPhase::Grounding);
        assert_eq!(progress.total_scenes, Some(2));
        assert_eq!(progress.candidates_seen, 1);
        assert_eq!(progress.candidates_per_scene.get("a"), Some(&1));
        assert_eq!(progress.failed_scenes, vec!["b"]);
        assert_eq!(progress.scenes_in_flight(), 1);
        assert_eq!(
            progress.latest_candidate.as_ref().map(|c| c.venue_name.as_str()),
            Some("Santa Monica Pier")
        );
        assert_eq!(
            progress.history(),
            &[
                GroundingPhase::Pending,
                GroundingPhase::Starting,
                GroundingPhase::Grounding
            ]
        );
    }

    #[test]
    fn unscoped_error_fails_and_complete_wins() {
        let mut progress = GroundingProgress::default();
        progress.observe(&GroundingEvent::Error(BackendError {
            message: "grounding service unavailable".into(),
            scene_id: None,
        }));
        assert_eq!(progress.phase(), GroundingPhase::Failed);

        let mut progress = GroundingProgress::default();
        progress.observe(
            &LocationGrounding::normalize("complete", json!({"total_candidates": 0}))
                .expect("complete"),
        );
        progress.observe(&GroundingEvent::Error(BackendError {
            message: "late".into(),
            scene_id: None,
        }));
        assert_eq!(progress.phase(), GroundingPhase::Complete);
    }
}
