use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::frame::FrameAssembler;
use crate::lines::LineAccumulator;
use crate::normalize::normalize_frame;
use crate::pipelines::Pipeline;

/// Incremental decoder from raw response bytes to `P`'s domain events.
///
/// Chains line accumulation, frame assembly and normalization. The output for
/// a given byte sequence does not depend on how it was split into chunks.
pub struct EventDecoder<P: Pipeline> {
    lines: LineAccumulator,
    frames: FrameAssembler,
    dropped: u64,
    _pipeline: PhantomData<fn() -> P>,
}

impl<P: Pipeline> Default for EventDecoder<P> {
    fn default() -> Self {
        Self {
            lines: LineAccumulator::new(),
            frames: FrameAssembler::new(),
            dropped: 0,
            _pipeline: PhantomData,
        }
    }
}

impl<P: Pipeline> EventDecoder<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events it completed, in wire order.
    ///
    /// A frame whose payload fails to parse or map is logged and skipped; the
    /// frames around it are unaffected.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<P::Event> {
        let mut events = Vec::new();
        for line in self.lines.push_chunk(chunk) {
            let Some(frame) = self.frames.push_line(&line) else {
                continue;
            };
            match normalize_frame::<P>(&frame) {
                Ok(event) => events.push(event),
                Err(err) => {
                    self.dropped += 1;
                    warn!(
                        pipeline = %P::ID,
                        event = %frame.event_name,
                        error = %err,
                        "dropping malformed frame"
                    );
                }
            }
        }
        events
    }

    /// Ends the stream. An unterminated line or an unflushed frame is
    /// discarded, never emitted.
    pub fn finish(&mut self) {
        let partial_bytes = self.lines.clear();
        let partial_frame = self.frames.has_pending();
        self.frames = FrameAssembler::new();
        if partial_bytes > 0 || partial_frame {
            debug!(
                pipeline = %P::ID,
                partial_bytes,
                partial_frame,
                "discarding incomplete frame at end of stream"
            );
        }
    }

    /// Number of frames skipped because their payload was malformed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::{
        AnalysisEvent, GroundingEvent, LocationGrounding, ScriptAnalysis, StatusMessage,
    };

    const ANALYSIS_BODY: &str = "event: status\n\
        data: {\"message\": \"Extracted 12 pages\"}\n\
        \n\
        event: location\n\
        data: {\"scene_id\": \"SC_001\", \"scene_header\": \"INT. CAF\u{c9} \u{2713} - DAY\"}\n\
        \n\
        event: progress\n\
        data: {\"processed\": 1, \"total\": 2}\n\
        \n\
        event: complete\n\
        data: {\"success\": true, \"total_locations\": 1}\n\
        \n";

    fn decode_all<P: Pipeline>(chunks: &[&[u8]]) -> Vec<P::Event> {
        let mut decoder = EventDecoder::<P>::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push_chunk(chunk));
        }
        decoder.finish();
        events
    }

    fn names(events: &[AnalysisEvent]) -> Vec<String> {
        use crate::normalize::DomainEvent;
        events.iter().map(|e| e.name().to_string()).collect()
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let body = ANALYSIS_BODY.as_bytes();
        let whole = decode_all::<ScriptAnalysis>(&[body]);
        assert_eq!(names(&whole), ["status", "location", "progress", "complete"]);

        let bytewise: Vec<&[u8]> = body.chunks(1).collect();
        assert_eq!(decode_all::<ScriptAnalysis>(&bytewise), whole);

        for cut in 1..body.len() {
            let (head, tail) = body.split_at(cut);
            assert_eq!(
                decode_all::<ScriptAnalysis>(&[head, tail]),
                whole,
                "split at byte {cut}"
            );
        }
    }

    #[test]
    fn multibyte_text_survives_byte_splits() {
        let bytewise: Vec<&[u8]> = ANALYSIS_BODY.as_bytes().chunks(1).collect();
        let events = decode_all::<ScriptAnalysis>(&bytewise);
        let AnalysisEvent::Location(location) = &events[1] else {
            panic!("expected location, got {:?}", events[1]);
        };
        assert_eq!(location.scene_header, "INT. CAF\u{c9} \u{2713} - DAY");
    }

    #[test]
    fn frame_without_blank_line_is_never_emitted() {
        let mut decoder = EventDecoder::<ScriptAnalysis>::new();
        let events = decoder.push_chunk(b"event: status\ndata: {\"message\": \"hi\"}\n");
        assert!(events.is_empty());
        decoder.finish();
        assert!(decoder.push_chunk(b"\n").is_empty());
    }

    #[test]
    fn frame_missing_data_is_never_emitted() {
        let events = decode_all::<ScriptAnalysis>(&[b"event: status\n\nevent: status\n\n"]);
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_payload_is_isolated() {
        let body = "event: status\ndata: {\"message\": \"one\"}\n\n\
                    event: status\ndata: {broken\n\n\
                    event: status\ndata: {\"message\": \"three\"}\n\n";
        let mut decoder = EventDecoder::<ScriptAnalysis>::new();
        let events = decoder.push_chunk(body.as_bytes());
        assert_eq!(
            events,
            vec![
                AnalysisEvent::Status(StatusMessage {
                    message: "one".into()
                }),
                AnalysisEvent::Status(StatusMessage {
                    message: "three".into()
                }),
            ]
        );
        assert_eq!(decoder.dropped_frames(), 1);
    }

    #[test]
    fn grounding_frames_decode_with_crlf_endings() {
        let body = "event: scene_start\r\n\
                    data: {\"scene_id\": \"s1\", \"scene_header\": \"EXT. PIER - DUSK\", \"worker_id\": 2}\r\n\
                    \r\n\
                    event: candidate\r\n\
                    data: {\"scene_id\": \"s1\", \"candidate\": {\"venue_name\": \"Santa Monica Pier\", \"match_score\": 0.9}}\r\n\
                    \r\n";
        let events = decode_all::<LocationGrounding>(&[body.as_bytes()]);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], GroundingEvent::SceneStart(start) if start.worker_id == Some(2)));
        match &events[1] {
            GroundingEvent::Candidate(found) => {
                assert_eq!(found.scene_id, "s1");
                assert_eq!(found.candidate.venue_name, "Santa Monica Pier");
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }
}
