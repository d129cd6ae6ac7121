const EVENT_MARKER: &str = "event:";
const DATA_MARKER: &str = "data:";

/// One `event:`/`data:`/blank-line unit taken off the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFrame {
    pub event_name: String,
    pub raw_payload: String,
}

/// Groups complete lines into frames.
///
/// `event:` and `data:` lines overwrite the pending value; multi-line payloads
/// are not part of this protocol. A blank line flushes the pending frame only
/// when both fields are non-empty.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: EventFrame,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one complete line, returning a frame when the line terminates one.
    pub fn push_line(&mut self, line: &str) -> Option<EventFrame> {
        if line.is_empty() {
            return self.flush();
        }
        if let Some(rest) = line.strip_prefix(EVENT_MARKER) {
            self.pending.event_name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix(DATA_MARKER) {
            self.pending.raw_payload = rest.trim().to_string();
        }
        // Comments, keep-alives, `id:` and `retry:` lines are ignored.
        None
    }

    /// True when an event name or payload is waiting for its blank line.
    pub fn has_pending(&self) -> bool {
        !self.pending.event_name.is_empty() || !self.pending.raw_payload.is_empty()
    }

    fn flush(&mut self) -> Option<EventFrame> {
        if self.pending.event_name.is_empty() || self.pending.raw_payload.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(lines: &[&str]) -> Vec<EventFrame> {
        let mut assembler = FrameAssembler::new();
        lines
            .iter()
            .filter_map(|line| assembler.push_line(line))
            .collect()
    }

    #[test]
    fn assembles_event_and_data_into_frame() {
        let frames = feed(&["event: status", "data: {\"message\":\"hi\"}", ""]);
        assert_eq!(
            frames,
            vec![EventFrame {
                event_name: "status".into(),
                raw_payload: "{\"message\":\"hi\"}".into(),
            }]
        );
    }

    #[test]
    fn name_without_payload_is_not_flushed() {
        assert!(feed(&["event: status", ""]).is_empty());
    }

    #[test]
    fn payload_without_name_is_not_flushed() {
        assert!(feed(&["data: {}", ""]).is_empty());
    }

    #[test]
    fn later_lines_overwrite_earlier_values() {
        let frames = feed(&["event: a", "data: 1", "event: b", "data: 2", ""]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_name, "b");
        assert_eq!(frames[0].raw_payload, "2");
    }

    #[test]
    fn fields_reset_after_flush() {
        let frames = feed(&["event: a", "data: 1", "", "data: 2", ""]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn unrecognized_lines_are_ignored() {
        let frames = feed(&[
            ": keep-alive",
            "id: 7",
            "retry: 1000",
            "event: progress",
            "data: {\"processed\":1}",
            "",
        ]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_name, "progress");
    }

    #[test]
    fn unpadded_markers_are_accepted() {
        let frames = feed(&["event:complete", "data:{}", ""]);
        assert_eq!(frames[0].event_name, "complete");
        assert_eq!(frames[0].raw_payload, "{}");
    }

    #[test]
    fn blank_line_between_frames_is_a_no_op() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push_line("").is_none());
        assert!(!assembler.has_pending());
        assembler.push_line("event: status");
        assert!(assembler.has_pending());
    }
}
