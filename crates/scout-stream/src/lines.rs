/// Reassembles complete text lines from arbitrarily split byte chunks.
///
/// The buffer always holds exactly the bytes after the last `\n` seen so far.
/// Lines are decoded only once complete, so a multi-byte UTF-8 sequence split
/// across two chunks decodes the same as if it arrived whole.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    buf: Vec<u8>,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, in order.
    ///
    /// Returned lines have the `\n` terminator (and a preceding `\r`, if any)
    /// removed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        // Only the new bytes can contain a terminator; the retained suffix has none.
        let mut start = 0;
        let mut scan_from = self.buf.len();
        self.buf.extend_from_slice(chunk);
        while let Some(offset) = self.buf[scan_from..].iter().position(|b| *b == b'\n') {
            let end = scan_from + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            scan_from = start;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        lines
    }

    /// Bytes received since the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Discards any unterminated trailing line, returning how many bytes were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_for_partition(input: &[u8], cuts: &[usize]) -> Vec<String> {
        let mut acc = LineAccumulator::new();
        let mut out = Vec::new();
        let mut prev = 0;
        for &cut in cuts.iter().chain(std::iter::once(&input.len())) {
            out.extend(acc.push_chunk(&input[prev..cut]));
            prev = cut;
        }
        out
    }

    #[test]
    fn retains_partial_trailing_line() {
        let mut acc = LineAccumulator::new();
        assert_eq!(acc.push_chunk(b"event: sta"), Vec::<String>::new());
        assert_eq!(acc.pending(), b"event: sta");
        assert_eq!(acc.push_chunk(b"tus\ndata: {}"), vec!["event: status"]);
        assert_eq!(acc.pending(), b"data: {}");
        assert_eq!(acc.push_chunk(b"\n\n"), vec!["data: {}", ""]);
        assert!(acc.pending().is_empty());
    }

    #[test]
    fn strips_carriage_returns() {
        let mut acc = LineAccumulator::new();
        assert_eq!(
            acc.push_chunk(b"event: status\r\ndata: {}\r\n\r\n"),
            vec!["event: status", "data: {}", ""]
        );
    }

    #[test]
    fn crlf_split_between_chunks_matches_single_chunk() {
        let whole = lines_for_partition(b"a\r\nb\r\n", &[]);
        let split = lines_for_partition(b"a\r\nb\r\n", &[2]);
        assert_eq!(whole, split);
        assert_eq!(whole, vec!["a", "b"]);
    }

    #[test]
    fn every_two_way_split_yields_identical_lines() {
        let input = "event: status\ndata: {\"message\":\"Café scene ✓\"}\n\n: keep-alive\n\nevent: x\n"
            .as_bytes();
        let expected = lines_for_partition(input, &[]);
        assert_eq!(expected.len(), 6);
        assert_eq!(expected[1], "data: {\"message\":\"Café scene ✓\"}");
        for cut in 0..=input.len() {
            assert_eq!(lines_for_partition(input, &[cut]), expected, "cut at {cut}");
        }
        let every_byte: Vec<usize> = (1..input.len()).collect();
        assert_eq!(lines_for_partition(input, &every_byte), expected);
    }

    #[test]
    fn clear_drops_unterminated_suffix() {
        let mut acc = LineAccumulator::new();
        acc.push_chunk(b"line\npartial");
        assert_eq!(acc.clear(), 7);
        assert!(acc.pending().is_empty());
    }
}
