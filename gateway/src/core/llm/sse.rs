//! Incremental server-sent events line parsing.

/// A `data:` payload pulled out of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Payload(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Splits a byte stream into complete SSE lines.
///
/// Bytes are held until a newline arrives so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every `data:` payload it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseData> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = parse_line(&String::from_utf8_lossy(&line)) {
                out.push(data);
            }
        }
        out
    }

    /// Parse whatever remains once the body has ended.
    pub fn finish(&mut self) -> Option<SseData> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&String::from_utf8_lossy(&rest))
    }
}

fn parse_line(line: &str) -> Option<SseData> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseData::Done);
    }
    Some(SseData::Payload(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(
            buffer.push(b":1}\n\n: keep-alive\ndata:[DONE]\n"),
            vec![
                SseData::Payload("{\"a\":1}".to_string()),
                SseData::Done
            ]
        );
    }

    #[test]
    fn test_multibyte_char_split() {
        let text = "data: caf\u{e9}\n".as_bytes();
        let (head, tail) = text.split_at(10);
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(head).is_empty());
        assert_eq!(buffer.push(tail), vec![SseData::Payload("caf\u{e9}".into())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"event: x\r\ndata: tail").is_empty());
        assert_eq!(buffer.finish(), Some(SseData::Payload("tail".into())));
        assert_eq!(buffer.finish(), None);
    }
}
