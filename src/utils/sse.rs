use bytes::{BufMut, Bytes, BytesMut};

/// Splits an upstream byte stream into complete lines, keeping the trailing
/// partial line buffered between chunks so multi-byte UTF-8 sequences and
/// frames that straddle chunk boundaries are reassembled correctly.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    residual: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every complete line in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.residual.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.residual.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.residual.drain(..=pos).collect();
            line.pop(); // \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drains whatever is buffered after the final chunk.
    pub fn take_residual(&mut self) -> Option<String> {
        if self.residual.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.residual).into_owned();
        self.residual.clear();
        Some(line)
    }
}

/// Encodes one SSE data frame.
pub fn data_frame(payload: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_slice(b"data: ");
    buf.put_slice(payload.as_bytes());
    buf.put_slice(b"\n\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_lines() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b"data: one\n\ndata: two\n");
        assert_eq!(lines, vec!["data: one", "", "data: two"]);
        assert_eq!(buffer.take_residual(), None);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: hel").is_empty());
        let lines = buffer.push(b"lo\n");
        assert_eq!(lines, vec!["data: hello"]);
    }

    #[test]
    fn test_byte_by_byte() {
        let mut buffer = SseLineBuffer::new();
        let mut lines = Vec::new();
        for b in b"data: hello\n\n" {
            lines.extend(buffer.push(&[*b]));
        }
        assert_eq!(lines, vec!["data: hello", ""]);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b"data: x\r\n\r\n");
        assert_eq!(lines, vec!["data: x", ""]);
    }

    #[test]
    fn test_utf8_split_inside_line() {
        let mut buffer = SseLineBuffer::new();
        // 🚀 is F0 9F 9A 80; split in the middle of the sequence.
        assert!(buffer.push(&[b'd', b'a', b't', b'a', b':', b' ', 0xF0, 0x9F]).is_empty());
        let lines = buffer.push(&[0x9A, 0x80, b'\n']);
        assert_eq!(lines, vec!["data: 🚀"]);
    }

    #[test]
    fn test_residual_flush() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: [DONE]").is_empty());
        assert_eq!(buffer.take_residual().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.take_residual(), None);
    }

    #[test]
    fn test_data_frame_encoding() {
        assert_eq!(data_frame("{}").as_ref(), b"data: {}\n\n");
        assert_eq!(data_frame("[DONE]").as_ref(), b"data: [DONE]\n\n");
    }
}
