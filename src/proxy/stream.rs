use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::service::translate::{transform_stream_frame, StreamContext, WireFamily};
use crate::utils::generate_chat_id;
use crate::utils::sse::{data_frame, SseLineBuffer};

const DONE_LINE: &str = "data: [DONE]";
const DATA_PREFIX: &str = "data:";

/// Pull-based byte transducer from an upstream SSE body to OpenAI
/// `chat.completion.chunk` SSE frames.
///
/// `transform(concat(a, b)) == concat(transform(a), transform(b))`: partial
/// lines are buffered between `process` calls, so chunk boundaries never
/// change the output.
pub struct StreamTransformer {
    family: WireFamily,
    ctx: StreamContext,
    lines: SseLineBuffer,
}

impl StreamTransformer {
    pub fn new(family: WireFamily, public_model: &str) -> Self {
        Self {
            family,
            ctx: StreamContext {
                chat_id: generate_chat_id(),
                created: Utc::now().timestamp(),
                model: public_model.to_string(),
            },
            lines: SseLineBuffer::new(),
        }
    }

    /// Feeds one upstream chunk and returns the bytes to emit downstream.
    pub fn process(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        for line in self.lines.push(chunk) {
            self.handle_line(line.trim(), &mut out);
        }
        out.freeze()
    }

    /// Flushes the residual line and terminates the downstream stream.
    pub fn finish(&mut self) -> Bytes {
        let mut out = BytesMut::new();
        if let Some(residual) = self.lines.take_residual() {
            if residual.trim() == DONE_LINE {
                out.extend_from_slice(&data_frame("[DONE]"));
            }
        }
        out.extend_from_slice(&data_frame("[DONE]"));
        out.freeze()
    }

    fn handle_line(&self, line: &str, out: &mut BytesMut) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if line == DONE_LINE {
            out.extend_from_slice(&data_frame("[DONE]"));
            return;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let frame: Value = match serde_json::from_str(payload.trim()) {
            Ok(value) => value,
            Err(e) => {
                debug!("skipping unparseable stream frame: {} ({})", payload, e);
                return;
            }
        };
        if let Some(chunk) = transform_stream_frame(self.family, &frame, &self.ctx) {
            match serde_json::to_string(&chunk) {
                Ok(json) => out.extend_from_slice(&data_frame(&json)),
                Err(e) => debug!("failed to serialize transformed chunk: {}", e),
            }
        }
    }
}
