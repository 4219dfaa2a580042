use serde_json::Value;

use crate::events::AgnoFrame;

const DONE_SENTINEL: &str = "[DONE]";
const DATA_PREFIX: &str = "data:";

/// Incremental decoder for the newline-delimited run stream.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character split
/// across reads is decoded only once it is complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Feed arbitrary bytes into the decoder and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<AgnoFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=split).collect();
            if let Some(frame) = decode_line(&line[..split]) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush the trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Option<AgnoFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }

    /// Decode a complete payload string in one shot, including a trailing
    /// line without a newline.
    pub fn decode_all(input: &str) -> Vec<AgnoFrame> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input.as_bytes());
        frames.extend(decoder.finish());
        frames
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn decode_line(raw: &[u8]) -> Option<AgnoFrame> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() || line == DONE_SENTINEL {
        return None;
    }

    let payload = line.strip_prefix(DATA_PREFIX).map_or(line, str::trim);
    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }

    let value = match serde_json::from_str::<Value>(payload) {
        Ok(value) => value,
        Err(error) => {
            tracing::trace!(%error, "dropping malformed run stream line");
            return None;
        }
    };

    match AgnoFrame::from_value(value) {
        Some(AgnoFrame::Unknown { event }) => {
            tracing::trace!(event = %event, "dropping unknown run stream event");
            None
        }
        Some(frame) => Some(frame),
        None => {
            tracing::trace!("dropping run stream line without event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameDecoder;
    use crate::events::AgnoFrame;

    #[test]
    fn decode_frames_incrementally() {
        let mut decoder = FrameDecoder::default();
        let mut frames = Vec::new();

        frames.extend(decoder.feed(b"{\"event\":\"RunContent\",\"content\":\"Hel"));
        assert!(frames.is_empty());

        frames.extend(decoder.feed(b"lo\"}\n"));
        assert_eq!(
            frames,
            vec![AgnoFrame::RunContent {
                content: "Hello".to_owned()
            }]
        );

        frames.extend(decoder.feed(b"data: [DONE]\n"));
        assert_eq!(frames.len(), 1);
        assert!(decoder.is_empty_buffer());
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder
            .feed(b"{\"event\":\"RunCompleted\",\"content\":\"done\"}")
            .is_empty());

        assert_eq!(
            decoder.finish(),
            Some(AgnoFrame::RunCompleted {
                content: Some("done".to_owned()),
                metrics: None,
            })
        );
        assert_eq!(decoder.finish(), None);
    }
}
