use relay_api::RelayError;

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, `None` when the frame carried none.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes arrive in arbitrary chunks; complete lines are consumed and a
/// blank line dispatches the frame collected so far. Comment lines
/// (`:keep-alive`) are ignored. A partial frame at end of stream is never
/// dispatched.
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    max_line_length: usize,
}

impl SseDecoder {
    /// `max_line_length` of 0 disables the limit.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: Vec::with_capacity(8192),
            event: None,
            data: Vec::new(),
            id: None,
            max_line_length,
        }
    }

    /// Feed a chunk, returning every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, RelayError> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let line = &self.buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            self.check_length(line.len())?;

            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        self.check_length(self.buf.len())?;

        Ok(frames)
    }

    fn check_length(&self, len: usize) -> Result<(), RelayError> {
        if self.max_line_length > 0 && len > self.max_line_length {
            return Err(RelayError::StreamTerminated(format!(
                "line too long: {len} bytes (max {})",
                self.max_line_length
            )));
        }
        Ok(())
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks() {
        let mut dec = SseDecoder::new(0);
        assert!(dec.push(b"event: pow").unwrap().is_empty());
        assert!(dec.push(b"er\r\ndata: {\"a\"").unwrap().is_empty());
        let frames = dec.push(b":1}\r\n\r\n").unwrap();
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("power".into()),
                data: "{\"a\":1}".into(),
                id: None,
            }]
        );
    }

    #[test]
    fn comments_and_empty_frames_are_ignored() {
        let mut dec = SseDecoder::new(0);
        let frames = dec.push(b":ok\n\nevent: x\n\ndata: 1\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "1");
    }

    #[test]
    fn multiline_data_and_id() {
        let mut dec = SseDecoder::new(0);
        let frames = dec.push(b"id: 7\ndata: a\ndata:b\n\n").unwrap();
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn overlong_line_is_an_error() {
        let mut dec = SseDecoder::new(8);
        assert!(dec.push(b"data: 0123").is_err());

        let mut dec = SseDecoder::new(8);
        assert!(dec.push(b"data: 0123456789\n").is_err());
    }
}
