//! Splits raw response bytes into event frames.
//!
//! Frames are separated by a blank line (`\n\n` or `\r\n\r\n`) and carry their
//! payload on one or more `data:` lines. The decoder buffers bytes rather than
//! text so a frame, a marker, or a multi-byte code point may be split across
//! any chunk boundary.

/// Field name of a payload line inside a frame.
pub const DATA_FIELD: &str = "data";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Optional `event:` name. The backend does not send one, but it is kept
    /// for completeness.
    pub event: Option<String>,
    /// Payload with the field name stripped; multiple `data:` lines are
    /// joined by `\n`.
    pub data: String,
}

/// Incremental frame decoder holding the unconsumed tail between chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already searched for a boundary.
    scanned: usize,
}

impl FrameDecoder {
    /// Appends a chunk and returns every frame it completed, in order.
    ///
    /// Segments without a `data:` line are dropped here; they are not events.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<EventFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(boundary) = next_boundary(&self.buf[start..], self.scanned) {
            frames.extend(parse_frame(&self.buf[start..start + boundary.frame_end]));
            start += boundary.next_start;
            self.scanned = 0;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        frames
    }

    /// Flushes the trailing partial frame at end of stream.
    pub fn finish(&mut self) -> Option<EventFrame> {
        self.scanned = 0;
        parse_frame(&std::mem::take(&mut self.buf))
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

struct Boundary {
    /// End of the frame body, before the blank line.
    frame_end: usize,
    /// First byte after the blank line.
    next_start: usize,
}

/// Finds the first blank line ending at or after `from`.
///
/// Only line feeds at `from` or later are examined; the bytes before one are
/// looked at to tell `\n\n` and `\r\n\r\n` apart from an ordinary line end.
fn next_boundary(buf: &[u8], from: usize) -> Option<Boundary> {
    let mut cursor = from;
    while let Some(offset) = buf.get(cursor..)?.iter().position(|&b| b == b'\n') {
        let lf = cursor + offset;
        let before = &buf[..lf];
        let frame_end = if before.ends_with(b"\n") {
            Some(lf - 1)
        } else if before.ends_with(b"\r\n\r") {
            Some(lf - 3)
        } else {
            None
        };
        if let Some(frame_end) = frame_end {
            return Some(Boundary {
                frame_end,
                next_start: lf + 1,
            });
        }
        cursor = lf + 1;
    }
    None
}

fn parse_frame(bytes: &[u8]) -> Option<EventFrame> {
    let text = String::from_utf8_lossy(bytes);
    let mut event = None;
    let mut data: Option<String> = None;
    for (field, value) in text.lines().filter_map(field_line) {
        match field {
            DATA_FIELD => match data.as_mut() {
                Some(joined) => {
                    joined.push('\n');
                    joined.push_str(value);
                }
                None => data = Some(value.to_owned()),
            },
            "event" => event = Some(value.to_owned()),
            _ => {}
        }
    }
    data.map(|data| EventFrame { event, data })
}

/// Splits `field: value`; comment lines (leading `:`) and blank lines yield
/// nothing.
fn field_line(line: &str) -> Option<(&str, &str)> {
    if line.starts_with(':') {
        return None;
    }
    let (field, value) = line.split_once(':')?;
    Some((field, value.trim_start()))
}
