use bytes::Buf;

use super::{Frame, FramePicker, PickerBuffer};

/// Frame delimited by a start marker and an end marker, both included in the
/// frame.
///
/// Bytes before the start marker are discarded. Bytes after the end marker are
/// returned as leftover. A marker split across two chunks is still found: the
/// tail of what was already searched is kept and scanned again together with
/// the next chunk.
#[derive(Debug)]
pub struct MarkerFramePicker {
    start: Option<Vec<u8>>,
    end: Vec<u8>,
    case_sensitive: bool,
    start_found: bool,
    /// Prefix of the buffer already searched for the end marker.
    scanned: usize,
    buffer: PickerBuffer,
}

impl MarkerFramePicker {
    pub fn new<S, E>(start: Option<S>, end: E, case_sensitive: bool) -> Self
    where
        S: AsRef<[u8]>,
        E: AsRef<[u8]>,
    {
        Self {
            start: start.map(|s| s.as_ref().to_vec()),
            end: end.as_ref().to_vec(),
            case_sensitive,
            start_found: false,
            scanned: 0,
            buffer: PickerBuffer::default(),
        }
    }

    /// Frame running from the first byte up to and including `end`.
    pub fn until<E: AsRef<[u8]>>(end: E, case_sensitive: bool) -> Self {
        Self::new(None::<&[u8]>, end, case_sensitive)
    }

    fn find(&self, needle: &[u8], from: usize) -> Option<usize> {
        let haystack = &self.buffer.data[..];
        if from > haystack.len() {
            return None;
        }
        if needle.is_empty() {
            return Some(from);
        }
        haystack[from..]
            .windows(needle.len())
            .position(|window| {
                if self.case_sensitive {
                    window == needle
                } else {
                    window.eq_ignore_ascii_case(needle)
                }
            })
            .map(|pos| pos + from)
    }

    /// Returns false while the start marker is still missing.
    fn locate_start(&mut self) -> bool {
        if self.start_found {
            return true;
        }
        let Some(start) = self.start.as_deref() else {
            self.start_found = true;
            return true;
        };

        match self.find(start, 0) {
            Some(pos) => {
                self.buffer.data.advance(pos);
                self.start_found = true;
                self.scanned = start.len();
                true
            }
            None => {
                // only a partial marker can straddle into the next chunk
                let keep = start.len().saturating_sub(1).min(self.buffer.data.len());
                let discard = self.buffer.data.len() - keep;
                self.buffer.data.advance(discard);
                false
            }
        }
    }
}

impl FramePicker for MarkerFramePicker {
    fn pick_up_data<'a>(&mut self, chunk: &'a [u8], remote_address: Option<&str>) -> &'a [u8] {
        if self.buffer.eof {
            return chunk;
        }
        self.buffer.note_remote(remote_address);
        self.buffer.data.extend_from_slice(chunk);

        if !self.locate_start() {
            return &chunk[chunk.len()..];
        }

        let start_len = self.start.as_ref().map_or(0, Vec::len);
        let from = self
            .scanned
            .saturating_sub(self.end.len().saturating_sub(1))
            .max(start_len);

        match self.find(&self.end, from) {
            Some(pos) => {
                let frame_end = pos + self.end.len();
                let extra = (self.buffer.data.len() - frame_end).min(chunk.len());
                self.buffer.data.truncate(frame_end);
                self.buffer.mark_eof();
                &chunk[chunk.len() - extra..]
            }
            None => {
                self.scanned = self.buffer.data.len();
                &chunk[chunk.len()..]
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.buffer.eof
    }

    fn create_frame(&self) -> Frame {
        self.buffer.frame()
    }
}
