use super::{Frame, FramePicker, PickerBuffer};

/// Frame of exactly `length` bytes.
#[derive(Debug)]
pub struct FixedLengthFramePicker {
    length: usize,
    buffer: PickerBuffer,
}

impl FixedLengthFramePicker {
    pub fn new(length: usize) -> Self {
        let mut buffer = PickerBuffer::default();
        if length == 0 {
            buffer.mark_eof();
        }
        Self { length, buffer }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl FramePicker for FixedLengthFramePicker {
    fn pick_up_data<'a>(&mut self, chunk: &'a [u8], remote_address: Option<&str>) -> &'a [u8] {
        if self.buffer.eof {
            return chunk;
        }
        self.buffer.note_remote(remote_address);

        let wanted = self.length - self.buffer.data.len();
        let (taken, rest) = chunk.split_at(wanted.min(chunk.len()));
        self.buffer.data.extend_from_slice(taken);
        if self.buffer.data.len() == self.length {
            self.buffer.mark_eof();
        }
        rest
    }

    fn is_eof(&self) -> bool {
        self.buffer.eof
    }

    fn create_frame(&self) -> Frame {
        self.buffer.frame()
    }
}
