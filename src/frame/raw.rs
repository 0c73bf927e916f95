use super::{Frame, FramePicker, PickerBuffer};

/// One read is one frame: the first chunk becomes the whole frame.
#[derive(Debug, Default)]
pub struct RawFramePicker {
    buffer: PickerBuffer,
}

impl RawFramePicker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FramePicker for RawFramePicker {
    fn pick_up_data<'a>(&mut self, chunk: &'a [u8], remote_address: Option<&str>) -> &'a [u8] {
        if self.buffer.eof {
            return chunk;
        }
        self.buffer.note_remote(remote_address);
        self.buffer.data.extend_from_slice(chunk);
        self.buffer.mark_eof();
        &chunk[chunk.len()..]
    }

    fn is_eof(&self) -> bool {
        self.buffer.eof
    }

    fn create_frame(&self) -> Frame {
        self.buffer.frame()
    }
}
