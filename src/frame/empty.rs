use super::{Frame, FramePicker, PickerBuffer};

/// Frame with no payload, complete before anything is read. Useful when only
/// the fact that a peer answered matters.
#[derive(Debug)]
pub struct EmptyFramePicker {
    buffer: PickerBuffer,
}

impl EmptyFramePicker {
    pub fn new() -> Self {
        let mut buffer = PickerBuffer::default();
        buffer.mark_eof();
        Self { buffer }
    }
}

impl Default for EmptyFramePicker {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePicker for EmptyFramePicker {
    fn pick_up_data<'a>(&mut self, chunk: &'a [u8], remote_address: Option<&str>) -> &'a [u8] {
        self.buffer.note_remote(remote_address);
        chunk
    }

    fn is_eof(&self) -> bool {
        true
    }

    fn create_frame(&self) -> Frame {
        self.buffer.frame()
    }
}
