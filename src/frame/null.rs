use super::{Frame, FramePicker, PickerBuffer};

/// Collects everything until the remote side closes the connection.
#[derive(Debug, Default)]
pub struct NullFramePicker {
    buffer: PickerBuffer,
}

impl NullFramePicker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FramePicker for NullFramePicker {
    fn pick_up_data<'a>(&mut self, chunk: &'a [u8], remote_address: Option<&str>) -> &'a [u8] {
        if self.buffer.eof {
            return chunk;
        }
        self.buffer.note_remote(remote_address);
        self.buffer.data.extend_from_slice(chunk);
        &chunk[chunk.len()..]
    }

    fn is_eof(&self) -> bool {
        self.buffer.eof
    }

    fn create_frame(&self) -> Frame {
        self.buffer.frame()
    }

    fn on_remote_close(&mut self) -> bool {
        self.buffer.mark_eof();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_completes_on_data() {
        let mut picker = NullFramePicker::new();
        for chunk in [&b"a"[..], b"bc", b""] {
            assert!(picker.pick_up_data(chunk, None).is_empty());
        }
        assert!(!picker.is_eof());
        assert_eq!(picker.create_frame().to_string(), "abc");
    }

    #[test]
    fn test_close_completes_frame() {
        let mut picker = NullFramePicker::new();
        picker.pick_up_data(b"body", None);
        assert!(picker.on_remote_close());
        assert!(picker.is_eof());
        assert_eq!(picker.pick_up_data(b"late", None), b"late");
        assert_eq!(picker.create_frame().to_string(), "body");
    }
}
