use bytes::BytesMut;
use std::fmt::Debug;

use super::Frame;

/// Incremental frame boundary detector.
///
/// A picker lives for exactly one logical frame. Chunks are pushed in with
/// [`pick_up_data`](FramePicker::pick_up_data) until [`is_eof`](FramePicker::is_eof)
/// turns true; EOF never goes back to false. Custom protocols plug in by
/// implementing this trait.
pub trait FramePicker: Debug {
    /// Consumes as much of `chunk` as belongs to the current frame and returns
    /// the unconsumed suffix. Once EOF is reached every further call returns
    /// its input untouched.
    fn pick_up_data<'a>(&mut self, chunk: &'a [u8], remote_address: Option<&str>) -> &'a [u8];

    fn is_eof(&self) -> bool;

    /// Builds a frame from what has been collected so far, complete or not.
    fn create_frame(&self) -> Frame;

    /// Called when the remote side closes the stream before EOF. Returns
    /// whether the frame counts as complete after all.
    fn on_remote_close(&mut self) -> bool {
        self.is_eof()
    }
}

/// Accumulation state shared by the built-in pickers.
#[derive(Debug, Default)]
pub(crate) struct PickerBuffer {
    pub(crate) data: BytesMut,
    pub(crate) eof: bool,
    remote_address: Option<String>,
}

impl PickerBuffer {
    /// Remembers the origin of the first chunk seen.
    pub(crate) fn note_remote(&mut self, remote_address: Option<&str>) {
        if self.remote_address.is_none() {
            self.remote_address = remote_address.map(str::to_owned);
        }
    }

    pub(crate) fn mark_eof(&mut self) {
        self.eof = true;
    }

    pub(crate) fn frame(&self) -> Frame {
        Frame::new(self.data.clone().freeze(), self.remote_address.clone())
    }
}
