//! Contract with the hardware (or software fallback) decoder.
//!
//! The core only ever talks to a device from one thread at a time: the pump
//! thread during streaming, and whichever thread ends up performing teardown.
//! Every call the pump makes is non-blocking (`Duration::ZERO` timeouts).

use std::ptr::NonNull;
use std::time::Duration;

use crate::format::DecoderFormat;
use crate::unit::CodecFlags;

/// Device-assigned identity of an input buffer.
pub type BufferId = usize;

/// Writable window into decoder-owned input memory.
pub struct InputRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is only dereferenced under the pool lock while its slot is WORKING.
unsafe impl Send for InputRegion {}

impl InputRegion {
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `len` bytes until the owning buffer is
    /// submitted back to the device or the device is dropped, whichever comes first.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// The caller must hold exclusive access to the buffer and the device must
    /// still own the memory (see [`InputRegion::from_raw_parts`]).
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl std::fmt::Debug for InputRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// A decoded output buffer dequeued from the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputBuffer {
    pub id: usize,
    pub pts_us: i64,
    pub flags: CodecFlags,
}

pub trait DecoderDevice: Send + 'static {
    /// Display target the decoder renders into. Passed through at configuration only.
    type Surface: ?Sized;

    /// Instantiate a decoder by component name (falling back to the MIME type
    /// when the device has no notion of named components).
    fn open(codec_name: &str, mime_type: &str) -> anyhow::Result<Self>
    where
        Self: Sized;

    fn configure(
        &mut self,
        format: &DecoderFormat,
        surface: Option<&Self::Surface>,
    ) -> anyhow::Result<()>;

    fn start(&mut self) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;

    /// Next empty input buffer, or `None` when the device has none right now.
    fn dequeue_input(&mut self, timeout: Duration) -> anyhow::Result<Option<BufferId>>;

    fn input_region(&mut self, id: BufferId) -> anyhow::Result<InputRegion>;

    /// Hand `len` filled bytes of buffer `id` to the device. Ownership of the
    /// buffer passes to the device.
    fn submit_input(
        &mut self,
        id: BufferId,
        len: usize,
        pts_us: i64,
        flags: CodecFlags,
    ) -> anyhow::Result<()>;

    fn dequeue_output(&mut self, timeout: Duration) -> anyhow::Result<Option<OutputBuffer>>;

    fn release_output(&mut self, output: OutputBuffer, render: bool) -> anyhow::Result<()>;
}
