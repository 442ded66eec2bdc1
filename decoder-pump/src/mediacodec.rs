//! Android `AMediaCodec` device.

use std::ffi::CString;
use std::ptr::{self, NonNull};
use std::time::Duration;

use ndk::native_window::NativeWindow;
use ndk_sys as ffi;

use crate::device::{BufferId, DecoderDevice, InputRegion, OutputBuffer};
use crate::format::{DecoderFormat, FormatValue};
use crate::unit::CodecFlags;

fn check(status: ffi::media_status_t, what: &str) -> anyhow::Result<()> {
    if status.0 != 0 {
        anyhow::bail!("{} failed: media status {}", what, status.0);
    }
    Ok(())
}

fn timeout_us(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX)
}

/// Owned `AMediaFormat`, deleted on drop.
struct MediaFormat(NonNull<ffi::AMediaFormat>);

impl MediaFormat {
    fn from_format(format: &DecoderFormat) -> anyhow::Result<Self> {
        let raw = NonNull::new(unsafe { ffi::AMediaFormat_new() })
            .ok_or_else(|| anyhow::anyhow!("AMediaFormat_new returned null"))?;
        let media_format = Self(raw);
        for (key, value) in format.iter() {
            let key = CString::new(key)?;
            match value {
                FormatValue::Str(s) => {
                    let s = CString::new(s.as_str())?;
                    unsafe { ffi::AMediaFormat_setString(raw.as_ptr(), key.as_ptr(), s.as_ptr()) };
                }
                FormatValue::I32(v) => unsafe {
                    ffi::AMediaFormat_setInt32(raw.as_ptr(), key.as_ptr(), *v)
                },
            }
        }
        Ok(media_format)
    }
}

impl Drop for MediaFormat {
    fn drop(&mut self) {
        unsafe { ffi::AMediaFormat_delete(self.0.as_ptr()) };
    }
}

pub struct NdkDevice {
    codec: NonNull<ffi::AMediaCodec>,
    name: String,
}

// AMediaCodec may be driven from any thread as long as calls are not concurrent.
unsafe impl Send for NdkDevice {}

impl DecoderDevice for NdkDevice {
    type Surface = NativeWindow;

    fn open(codec_name: &str, mime_type: &str) -> anyhow::Result<Self> {
        let name = CString::new(codec_name)?;
        let mut codec = unsafe { ffi::AMediaCodec_createCodecByName(name.as_ptr()) };
        if codec.is_null() {
            log::warn!("codec {} not found, falling back to {}", codec_name, mime_type);
            let mime = CString::new(mime_type)?;
            codec = unsafe { ffi::AMediaCodec_createDecoderByType(mime.as_ptr()) };
        }
        let codec = NonNull::new(codec)
            .ok_or_else(|| anyhow::anyhow!("no decoder for {} ({})", codec_name, mime_type))?;
        Ok(Self {
            codec,
            name: codec_name.to_string(),
        })
    }

    fn configure(
        &mut self,
        format: &DecoderFormat,
        surface: Option<&NativeWindow>,
    ) -> anyhow::Result<()> {
        let media_format = MediaFormat::from_format(format)?;
        let window = surface.map_or(ptr::null_mut(), |w| w.ptr().as_ptr());
        let status = unsafe {
            ffi::AMediaCodec_configure(
                self.codec.as_ptr(),
                media_format.0.as_ptr(),
                window,
                ptr::null_mut(),
                0,
            )
        };
        check(status, "AMediaCodec_configure")
    }

    fn start(&mut self) -> anyhow::Result<()> {
        check(unsafe { ffi::AMediaCodec_start(self.codec.as_ptr()) }, "AMediaCodec_start")
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        check(unsafe { ffi::AMediaCodec_stop(self.codec.as_ptr()) }, "AMediaCodec_stop")
    }

    fn dequeue_input(&mut self, timeout: Duration) -> anyhow::Result<Option<BufferId>> {
        let index =
            unsafe { ffi::AMediaCodec_dequeueInputBuffer(self.codec.as_ptr(), timeout_us(timeout)) };
        if index >= 0 {
            return Ok(Some(index as BufferId));
        }
        if index == ffi::AMEDIACODEC_INFO_TRY_AGAIN_LATER as isize {
            return Ok(None);
        }
        anyhow::bail!("AMediaCodec_dequeueInputBuffer failed: {}", index)
    }

    fn input_region(&mut self, id: BufferId) -> anyhow::Result<InputRegion> {
        let mut size: usize = 0;
        let buffer = unsafe { ffi::AMediaCodec_getInputBuffer(self.codec.as_ptr(), id, &mut size) };
        let ptr = NonNull::new(buffer)
            .ok_or_else(|| anyhow::anyhow!("input buffer {} was null", id))?;
        // SAFETY: MediaCodec keeps the buffer mapped until it is queued back or the codec stops.
        Ok(unsafe { InputRegion::from_raw_parts(ptr, size) })
    }

    fn submit_input(
        &mut self,
        id: BufferId,
        len: usize,
        pts_us: i64,
        flags: CodecFlags,
    ) -> anyhow::Result<()> {
        let status = unsafe {
            ffi::AMediaCodec_queueInputBuffer(
                self.codec.as_ptr(),
                id,
                0,
                len,
                pts_us.max(0) as u64,
                flags.bits(),
            )
        };
        check(status, "AMediaCodec_queueInputBuffer")
    }

    fn dequeue_output(&mut self, timeout: Duration) -> anyhow::Result<Option<OutputBuffer>> {
        let mut info = ffi::AMediaCodecBufferInfo::default();
        let index = unsafe {
            ffi::AMediaCodec_dequeueOutputBuffer(self.codec.as_ptr(), &mut info, timeout_us(timeout))
        };
        if index >= 0 {
            return Ok(Some(OutputBuffer {
                id: index as BufferId,
                pts_us: info.presentationTimeUs,
                flags: CodecFlags::from_bits(info.flags),
            }));
        }
        match index as i32 {
            ffi::AMEDIACODEC_INFO_TRY_AGAIN_LATER => {}
            ffi::AMEDIACODEC_INFO_OUTPUT_FORMAT_CHANGED => {
                log::info!("{}: output format changed", self.name);
            }
            ffi::AMEDIACODEC_INFO_OUTPUT_BUFFERS_CHANGED => {
                log::debug!("{}: output buffers changed", self.name);
            }
            other => anyhow::bail!("AMediaCodec_dequeueOutputBuffer failed: {}", other),
        }
        Ok(None)
    }

    fn release_output(&mut self, output: OutputBuffer, render: bool) -> anyhow::Result<()> {
        let status =
            unsafe { ffi::AMediaCodec_releaseOutputBuffer(self.codec.as_ptr(), output.id, render) };
        check(status, "AMediaCodec_releaseOutputBuffer")
    }
}

impl Drop for NdkDevice {
    fn drop(&mut self) {
        let status = unsafe { ffi::AMediaCodec_delete(self.codec.as_ptr()) };
        if status.0 != 0 {
            log::warn!("AMediaCodec_delete({}) returned {}", self.name, status.0);
        }
    }
}
