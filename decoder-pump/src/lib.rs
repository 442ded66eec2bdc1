//! Input-side buffer coordination for hardware video decoders.
//!
//! A producer claims an input slot, fills it with one decode unit and commits
//! it; a dedicated pump thread hands committed slots to the decoder, pulls
//! fresh empty buffers back into the pool and releases decoded output.

/// Registers FFmpeg components. Call once at startup before opening an
/// [`ffmpeg::FfmpegDevice`].
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod decoder;
pub mod device;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod handoff;
#[cfg(target_os = "android")]
pub mod mediacodec;
pub mod pool;
pub mod pump;
pub mod slot;
pub mod unit;

#[cfg(test)]
pub(crate) mod testing;

pub use decoder::{Lifecycle, SubmitStatus, VideoDecoder};
pub use device::{BufferId, DecoderDevice, InputRegion, OutputBuffer};
pub use error::DecoderError;
pub use format::{DecoderConfig, DecoderFormat, PlatformCaps, PumpConfig};
pub use pump::PumpStats;
pub use slot::SlotState;
pub use unit::{CodecFlags, DecodeUnit, UnitKind};
