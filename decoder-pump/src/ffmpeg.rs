//! Software (or FFmpeg-wrapped hardware) decoder exposed through the
//! MediaCodec-style input buffer protocol.
//!
//! FFmpeg has no notion of decoder-owned input buffers, so this device keeps a
//! small set of its own and copies each submitted one into an `AVPacket`.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::time::Duration;

use crate::device::{BufferId, DecoderDevice, InputRegion, OutputBuffer};
use crate::format::{DecoderFormat, KEY_HEIGHT, KEY_LATENCY, KEY_MIME, KEY_WIDTH};
use crate::unit::CodecFlags;

const INPUT_BUFFERS: usize = 4;
const INPUT_CAPACITY: usize = 2 * 1024 * 1024;
/// Decoded frames kept while the pump has not released them.
const MAX_PENDING_OUTPUTS: usize = 8;

fn codec_id_for_mime(mime_type: &str) -> Option<ffmpeg_next::codec::Id> {
    use ffmpeg_next::codec::Id;
    match mime_type {
        "video/avc" => Some(Id::H264),
        "video/hevc" => Some(Id::HEVC),
        "video/av01" => Some(Id::AV1),
        "video/x-vnd.on2.vp8" => Some(Id::VP8),
        "video/x-vnd.on2.vp9" => Some(Id::VP9),
        _ => None,
    }
}

/// FFmpeg-wrapped hardware decoders tried before the software one.
fn hardware_candidates(codec_id: ffmpeg_next::codec::Id) -> &'static [&'static str] {
    use ffmpeg_next::codec::Id;
    match codec_id {
        Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        Id::VP8 => &["vp8_cuvid", "vp8_qsv", "vp8_v4l2m2m"],
        Id::VP9 => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        Id::AV1 => &["av1_cuvid", "av1_qsv"],
        _ => &[],
    }
}

fn find_decoder(codec_name: &str, mime_type: &str) -> anyhow::Result<ffmpeg_next::Codec> {
    if let Some(codec) = ffmpeg_next::decoder::find_by_name(codec_name) {
        return Ok(codec);
    }
    let codec_id = codec_id_for_mime(mime_type)
        .ok_or_else(|| anyhow::anyhow!("unsupported mime type {}", mime_type))?;
    for name in hardware_candidates(codec_id) {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Ok(codec);
        }
    }
    ffmpeg_next::decoder::find(codec_id)
        .ok_or_else(|| anyhow::anyhow!("no decoder for {} ({})", codec_name, mime_type))
}

fn is_again(err: &ffmpeg_next::Error) -> bool {
    matches!(err, ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN)
}

pub struct FfmpegDevice {
    codec: ffmpeg_next::Codec,
    decoder: Option<ffmpeg_next::decoder::Video>,
    started: bool,
    inputs: Vec<Box<[u8]>>,
    free_inputs: VecDeque<BufferId>,
    decoded: VecDeque<(usize, ffmpeg_next::frame::Video)>,
    held: Vec<(usize, ffmpeg_next::frame::Video)>,
    next_output: usize,
}

// FFmpeg contexts are not tied to the creating thread; the core never calls a
// device from two threads at once.
unsafe impl Send for FfmpegDevice {}

impl FfmpegDevice {
    fn decoder_mut(&mut self) -> anyhow::Result<&mut ffmpeg_next::decoder::Video> {
        self.decoder
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg decoder is not configured"))
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::Packet) -> anyhow::Result<()> {
        match self.decoder_mut()?.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(e) if is_again(&e) => {
                // Decoder wants its output drained before accepting more input
                self.receive_frames()?;
                self.decoder_mut()?.send_packet(packet)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn receive_frames(&mut self) -> anyhow::Result<()> {
        loop {
            let mut frame = ffmpeg_next::frame::Video::empty();
            match self.decoder_mut()?.receive_frame(&mut frame) {
                Ok(()) => {
                    if self.decoded.len() >= MAX_PENDING_OUTPUTS {
                        log::warn!("ffmpeg device: output backlog full, dropping oldest frame");
                        self.decoded.pop_front();
                    }
                    self.decoded.push_back((self.next_output, frame));
                    self.next_output += 1;
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn reset_buffers(&mut self) {
        self.free_inputs = (0..self.inputs.len()).collect();
        self.decoded.clear();
        self.held.clear();
    }
}

impl DecoderDevice for FfmpegDevice {
    type Surface = ();

    fn open(codec_name: &str, mime_type: &str) -> anyhow::Result<Self> {
        let codec = find_decoder(codec_name, mime_type)?;
        log::info!("ffmpeg device using decoder {}", codec.name());
        Ok(Self {
            codec,
            decoder: None,
            started: false,
            inputs: (0..INPUT_BUFFERS)
                .map(|_| vec![0u8; INPUT_CAPACITY].into_boxed_slice())
                .collect(),
            free_inputs: VecDeque::new(),
            decoded: VecDeque::new(),
            held: Vec::new(),
            next_output: 0,
        })
    }

    fn configure(&mut self, format: &DecoderFormat, _surface: Option<&()>) -> anyhow::Result<()> {
        if let Some(mime) = format.get_str(KEY_MIME) {
            if codec_id_for_mime(mime).is_some_and(|id| id != self.codec.id()) {
                anyhow::bail!("decoder {} cannot handle {}", self.codec.name(), mime);
            }
        }

        let mut ctx = ffmpeg_next::codec::Context::new_with_codec(self.codec);
        if format.get_i32(KEY_LATENCY) == Some(1) {
            ctx.set_flags(ffmpeg_next::codec::Flags::LOW_DELAY);
        }
        let decoder = ctx.decoder().open_as(self.codec)?.video()?;
        log::debug!(
            "ffmpeg device configured for {:?}x{:?}",
            format.get_i32(KEY_WIDTH),
            format.get_i32(KEY_HEIGHT)
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.decoder_mut()?;
        self.reset_buffers();
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.started = false;
        self.decoder_mut()?.flush();
        self.reset_buffers();
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> anyhow::Result<Option<BufferId>> {
        if !self.started {
            return Ok(None);
        }
        Ok(self.free_inputs.pop_front())
    }

    fn input_region(&mut self, id: BufferId) -> anyhow::Result<InputRegion> {
        let buffer = self
            .inputs
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("unknown input buffer {}", id))?;
        let ptr = NonNull::new(buffer.as_mut_ptr())
            .ok_or_else(|| anyhow::anyhow!("input buffer {} has no storage", id))?;
        // SAFETY: the boxed slices live as long as the device and are never reallocated.
        Ok(unsafe { InputRegion::from_raw_parts(ptr, buffer.len()) })
    }

    fn submit_input(
        &mut self,
        id: BufferId,
        len: usize,
        pts_us: i64,
        flags: CodecFlags,
    ) -> anyhow::Result<()> {
        if id >= self.inputs.len() || len > INPUT_CAPACITY {
            anyhow::bail!("invalid input buffer {} ({} bytes)", id, len);
        }

        if len > 0 {
            let mut packet = ffmpeg_next::Packet::copy(&self.inputs[id][..len]);
            packet.set_pts(Some(pts_us));
            if flags.contains(CodecFlags::KEY_FRAME) {
                packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
            }
            self.send_packet(&packet)?;
        }
        if flags.contains(CodecFlags::END_OF_STREAM) {
            self.decoder_mut()?.send_eof()?;
        }
        self.free_inputs.push_back(id);
        self.receive_frames()
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> anyhow::Result<Option<OutputBuffer>> {
        let Some((id, frame)) = self.decoded.pop_front() else {
            return Ok(None);
        };
        let output = OutputBuffer {
            id,
            pts_us: frame.pts().unwrap_or_default(),
            flags: if frame.is_key() {
                CodecFlags::KEY_FRAME
            } else {
                CodecFlags::NONE
            },
        };
        self.held.push((id, frame));
        Ok(Some(output))
    }

    fn release_output(&mut self, output: OutputBuffer, _render: bool) -> anyhow::Result<()> {
        let Some(pos) = self.held.iter().position(|(id, _)| *id == output.id) else {
            anyhow::bail!("output buffer {} was not dequeued", output.id);
        };
        let (_, frame) = self.held.swap_remove(pos);
        log::trace!(
            "ffmpeg device: frame {}x{} pts {:?} released",
            frame.width(),
            frame.height(),
            frame.pts()
        );
        Ok(())
    }
}
