use std::fmt::{Display, Formatter};
use std::ops::{BitOr, BitOrAssign};

use bytes::Bytes;

/// Buffer flags forwarded to the decoder with each submitted input buffer.
///
/// Values match the MediaCodec `BUFFER_FLAG_*` constants so the NDK device can
/// pass them through unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CodecFlags(u32);

impl CodecFlags {
    pub const NONE: CodecFlags = CodecFlags(0);
    pub const KEY_FRAME: CodecFlags = CodecFlags(1);
    pub const CODEC_CONFIG: CodecFlags = CodecFlags(2);
    pub const END_OF_STREAM: CodecFlags = CodecFlags(4);
    pub const PARTIAL_FRAME: CodecFlags = CodecFlags(8);

    pub const fn from_bits(bits: u32) -> Self {
        CodecFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: CodecFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CodecFlags {
    type Output = CodecFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        CodecFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodecFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for CodecFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a decode unit carries, as classified by the producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitKind {
    /// SPS/PPS/VPS and similar out-of-band codec configuration.
    ParameterSet,
    /// Independently decodable picture (IDR / IRAP).
    KeyFrame,
    Frame,
    EndOfStream,
}

impl UnitKind {
    pub fn codec_flags(self) -> CodecFlags {
        match self {
            UnitKind::ParameterSet => CodecFlags::CODEC_CONFIG,
            UnitKind::KeyFrame => CodecFlags::KEY_FRAME,
            UnitKind::Frame => CodecFlags::NONE,
            UnitKind::EndOfStream => CodecFlags::END_OF_STREAM,
        }
    }
}

/// One encoded access unit handed over by the network/producer side.
#[derive(Clone, Debug)]
pub struct DecodeUnit {
    pub data: Bytes,
    pub kind: UnitKind,
    pub frame_number: u64,
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
}

impl DecodeUnit {
    pub fn new(data: impl Into<Bytes>, kind: UnitKind, frame_number: u64, pts_us: i64) -> Self {
        Self {
            data: data.into(),
            kind,
            frame_number,
            pts_us,
        }
    }

    pub fn end_of_stream(frame_number: u64, pts_us: i64) -> Self {
        Self::new(Bytes::new(), UnitKind::EndOfStream, frame_number, pts_us)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn codec_flags(&self) -> CodecFlags {
        self.kind.codec_flags()
    }
}
