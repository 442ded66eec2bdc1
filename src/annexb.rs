//! Annex-B elementary stream splitting.
//!
//! Groups NAL units into the units a decoder expects one input buffer each:
//! a run of parameter sets becomes one codec-config unit, and each picture
//! (with its leading AUD/SEI NALs) becomes one frame.

use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;
use decoder_pump::{DecodeUnit, UnitKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCodec {
    H264,
    Hevc,
}

impl StreamCodec {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Some(Self::H264),
            "h265" | "hevc" => Some(Self::Hevc),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::H264 => "video/avc",
            Self::Hevc => "video/hevc",
        }
    }

    pub fn default_decoder(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }

    fn classify(self, nal: &[u8]) -> NalKind {
        match self {
            Self::H264 => {
                let Some(&header) = nal.first() else {
                    return NalKind::Other;
                };
                match header & 0x1f {
                    7 | 8 => NalKind::ParameterSet,
                    t @ 1..=5 => NalKind::Slice {
                        key: t == 5,
                        // first_mb_in_slice == 0 encodes as a single 1 bit
                        first: nal.get(1).is_some_and(|b| b & 0x80 != 0),
                    },
                    _ => NalKind::Other,
                }
            }
            Self::Hevc => {
                let Some(&header) = nal.first() else {
                    return NalKind::Other;
                };
                match (header >> 1) & 0x3f {
                    32..=34 => NalKind::ParameterSet,
                    t @ 0..=31 => NalKind::Slice {
                        key: (16..=23).contains(&t),
                        first: nal.get(2).is_some_and(|b| b & 0x80 != 0),
                    },
                    _ => NalKind::Other,
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NalKind {
    ParameterSet,
    Slice { key: bool, first: bool },
    Other,
}

/// Byte ranges of each NAL unit, start code included.
pub fn nal_ranges(data: &[u8]) -> Vec<Range<usize>> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push((start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (n, &(start, _)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map_or(data.len(), |&(next, _)| next);
        ranges.push(start..end);
    }
    ranges
}

fn payload_offset(data: &[u8], range: &Range<usize>) -> usize {
    if data[range.start..].starts_with(&[0, 0, 0, 1]) {
        range.start + 4
    } else {
        range.start + 3
    }
}

#[derive(Default)]
struct Group {
    range: Option<Range<usize>>,
    config: bool,
    has_slice: bool,
    key: bool,
}

impl Group {
    fn extend(&mut self, nal: &Range<usize>) {
        self.range = Some(match self.range.take() {
            Some(r) => r.start..nal.end,
            None => nal.clone(),
        });
    }
}

pub struct AccessUnitSplitter {
    codec: StreamCodec,
    frame_interval: Duration,
    frame_number: u64,
    units: Vec<DecodeUnit>,
}

impl AccessUnitSplitter {
    pub fn new(codec: StreamCodec, fps: u32) -> Self {
        Self {
            codec,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            frame_number: 0,
            units: Vec::new(),
        }
    }

    fn pts_us(&self) -> i64 {
        (self.frame_interval * self.frame_number as u32).as_micros() as i64
    }

    fn flush(&mut self, data: &Bytes, group: Group) {
        let Some(range) = group.range else {
            return;
        };
        let pts_us = self.pts_us();
        let payload = data.slice(range);
        if group.has_slice {
            let kind = if group.key {
                UnitKind::KeyFrame
            } else {
                UnitKind::Frame
            };
            self.units
                .push(DecodeUnit::new(payload, kind, self.frame_number, pts_us));
            self.frame_number += 1;
        } else if group.config {
            self.units.push(DecodeUnit::new(
                payload,
                UnitKind::ParameterSet,
                self.frame_number,
                pts_us,
            ));
        } else {
            log::debug!("dropping {} bytes of NALs without a picture", payload.len());
        }
    }

    /// Split a whole stream into decode units. Slices of `data`, no copies.
    pub fn split(mut self, data: &Bytes) -> Vec<DecodeUnit> {
        let mut group = Group::default();
        for nal in nal_ranges(data) {
            let offset = payload_offset(data, &nal);
            match self.codec.classify(&data[offset..nal.end]) {
                NalKind::ParameterSet => {
                    if group.has_slice {
                        self.flush(data, std::mem::take(&mut group));
                    }
                    group.config = true;
                }
                NalKind::Slice { key, first } => {
                    if (first && group.has_slice) || (group.config && !group.has_slice) {
                        self.flush(data, std::mem::take(&mut group));
                    }
                    group.has_slice = true;
                    group.key |= key;
                }
                NalKind::Other => {
                    if group.has_slice {
                        self.flush(data, std::mem::take(&mut group));
                    }
                }
            }
            group.extend(&nal);
        }
        self.flush(data, group);
        log::info!(
            "split {} bytes into {} units ({} frames)",
            data.len(),
            self.units.len(),
            self.frame_number
        );
        self.units
    }
}
