use std::fmt::{Display, Formatter};

use crate::device::{BufferId, InputRegion};
use crate::unit::CodecFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// No decoder buffer bound. Initial state, and the state after the bound
    /// buffer has been handed to the decoder.
    Empty,
    /// Bound to an empty decoder buffer, ready for a producer.
    Free,
    /// Held by a producer that is filling it.
    Working,
    /// Filled and committed, waiting for the pump thread.
    Queuing,
}

impl Display for SlotState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotState::Empty => "EMPTY",
            SlotState::Free => "FREE",
            SlotState::Working => "WORKING",
            SlotState::Queuing => "QUEUING",
        };
        f.write_str(name)
    }
}

/// Decoder buffer currently bound to a slot.
#[derive(Debug)]
pub(crate) struct BoundBuffer {
    pub(crate) id: BufferId,
    pub(crate) region: InputRegion,
}

#[derive(Debug)]
pub struct InputBufferSlot {
    index: usize,
    state: SlotState,
    buffer: Option<BoundBuffer>,
    filled: usize,
    pts_us: i64,
    flags: CodecFlags,
    commit_seq: u64,
}

impl InputBufferSlot {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            state: SlotState::Empty,
            buffer: None,
            filled: 0,
            pts_us: 0,
            flags: CodecFlags::NONE,
            commit_seq: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Only meaningful while the slot is FREE, WORKING or QUEUING.
    pub fn decoder_buffer_id(&self) -> Option<BufferId> {
        self.buffer.as_ref().map(|b| b.id)
    }

    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.region.capacity())
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn pts_us(&self) -> i64 {
        self.pts_us
    }

    pub fn flags(&self) -> CodecFlags {
        self.flags
    }

    pub(crate) fn commit_seq(&self) -> u64 {
        self.commit_seq
    }

    pub(crate) fn bind(&mut self, id: BufferId, region: InputRegion) {
        debug_assert_eq!(self.state, SlotState::Empty);
        self.buffer = Some(BoundBuffer { id, region });
        self.filled = 0;
        self.state = SlotState::Free;
    }

    pub(crate) fn begin_work(&mut self) {
        debug_assert_eq!(self.state, SlotState::Free);
        self.filled = 0;
        self.state = SlotState::Working;
    }

    pub(crate) fn region_mut(&mut self) -> Option<&mut InputRegion> {
        self.buffer.as_mut().map(|b| &mut b.region)
    }

    pub(crate) fn set_filled(&mut self, filled: usize) {
        self.filled = filled;
    }

    pub(crate) fn queue(&mut self, pts_us: i64, flags: CodecFlags, seq: u64) {
        debug_assert_eq!(self.state, SlotState::Working);
        self.pts_us = pts_us;
        self.flags = flags;
        self.commit_seq = seq;
        self.state = SlotState::Queuing;
    }

    pub(crate) fn abandon(&mut self) {
        debug_assert_eq!(self.state, SlotState::Working);
        self.filled = 0;
        self.state = SlotState::Free;
    }

    /// The bound buffer now belongs to the decoder.
    pub(crate) fn consume(&mut self) {
        debug_assert_eq!(self.state, SlotState::Queuing);
        self.buffer = None;
        self.filled = 0;
        self.state = SlotState::Empty;
    }

    /// Drop any binding without handing it back; used at teardown.
    pub(crate) fn invalidate(&mut self) {
        self.buffer = None;
        self.filled = 0;
        self.state = SlotState::Empty;
    }
}
