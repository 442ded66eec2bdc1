//! Fixed arena of input slots and the state machine that moves them between
//! producers, the pump thread and the decoder.
//!
//! ```text
//!  EMPTY ──reclaim──► FREE ──acquire──► WORKING ──commit──► QUEUING
//!    ▲                 ▲                   │                   │
//!    │                 └─────abandon───────┘                   │
//!    └───────────────────────drain (submitted)─────────────────┘
//! ```
//!
//! The pool lock only covers state transitions. Device calls happen with the
//! lock released; that is safe because EMPTY and QUEUING slots are touched by
//! the pump thread alone.

use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{BufferId, DecoderDevice};
use crate::error::{DecoderError, Result};
use crate::handoff::SubmissionHandoff;
use crate::slot::{InputBufferSlot, SlotState};
use crate::unit::CodecFlags;

/// Result of one reclaim pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reclaimed {
    /// Slots bound to a fresh decoder buffer during this pass.
    pub bound: usize,
    /// Slots still without a buffer because the decoder had none to give.
    pub still_empty: usize,
}

/// A slot handed to the decoder by [`InputBufferPool::drain_one_queued`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submitted {
    pub index: usize,
    pub buffer_id: BufferId,
    pub len: usize,
    pub pts_us: i64,
    pub flags: CodecFlags,
}

struct PoolState {
    slots: Vec<InputBufferSlot>,
    next_seq: u64,
}

impl PoolState {
    fn working_slot(&mut self, index: usize, op: &str) -> Result<&mut InputBufferSlot> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| DecoderError::violation(format!("{op}: slot {index} out of range")))?;
        if slot.state() != SlotState::Working {
            return Err(DecoderError::violation(format!(
                "{op}: slot {index} is {}, expected WORKING",
                slot.state()
            )));
        }
        Ok(slot)
    }
}

pub struct InputBufferPool {
    state: Mutex<PoolState>,
    handoff: SubmissionHandoff,
}

impl InputBufferPool {
    /// `size` must be non-zero and never changes afterwards.
    pub fn new(size: usize) -> Self {
        debug_assert!(size > 0, "input buffer pool needs at least one slot");
        Self {
            state: Mutex::new(PoolState {
                slots: (0..size).map(InputBufferSlot::new).collect(),
                next_seq: 0,
            }),
            handoff: SubmissionHandoff::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handoff(&self) -> &SubmissionHandoff {
        &self.handoff
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.state.lock().slots.get(index).map(InputBufferSlot::state)
    }

    pub fn states(&self) -> Vec<SlotState> {
        self.state.lock().slots.iter().map(InputBufferSlot::state).collect()
    }

    /// Capacity of the decoder buffer bound to `index`, 0 when unbound.
    pub fn capacity(&self, index: usize) -> usize {
        self.state
            .lock()
            .slots
            .get(index)
            .map_or(0, InputBufferSlot::capacity)
    }

    /// Bind a fresh empty decoder buffer to every EMPTY slot the decoder can
    /// serve right now. Running dry is backpressure, not an error.
    pub fn reclaim<D: DecoderDevice + ?Sized>(&self, device: &mut D) -> anyhow::Result<Reclaimed> {
        let empty: Vec<usize> = {
            let state = self.state.lock();
            state
                .slots
                .iter()
                .filter(|s| s.state() == SlotState::Empty)
                .map(InputBufferSlot::index)
                .collect()
        };

        let mut reclaimed = Reclaimed::default();
        for (n, index) in empty.iter().copied().enumerate() {
            let Some(id) = device.dequeue_input(Duration::ZERO)? else {
                reclaimed.still_empty = empty.len() - n;
                log::trace!("reclaim: decoder has no empty input buffer");
                break;
            };
            let region = device.input_region(id)?;

            let mut state = self.state.lock();
            let slot = &mut state.slots[index];
            slot.bind(id, region);
            reclaimed.bound += 1;
            log::debug!(
                "reclaim: slot {} bound to decoder buffer {} ({} bytes)",
                index,
                id,
                slot.capacity()
            );
        }
        Ok(reclaimed)
    }

    /// Claim the first FREE slot for a producer. `None` means every slot is
    /// busy and the producer should retry later.
    pub fn acquire(&self) -> Option<usize> {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .iter_mut()
            .find(|s| s.state() == SlotState::Free)?;
        slot.begin_work();
        log::debug!("acquire: slot {} working", slot.index());
        Some(slot.index())
    }

    /// Run `write` over the writable region of a WORKING slot and record the
    /// number of bytes it reports as filled. The region must not escape `write`.
    pub fn write_into<F>(&self, index: usize, write: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let mut state = self.state.lock();
        let slot = state.working_slot(index, "write")?;
        let Some(region) = slot.region_mut() else {
            return Err(DecoderError::violation(format!(
                "write: slot {index} has no decoder buffer"
            )));
        };
        let capacity = region.capacity();
        // SAFETY: the slot is WORKING and we hold the pool lock, so nobody else
        // touches the region and teardown cannot invalidate it concurrently.
        let filled = write(unsafe { region.as_mut_slice() });
        if filled > capacity {
            return Err(DecoderError::PayloadTooLarge {
                len: filled,
                capacity,
            });
        }
        slot.set_filled(filled);
        Ok(filled)
    }

    /// Copy `payload` into a WORKING slot.
    pub fn fill(&self, index: usize, payload: &[u8]) -> Result<usize> {
        self.write_into(index, |region| {
            if payload.len() > region.len() {
                // Reported by write_into as PayloadTooLarge, region untouched
                return payload.len();
            }
            region[..payload.len()].copy_from_slice(payload);
            payload.len()
        })
    }

    /// WORKING -> QUEUING, then wake the pump exactly once.
    pub fn commit(&self, index: usize, pts_us: i64, flags: CodecFlags) -> Result<()> {
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            let slot = state.working_slot(index, "commit")?;
            slot.queue(pts_us, flags, seq);
            log::debug!(
                "commit: slot {} queuing ({} bytes, pts {}us, flags {})",
                index,
                slot.filled(),
                pts_us,
                flags
            );
            state.next_seq += 1;
        }
        self.handoff.signal();
        Ok(())
    }

    /// Give a WORKING slot back without submitting it. Its decoder buffer was
    /// never handed over, so it stays bound.
    pub fn abandon(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state.working_slot(index, "abandon")?;
        slot.abandon();
        log::debug!("abandon: slot {} free", index);
        Ok(())
    }

    /// Submit the oldest committed slot, if any, to the decoder.
    pub fn drain_one_queued<D: DecoderDevice + ?Sized>(
        &self,
        device: &mut D,
    ) -> anyhow::Result<Option<Submitted>> {
        let submitted = {
            let state = self.state.lock();
            let Some(slot) = state
                .slots
                .iter()
                .filter(|s| s.state() == SlotState::Queuing)
                .min_by_key(|s| s.commit_seq())
            else {
                return Ok(None);
            };
            let Some(buffer_id) = slot.decoder_buffer_id() else {
                anyhow::bail!("queued slot {} lost its decoder buffer", slot.index());
            };
            Submitted {
                index: slot.index(),
                buffer_id,
                len: slot.filled(),
                pts_us: slot.pts_us(),
                flags: slot.flags(),
            }
        };

        device.submit_input(
            submitted.buffer_id,
            submitted.len,
            submitted.pts_us,
            submitted.flags,
        )?;

        self.state.lock().slots[submitted.index].consume();
        log::debug!(
            "drain: slot {} submitted as decoder buffer {}",
            submitted.index,
            submitted.buffer_id
        );
        Ok(Some(submitted))
    }

    /// Forget every decoder buffer binding. Called right before the decoder
    /// session is destroyed so no producer can write into freed memory.
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            slot.invalidate();
        }
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
