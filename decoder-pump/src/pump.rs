use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::decoder::Session;
use crate::device::DecoderDevice;
use crate::handoff::Wakeup;

/// Point-in-time copy of the pump counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub submitted: u64,
    pub outputs_released: u64,
    /// Reclaim passes that left at least one slot without a decoder buffer.
    pub reclaim_misses: u64,
    /// Bounded waits that elapsed without a commit.
    pub idle_wakeups: u64,
}

#[derive(Default)]
pub(crate) struct PumpCounters {
    submitted: AtomicU64,
    outputs_released: AtomicU64,
    reclaim_misses: AtomicU64,
    idle_wakeups: AtomicU64,
}

impl PumpCounters {
    pub(crate) fn snapshot(&self) -> PumpStats {
        PumpStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            outputs_released: self.outputs_released.load(Ordering::Relaxed),
            reclaim_misses: self.reclaim_misses.load(Ordering::Relaxed),
            idle_wakeups: self.idle_wakeups.load(Ordering::Relaxed),
        }
    }
}

/// The single background thread feeding the decoder.
pub(crate) struct DecoderPump<D: DecoderDevice> {
    session: Arc<Session<D>>,
}

impl<D: DecoderDevice> DecoderPump<D> {
    pub(crate) fn spawn(session: Arc<Session<D>>) -> std::io::Result<JoinHandle<()>> {
        let pump = Self { session };
        std::thread::Builder::new()
            .name("decoder-pump".to_string())
            .spawn(move || pump.run())
    }

    fn run(self) {
        log::info!("decoder pump started");
        if let Err(e) = self.pump_loop() {
            log::error!("decoder pump stopped on device error: {:#}", e);
            self.session.record_fault(e);
        }
        // Performs the deferred release, if one was requested
        self.session.finish_pump();
        log::info!("decoder pump quit");
    }

    fn pump_loop(&self) -> anyhow::Result<()> {
        let session = &self.session;
        let handoff = session.pool.handoff();
        let idle_poll = session.pump_config.idle_poll;

        while session.is_running() {
            let reclaimed = session.with_device(|device| session.pool.reclaim(device))?;

            let wakeup = if reclaimed.still_empty > 0 {
                session.counters.reclaim_misses.fetch_add(1, Ordering::Relaxed);
                handoff.wait_one_timeout(idle_poll)
            } else {
                handoff.wait_one()
            };

            // Shutdown wins over anything still queued
            if !session.is_running() {
                break;
            }

            match wakeup {
                Wakeup::Shutdown => break,
                Wakeup::Submit => self.drain_one()?,
                Wakeup::Timeout => {
                    session.counters.idle_wakeups.fetch_add(1, Ordering::Relaxed);
                }
            }

            self.poll_output()?;
        }
        Ok(())
    }

    fn drain_one(&self) -> anyhow::Result<()> {
        let session = &self.session;
        match session.with_device(|device| session.pool.drain_one_queued(device))? {
            Some(submitted) => {
                session.counters.submitted.fetch_add(1, Ordering::Relaxed);
                log::trace!("pump: submitted {:?}", submitted);
            }
            None => log::warn!("pump: woken for a commit but no slot is queued"),
        }
        Ok(())
    }

    fn poll_output(&self) -> anyhow::Result<()> {
        let session = &self.session;
        let render = session.pump_config.render_output;
        session.with_device(|device| {
            if let Some(output) = device.dequeue_output(Duration::ZERO)? {
                device.release_output(output, render)?;
                session
                    .counters
                    .outputs_released
                    .fetch_add(1, Ordering::Relaxed);
                log::trace!("pump: released output {} (pts {}us)", output.id, output.pts_us);
            }
            Ok(())
        })
    }
}
