//! Public handle: creation, start/stop/release lifecycle and the producer API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::device::DecoderDevice;
use crate::error::{DecoderError, Result};
use crate::format::{DecoderConfig, PlatformCaps, PumpConfig, build_format};
use crate::pool::InputBufferPool;
use crate::pump::{DecoderPump, PumpCounters, PumpStats};
use crate::slot::SlotState;
use crate::unit::{CodecFlags, DecodeUnit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Configured,
    Running,
    /// Stop requested, pump thread not yet gone.
    Stopping,
    Stopped,
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Teardown {
    None,
    /// The pump thread tears the session down when it exits.
    Pending,
}

struct Control {
    lifecycle: Lifecycle,
    teardown: Teardown,
    pump_alive: bool,
    device_started: bool,
    pump: Option<JoinHandle<()>>,
}

/// State shared between the handle and the pump thread.
pub(crate) struct Session<D: DecoderDevice> {
    pub(crate) pool: InputBufferPool,
    pub(crate) counters: PumpCounters,
    pub(crate) pump_config: PumpConfig,
    running: AtomicBool,
    // Lock order: control, then pool, then device. The pump takes device then pool
    // but never control while holding either.
    control: Mutex<Control>,
    device: Mutex<Option<D>>,
    fault: Mutex<Option<anyhow::Error>>,
}

impl<D: DecoderDevice> Session<D> {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn with_device<R>(
        &self,
        f: impl FnOnce(&mut D) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let mut device = self.device.lock();
        let device = device
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder session already released"))?;
        f(device)
    }

    pub(crate) fn record_fault(&self, err: anyhow::Error) {
        *self.fault.lock() = Some(err);
    }

    fn request_shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.pool.handoff().shutdown();
    }

    /// Called once by the pump thread on its way out.
    pub(crate) fn finish_pump(&self) {
        let mut control = self.control.lock();
        self.request_shutdown();
        control.pump_alive = false;
        match control.teardown {
            Teardown::Pending => {
                self.teardown(&mut control);
                control.teardown = Teardown::None;
                control.lifecycle = Lifecycle::Released;
                // Nobody is left to join us
                control.pump = None;
                log::info!("decoder released by pump thread");
            }
            Teardown::None => {
                if control.lifecycle != Lifecycle::Released {
                    control.lifecycle = Lifecycle::Stopped;
                }
            }
        }
    }

    /// Destroys the decoder session. Runs at most once, under the control lock.
    fn teardown(&self, control: &mut Control) {
        self.pool.invalidate_all();
        let Some(mut device) = self.device.lock().take() else {
            log::warn!("teardown: decoder session already gone");
            return;
        };
        if control.device_started {
            if let Err(e) = device.stop() {
                log::warn!("teardown: decoder stop failed: {:#}", e);
            }
            control.device_started = false;
        }
        drop(device);
    }
}

/// Outcome of [`VideoDecoder::submit_decode_unit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    /// Copied into the given slot and committed.
    Queued(usize),
    /// No free input slot; retry shortly.
    Busy,
}

pub struct VideoDecoder<D: DecoderDevice> {
    session: Arc<Session<D>>,
}

impl<D: DecoderDevice> VideoDecoder<D> {
    /// Open the decoder named in `config` and configure it against `surface`.
    pub fn create(
        surface: Option<&D::Surface>,
        config: &DecoderConfig,
        caps: &PlatformCaps,
    ) -> Result<Self> {
        let device =
            D::open(&config.codec_name, &config.mime_type).map_err(DecoderError::Configuration)?;
        Self::with_device(device, surface, config, caps, PumpConfig::default())
    }

    /// Configure an already opened device.
    pub fn with_device(
        mut device: D,
        surface: Option<&D::Surface>,
        config: &DecoderConfig,
        caps: &PlatformCaps,
        pump_config: PumpConfig,
    ) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(DecoderError::Configuration(anyhow::anyhow!(
                "input buffer pool size must be at least 1"
            )));
        }

        let format = build_format(config, caps);
        device.configure(&format, surface).map_err(|e| {
            log::error!(
                "configure {} ({}) failed: {:#}",
                config.codec_name,
                config.mime_type,
                e
            );
            DecoderError::Configuration(e)
        })?;
        log::info!(
            "using codec {} for {} {}x{}@{} (pool size {})",
            config.codec_name,
            config.mime_type,
            config.width,
            config.height,
            config.fps,
            config.pool_size
        );

        let session = Session {
            pool: InputBufferPool::new(config.pool_size),
            counters: PumpCounters::default(),
            pump_config,
            running: AtomicBool::new(false),
            control: Mutex::new(Control {
                lifecycle: Lifecycle::Configured,
                teardown: Teardown::None,
                pump_alive: false,
                device_started: false,
                pump: None,
            }),
            device: Mutex::new(Some(device)),
            fault: Mutex::new(None),
        };
        Ok(Self {
            session: Arc::new(session),
        })
    }

    /// Start the decoder session, then the pump thread.
    pub fn start(&self) -> Result<()> {
        let session = &self.session;
        let mut control = session.control.lock();
        match control.lifecycle {
            Lifecycle::Configured => {}
            Lifecycle::Running | Lifecycle::Stopping => {
                log::error!("start: decoder already started");
                return Err(DecoderError::AlreadyStarted);
            }
            Lifecycle::Stopped => {
                return Err(DecoderError::violation("start: decoder was already stopped"));
            }
            Lifecycle::Released => {
                return Err(DecoderError::violation("start: decoder was released"));
            }
        }

        session
            .with_device(|device| device.start())
            .map_err(DecoderError::Device)?;
        control.device_started = true;
        log::info!("decoder session started");

        session.running.store(true, Ordering::Release);
        match DecoderPump::spawn(session.clone()) {
            Ok(handle) => {
                control.pump = Some(handle);
                control.pump_alive = true;
                control.lifecycle = Lifecycle::Running;
                Ok(())
            }
            Err(e) => {
                session.running.store(false, Ordering::Release);
                Err(DecoderError::Device(anyhow::anyhow!(
                    "spawn decoder pump: {}",
                    e
                )))
            }
        }
    }

    /// Ask the pump thread to exit. Never blocks; pending commits are not drained.
    pub fn stop(&self) {
        let session = &self.session;
        let mut control = session.control.lock();
        match control.lifecycle {
            Lifecycle::Running => {
                control.lifecycle = Lifecycle::Stopping;
                session.request_shutdown();
                log::info!("decoder stop requested");
            }
            Lifecycle::Configured => {
                control.lifecycle = Lifecycle::Stopped;
            }
            Lifecycle::Stopping | Lifecycle::Stopped | Lifecycle::Released => {}
        }
    }

    /// Destroy the decoder session. If the pump thread is still alive the
    /// teardown is handed to it and this returns immediately.
    pub fn release(&self) -> Result<()> {
        let session = &self.session;
        let mut control = session.control.lock();
        if control.lifecycle == Lifecycle::Released || control.teardown == Teardown::Pending {
            return Err(DecoderError::violation("release: decoder already released"));
        }

        if control.pump_alive {
            control.teardown = Teardown::Pending;
            if control.lifecycle == Lifecycle::Running {
                control.lifecycle = Lifecycle::Stopping;
            }
            session.request_shutdown();
            log::info!("decoder release deferred to pump thread");
            return Ok(());
        }

        session.teardown(&mut control);
        control.lifecycle = Lifecycle::Released;
        let pump = control.pump.take();
        drop(control);

        // The pump already ran finish_pump, joining only reaps the thread
        if let Some(pump) = pump {
            if pump.join().is_err() {
                log::error!("decoder pump thread panicked");
            }
        }
        log::info!("decoder released");
        Ok(())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.session.control.lock().lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Claim a free input slot. `None` is backpressure: the decoder has not
    /// handed out an empty buffer yet, or the decoder is not running.
    pub fn acquire_input_slot(&self) -> Option<usize> {
        if !self.session.is_running() {
            return None;
        }
        self.session.pool.acquire()
    }

    /// Write into the slot's decoder buffer. `write` returns the byte count it filled.
    pub fn write_into<F>(&self, index: usize, write: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        self.session.pool.write_into(index, write)
    }

    pub fn fill(&self, index: usize, payload: &[u8]) -> Result<usize> {
        self.session.pool.fill(index, payload)
    }

    pub fn commit(&self, index: usize, pts_us: i64, flags: CodecFlags) -> Result<()> {
        self.session.pool.commit(index, pts_us, flags)
    }

    /// Hand an acquired slot back unsubmitted.
    pub fn abandon(&self, index: usize) -> Result<()> {
        self.session.pool.abandon(index)
    }

    /// acquire, copy and commit one decode unit.
    pub fn submit_decode_unit(&self, unit: &DecodeUnit) -> Result<SubmitStatus> {
        let Some(index) = self.acquire_input_slot() else {
            return Ok(SubmitStatus::Busy);
        };
        if let Err(e) = self.fill(index, &unit.data) {
            if let Err(abandon_err) = self.abandon(index) {
                log::warn!("abandon slot {} failed: {}", index, abandon_err);
            }
            return Err(e);
        }
        self.commit(index, unit.pts_us, unit.codec_flags())?;
        log::trace!(
            "decode unit #{} ({} bytes) queued in slot {}",
            unit.frame_number,
            unit.len(),
            index
        );
        Ok(SubmitStatus::Queued(index))
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.session.pool.states()
    }

    pub fn stats(&self) -> PumpStats {
        self.session.counters.snapshot()
    }

    /// Device error that terminated the pump thread, if any.
    pub fn take_fault(&self) -> Option<anyhow::Error> {
        self.session.fault.lock().take()
    }
}

impl<D: DecoderDevice> Drop for VideoDecoder<D> {
    fn drop(&mut self) {
        let released = {
            let control = self.session.control.lock();
            control.lifecycle == Lifecycle::Released || control.teardown == Teardown::Pending
        };
        if !released {
            if let Err(e) = self.release() {
                log::warn!("release on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
