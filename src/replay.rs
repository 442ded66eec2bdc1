use std::sync::Arc;
use std::time::{Duration, Instant};

use decoder_pump::{DecodeUnit, DecoderDevice, SubmitStatus, VideoDecoder};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub units: u64,
    pub bytes: u64,
    pub busy_retries: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ReplayOptions {
    /// Sleep between attempts while the pool has no free slot.
    pub busy_backoff: Duration,
    /// Submit frames no faster than this; `None` replays as fast as the decoder accepts.
    pub frame_interval: Option<Duration>,
}

/// Feed `units` into `decoder` one at a time, in order. Blocking.
pub fn replay<D: DecoderDevice>(
    decoder: &VideoDecoder<D>,
    units: &[DecodeUnit],
    options: ReplayOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let started_at = Instant::now();

    for unit in units {
        if let Some(interval) = options.frame_interval {
            let due = started_at + interval * unit.frame_number as u32;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        loop {
            if cancel.is_cancelled() {
                log::info!("replay cancelled after {} units", stats.units);
                return Ok(stats);
            }
            if !decoder.is_running() {
                return Err(match decoder.take_fault() {
                    Some(fault) => fault.context("decoder stopped during replay"),
                    None => anyhow::anyhow!("decoder stopped during replay"),
                });
            }

            match decoder.submit_decode_unit(unit)? {
                SubmitStatus::Queued(index) => {
                    log::debug!(
                        "unit #{} {:?} ({} bytes) -> slot {}",
                        unit.frame_number,
                        unit.kind,
                        unit.len(),
                        index
                    );
                    stats.units += 1;
                    stats.bytes += unit.len() as u64;
                    break;
                }
                SubmitStatus::Busy => {
                    stats.busy_retries += 1;
                    std::thread::sleep(options.busy_backoff);
                }
            }
        }
    }
    Ok(stats)
}

/// Run [`replay`] on the blocking pool.
pub fn spawn_replay<D: DecoderDevice>(
    decoder: Arc<VideoDecoder<D>>,
    units: Vec<DecodeUnit>,
    options: ReplayOptions,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<ReplayStats>> {
    tokio::task::spawn_blocking(move || replay(&decoder, &units, options, &cancel))
}
