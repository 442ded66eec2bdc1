use std::time::{Duration, Instant};

use super::{Lifecycle, SubmitStatus, VideoDecoder};
use crate::error::DecoderError;
use crate::format::{DecoderConfig, KEY_MIME, PlatformCaps, PumpConfig};
use crate::slot::SlotState;
use crate::testing::{MockDevice, MockHandle};
use crate::unit::{CodecFlags, DecodeUnit, UnitKind};

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn config(pool_size: usize) -> DecoderConfig {
    DecoderConfig::new("mock.avc.decoder", "video/avc", 1280, 720, 60).with_pool_size(pool_size)
}

fn decoder(pool_size: usize, buffers: usize) -> (VideoDecoder<MockDevice>, MockHandle) {
    let (device, mock) = MockDevice::new(buffers, 256);
    let decoder = VideoDecoder::with_device(
        device,
        None,
        &config(pool_size),
        &PlatformCaps::unrestricted(),
        PumpConfig::default(),
    )
    .unwrap();
    (decoder, mock)
}

#[test]
fn test_create_configures_device() {
    let (decoder, mock) = decoder(1, 1);
    assert_eq!(decoder.lifecycle(), Lifecycle::Configured);
    let format = mock.with(|s| s.configured.clone()).unwrap();
    assert_eq!(format.get_str(KEY_MIME), Some("video/avc"));
    assert!(!decoder.is_running());
    assert_eq!(decoder.acquire_input_slot(), None);
}

#[test]
fn test_create_rejected_format() {
    let (device, mock) = MockDevice::new(1, 16);
    mock.with(|s| s.fail_configure = true);
    let result = VideoDecoder::with_device(
        device,
        None,
        &config(1),
        &PlatformCaps::unrestricted(),
        PumpConfig::default(),
    );
    assert!(matches!(result, Err(DecoderError::Configuration(_))));
    // The rejected session is not leaked
    assert_eq!(mock.with(|s| s.drops), 1);
}

#[test]
fn test_create_unknown_codec() {
    let mut cfg = config(1);
    cfg.codec_name = "missing".to_string();
    let result = VideoDecoder::<MockDevice>::create(None, &cfg, &PlatformCaps::new(30));
    assert!(matches!(result, Err(DecoderError::Configuration(_))));

    let decoder = VideoDecoder::<MockDevice>::create(None, &config(1), &PlatformCaps::new(30))
        .expect("mock codec opens");
    assert_eq!(decoder.lifecycle(), Lifecycle::Configured);
}

#[test]
fn test_zero_pool_size_rejected() {
    let (device, _mock) = MockDevice::new(1, 16);
    let result = VideoDecoder::with_device(
        device,
        None,
        &config(0),
        &PlatformCaps::unrestricted(),
        PumpConfig::default(),
    );
    assert!(matches!(result, Err(DecoderError::Configuration(_))));
}

#[test]
fn test_start_twice_fails() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    decoder.start()?;
    assert!(matches!(decoder.start(), Err(DecoderError::AlreadyStarted)));
    assert_eq!(mock.with(|s| s.starts), 1);
    decoder.stop();
    Ok(())
}

#[test]
fn test_end_to_end_single_slot() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    decoder.start()?;
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));

    let index = decoder.acquire_input_slot().expect("slot 0 free");
    assert_eq!(index, 0);
    assert_eq!(decoder.slot_states(), vec![SlotState::Working]);

    let written = decoder.write_into(index, |region| {
        region[..4].copy_from_slice(&[0, 0, 0, 1]);
        region[4..10].fill(0xAB);
        10
    })?;
    assert_eq!(written, 10);
    decoder.commit(index, 33_333, CodecFlags::KEY_FRAME)?;

    assert!(wait_until(|| mock.submissions().len() == 1));
    let submission = &mock.submissions()[0];
    assert_eq!(submission.id, 0);
    assert_eq!(submission.data.len(), 10);
    assert_eq!(&submission.data[..4], &[0, 0, 0, 1]);
    assert_eq!(submission.pts_us, 33_333);
    assert_eq!(submission.flags, CodecFlags::KEY_FRAME);

    // The pump reclaims the recycled buffer and the producer can go again
    assert!(wait_until(|| decoder.acquire_input_slot() == Some(0)));
    assert!(wait_until(|| decoder.stats().outputs_released == 1));
    assert!(mock.with(|s| s.released[0].1));

    decoder.stop();
    decoder.release()?;
    Ok(())
}

#[test]
fn test_single_slot_backpressure() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    mock.with(|s| s.recycle = false);
    decoder.start()?;
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));

    let index = decoder.acquire_input_slot().unwrap();
    assert_eq!(decoder.acquire_input_slot(), None);
    decoder.fill(index, b"first")?;
    decoder.commit(index, 0, CodecFlags::NONE)?;

    // The decoder keeps the buffer, so nothing can be acquired
    assert!(wait_until(|| mock.submissions().len() == 1));
    assert_eq!(decoder.acquire_input_slot(), None);
    assert_eq!(
        decoder.submit_decode_unit(&DecodeUnit::new(
            b"second".to_vec(),
            UnitKind::Frame,
            1,
            1
        ))?,
        SubmitStatus::Busy
    );

    // Once the decoder frees the buffer, the pump's bounded retry picks it up
    mock.make_available(0);
    assert!(wait_until(|| decoder.acquire_input_slot().is_some()));
    assert!(decoder.stats().reclaim_misses > 0);
    Ok(())
}

#[test]
fn test_reclaim_retries_without_commits() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    mock.with(|s| s.available.clear());
    decoder.start()?;

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(decoder.slot_states(), vec![SlotState::Empty]);
    mock.make_available(0);
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));
    assert!(decoder.stats().idle_wakeups > 0);
    Ok(())
}

#[test]
fn test_every_commit_submitted_exactly_once() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(2, 2);
    decoder.start()?;

    let total = 50u64;
    for n in 0..total {
        let unit = DecodeUnit::new(n.to_le_bytes().to_vec(), UnitKind::Frame, n, n as i64);
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match decoder.submit_decode_unit(&unit)? {
                SubmitStatus::Queued(_) => break,
                SubmitStatus::Busy => {
                    assert!(Instant::now() < deadline, "producer starved at unit {n}");
                    std::thread::sleep(Duration::from_micros(200));
                }
            }
        }
    }

    assert!(wait_until(|| mock.submissions().len() == total as usize));
    // Give a stray double submission the chance to show up
    std::thread::sleep(Duration::from_millis(20));
    let submissions = mock.submissions();
    assert_eq!(submissions.len(), total as usize);
    for (n, submission) in submissions.iter().enumerate() {
        assert_eq!(submission.pts_us, n as i64);
        assert_eq!(submission.data, (n as u64).to_le_bytes().to_vec());
    }
    assert_eq!(decoder.stats().submitted, total);
    Ok(())
}

#[test]
fn test_stop_unblocks_idle_pump() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    decoder.start()?;
    // Slot bound, so the pump is parked in an unbounded wait
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));

    let stopped_at = Instant::now();
    decoder.stop();
    assert!(wait_until(|| decoder.lifecycle() == Lifecycle::Stopped));
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!decoder.is_running());
    assert!(mock.submissions().is_empty());
    assert_eq!(decoder.acquire_input_slot(), None);

    // Stop is idempotent
    decoder.stop();
    assert_eq!(decoder.lifecycle(), Lifecycle::Stopped);

    decoder.release()?;
    assert_eq!(mock.with(|s| (s.stops, s.drops)), (1, 1));
    Ok(())
}

#[test]
fn test_release_while_running_is_deferred() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    decoder.start()?;
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));

    decoder.release()?;
    assert!(wait_until(|| decoder.lifecycle() == Lifecycle::Released));
    assert_eq!(mock.with(|s| (s.stops, s.drops)), (1, 1));
    assert_eq!(decoder.slot_states(), vec![SlotState::Empty]);

    let err = decoder.release().unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(mock.with(|s| s.drops), 1);
    Ok(())
}

#[test]
fn test_release_twice_while_pending() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    decoder.start()?;
    decoder.release()?;
    // Whether or not the pump has finished yet, a second release is rejected
    assert!(decoder.release().unwrap_err().is_protocol_violation());
    assert!(wait_until(|| mock.with(|s| s.drops) == 1));
    Ok(())
}

#[test]
fn test_release_never_started() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    decoder.release()?;
    assert_eq!(decoder.lifecycle(), Lifecycle::Released);
    // Never started, so never stopped
    assert_eq!(mock.with(|s| (s.stops, s.drops)), (0, 1));
    assert!(decoder.release().unwrap_err().is_protocol_violation());
    assert!(decoder.start().unwrap_err().is_protocol_violation());
    Ok(())
}

#[test]
fn test_device_fault_stops_pump() -> anyhow::Result<()> {
    let (decoder, mock) = decoder(1, 1);
    mock.with(|s| s.fail_submit = true);
    decoder.start()?;
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));

    let unit = DecodeUnit::new(b"boom".to_vec(), UnitKind::KeyFrame, 0, 0);
    assert_eq!(decoder.submit_decode_unit(&unit)?, SubmitStatus::Queued(0));
    assert!(wait_until(|| decoder.lifecycle() == Lifecycle::Stopped));

    let fault = decoder.take_fault().expect("fault recorded");
    assert!(format!("{fault:#}").contains("device lost"));
    assert!(decoder.take_fault().is_none());

    decoder.release()?;
    assert_eq!(mock.with(|s| s.drops), 1);
    Ok(())
}

#[test]
fn test_oversized_unit_leaves_slot_usable() -> anyhow::Result<()> {
    let (decoder, _mock) = decoder(1, 1);
    decoder.start()?;
    assert!(wait_until(|| decoder.slot_states() == vec![SlotState::Free]));

    let unit = DecodeUnit::new(vec![0u8; 1024], UnitKind::Frame, 0, 0);
    let err = decoder.submit_decode_unit(&unit).unwrap_err();
    assert!(matches!(err, DecoderError::PayloadTooLarge { capacity: 256, .. }));
    assert_eq!(decoder.slot_states(), vec![SlotState::Free]);
    Ok(())
}

#[test]
fn test_drop_releases_session() {
    let (decoder, mock) = decoder(1, 1);
    decoder.start().unwrap();
    drop(decoder);
    assert!(wait_until(|| mock.with(|s| s.drops) == 1));
    assert_eq!(mock.with(|s| s.stops), 1);
}
