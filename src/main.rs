use tokio_util::sync::CancellationToken;

// Only the FFmpeg build has a device to replay into
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
mod annexb;
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
mod config;
#[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
mod replay;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("decoder_pump", log::LevelFilter::Debug)
        .filter_module("lite_decoder", log::LevelFilter::Debug)
        .init();
}

#[cfg(feature = "ffmpeg")]
async fn run(cancel: CancellationToken) -> anyhow::Result<()> {
    use std::sync::Arc;

    use decoder_pump::VideoDecoder;
    use decoder_pump::ffmpeg::FfmpegDevice;

    decoder_pump::init()?;
    let config = config::config();
    let Some(input) = config.input() else {
        anyhow::bail!("usage: lite-decoder <annex-b stream file>");
    };

    let data = bytes::Bytes::from(tokio::fs::read(input).await?);
    let units = annexb::AccessUnitSplitter::new(config.codec(), config.fps()).split(&data);
    if units.is_empty() {
        anyhow::bail!("no decodable units in {}", input.display());
    }

    let decoder = Arc::new(VideoDecoder::<FfmpegDevice>::create(
        None,
        &config.decoder_config(),
        &config.platform_caps(),
    )?);
    decoder.start()?;

    let options = replay::ReplayOptions {
        busy_backoff: config.busy_backoff(),
        frame_interval: config.frame_interval(),
    };
    let result = replay::spawn_replay(decoder.clone(), units, options, cancel).await?;

    decoder.stop();
    let pump = decoder.stats();
    decoder.release()?;

    let stats = result?;
    log::info!(
        "replayed {} units ({} bytes, {} busy retries); pump submitted {}, released {} outputs",
        stats.units,
        stats.bytes,
        stats.busy_retries,
        pump.submitted,
        pump.outputs_released
    );
    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
async fn run(_cancel: CancellationToken) -> anyhow::Result<()> {
    anyhow::bail!(
        "cannot replay {:?}: no decoder device, rebuild with `--features ffmpeg`",
        config::config().input()
    )
}

#[tokio::main]
async fn main() -> ! {
    init_logging();

    let cancel = CancellationToken::new();
    let mut task = tokio::spawn(run(cancel.clone()));

    let code = loop {
        tokio::select! {
            res = &mut task => {
                break match res {
                    Ok(Ok(())) => 0,
                    Ok(Err(e)) => {
                        log::error!("{:#}", e);
                        1
                    }
                    Err(e) => {
                        log::error!("replay task failed: {}", e);
                        1
                    }
                };
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    };

    std::process::exit(code);
}
