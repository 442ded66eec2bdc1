use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use decoder_pump::{DecoderConfig, PlatformCaps};

use crate::annexb::StreamCodec;

const ENV_PREFIX: &str = "LITE_DECODER_";

pub struct ReplayConfig {
    input: Option<PathBuf>,
    codec: StreamCodec,
    decoder_name: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
    pool_size: usize,
    low_latency: bool,
    busy_backoff: Duration,
    paced: bool,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let name = format!("{}{}", ENV_PREFIX, key);
    match lookup(&name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid {}={:?}", name, raw);
            default
        }),
    }
}

impl ReplayConfig {
    /// Resolve from the input path argument and `LITE_DECODER_*` variables.
    pub fn from_vars(input: Option<String>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let codec = lookup(&format!("{}CODEC", ENV_PREFIX))
            .and_then(|name| {
                let codec = StreamCodec::from_name(&name);
                if codec.is_none() {
                    log::warn!("unknown codec {:?}, using h264", name);
                }
                codec
            })
            .unwrap_or(StreamCodec::H264);

        Self {
            input: input.map(PathBuf::from),
            codec,
            decoder_name: lookup(&format!("{}DECODER", ENV_PREFIX)),
            width: parse_or(&lookup, "WIDTH", 1920),
            height: parse_or(&lookup, "HEIGHT", 1080),
            fps: parse_or(&lookup, "FPS", 60u32).max(1),
            pool_size: parse_or(&lookup, "POOL_SIZE", 1usize).max(1),
            low_latency: parse_or(&lookup, "LOW_LATENCY", true),
            busy_backoff: Duration::from_micros(parse_or(&lookup, "BUSY_BACKOFF_US", 500)),
            paced: parse_or(&lookup, "PACED", true),
        }
    }

    pub fn input(&self) -> Option<&PathBuf> {
        self.input.as_ref()
    }

    pub fn codec(&self) -> StreamCodec {
        self.codec
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn busy_backoff(&self) -> Duration {
        self.busy_backoff
    }

    /// Frame interval when pacing to the configured rate.
    pub fn frame_interval(&self) -> Option<Duration> {
        self.paced.then(|| Duration::from_secs(1) / self.fps)
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        let name = self
            .decoder_name
            .clone()
            .unwrap_or_else(|| self.codec.default_decoder().to_string());
        DecoderConfig::new(&name, self.codec.mime_type(), self.width, self.height, self.fps)
            .with_low_latency(self.low_latency)
            .with_pool_size(self.pool_size)
    }

    /// Desktop decoders are not gated by platform version.
    pub fn platform_caps(&self) -> PlatformCaps {
        PlatformCaps::unrestricted()
    }
}

pub fn config() -> &'static ReplayConfig {
    static CONFIG: LazyLock<ReplayConfig> = LazyLock::new(|| {
        ReplayConfig::from_vars(std::env::args().nth(1), |key| std::env::var(key).ok())
    });
    &CONFIG
}
