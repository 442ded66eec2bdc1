//! Decoder configuration and the platform-gated format negotiation.

use std::time::Duration;

pub const KEY_MIME: &str = "mime";
pub const KEY_WIDTH: &str = "width";
pub const KEY_HEIGHT: &str = "height";
pub const KEY_FRAME_RATE: &str = "frame-rate";
pub const KEY_LATENCY: &str = "latency";
pub const KEY_OPERATING_RATE: &str = "operating-rate";
pub const KEY_VENDOR_LOW_LATENCY: &str = "vendor.qti-ext-dec-low-latency.enable";

pub const API_KITKAT: u32 = 19;
pub const API_M: u32 = 23;
pub const API_R: u32 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    // e.g. "c2.qti.avc.decoder", "h264"
    pub codec_name: String,
    // e.g. "video/avc", "video/hevc"
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub low_latency: bool,
    pub pool_size: usize,
}

impl DecoderConfig {
    pub fn new(codec_name: &str, mime_type: &str, width: u32, height: u32, fps: u32) -> Self {
        Self {
            codec_name: codec_name.to_string(),
            mime_type: mime_type.to_string(),
            width,
            height,
            fps,
            low_latency: false,
            pool_size: 1,
        }
    }

    pub fn with_low_latency(mut self, low_latency: bool) -> Self {
        self.low_latency = low_latency;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// Pump thread tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PumpConfig {
    /// Upper bound on the handoff wait while some slot still lacks a decoder buffer.
    pub idle_poll: Duration,
    /// Render released output buffers to the configured surface.
    pub render_output: bool,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(2),
            render_output: true,
        }
    }
}

/// Answers from the platform-capability collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformCaps {
    pub api_level: u32,
    /// Decoder accepts the Qualcomm vendor low-latency extension.
    pub vendor_low_latency: bool,
    /// Decoder tolerates `operating-rate` pinned to its maximum.
    pub max_operating_rate: bool,
}

impl PlatformCaps {
    pub fn new(api_level: u32) -> Self {
        Self {
            api_level,
            vendor_low_latency: false,
            max_operating_rate: false,
        }
    }

    /// Every version-gated key is applied; for devices without platform versioning.
    pub fn unrestricted() -> Self {
        Self::new(u32::MAX)
    }

    pub fn with_vendor_low_latency(mut self, supported: bool) -> Self {
        self.vendor_low_latency = supported;
        self
    }

    pub fn with_max_operating_rate(mut self, supported: bool) -> Self {
        self.max_operating_rate = supported;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatValue {
    Str(String),
    I32(i32),
}

/// Ordered key/value set handed to [`crate::device::DecoderDevice::configure`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderFormat {
    entries: Vec<(String, FormatValue)>,
}

impl DecoderFormat {
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set(key, FormatValue::Str(value.to_string()));
    }

    pub fn set_i32(&mut self, key: &str, value: i32) {
        self.set(key, FormatValue::I32(value));
    }

    fn set(&mut self, key: &str, value: FormatValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(FormatValue::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(FormatValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Builds the decoder format for `config`, applying only the keys the
/// platform is known to accept.
pub fn build_format(config: &DecoderConfig, caps: &PlatformCaps) -> DecoderFormat {
    let mut format = DecoderFormat::default();
    format.set_str(KEY_MIME, &config.mime_type);

    // Older releases are known to choke on an explicit frame rate
    if caps.api_level >= API_M {
        format.set_i32(KEY_FRAME_RATE, clamp_i32(config.fps));
    }

    if caps.api_level >= API_KITKAT {
        format.set_i32(KEY_WIDTH, clamp_i32(config.width));
        format.set_i32(KEY_HEIGHT, clamp_i32(config.height));
    }

    if caps.api_level >= API_R && config.low_latency {
        format.set_i32(KEY_LATENCY, 1);
    } else if caps.api_level >= API_M {
        if config.low_latency && caps.vendor_low_latency {
            format.set_i32(KEY_VENDOR_LOW_LATENCY, 1);
        }
        if caps.max_operating_rate {
            format.set_i32(KEY_OPERATING_RATE, i16::MAX as i32);
        }
    }

    log::debug!("negotiated decoder format for {}: {:?}", config.codec_name, format);
    format
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DecoderConfig {
        DecoderConfig::new("c2.test.avc.decoder", "video/avc", 1920, 1080, 60)
    }

    #[test]
    fn test_legacy_platform_only_mime() {
        let format = build_format(&config(), &PlatformCaps::new(18));
        assert_eq!(format.get_str(KEY_MIME), Some("video/avc"));
        assert!(!format.contains(KEY_WIDTH));
        assert!(!format.contains(KEY_FRAME_RATE));
        assert!(!format.contains(KEY_LATENCY));
    }

    #[test]
    fn test_kitkat_sets_size_but_not_frame_rate() {
        let format = build_format(&config(), &PlatformCaps::new(API_KITKAT));
        assert_eq!(format.get_i32(KEY_WIDTH), Some(1920));
        assert_eq!(format.get_i32(KEY_HEIGHT), Some(1080));
        assert!(!format.contains(KEY_FRAME_RATE));
    }

    #[test]
    fn test_low_latency_key_needs_r() {
        let cfg = config().with_low_latency(true);
        let format = build_format(&cfg, &PlatformCaps::new(API_R));
        assert_eq!(format.get_i32(KEY_LATENCY), Some(1));
        assert_eq!(format.get_i32(KEY_FRAME_RATE), Some(60));
        assert!(!format.contains(KEY_VENDOR_LOW_LATENCY));

        let format = build_format(&cfg, &PlatformCaps::new(API_R - 1));
        assert!(!format.contains(KEY_LATENCY));
    }

    #[test]
    fn test_vendor_extensions_below_r() {
        let caps = PlatformCaps::new(API_M)
            .with_vendor_low_latency(true)
            .with_max_operating_rate(true);
        let format = build_format(&config().with_low_latency(true), &caps);
        assert_eq!(format.get_i32(KEY_VENDOR_LOW_LATENCY), Some(1));
        assert_eq!(format.get_i32(KEY_OPERATING_RATE), Some(32767));

        // Vendor low latency only when the stream asked for it
        let format = build_format(&config(), &caps);
        assert!(!format.contains(KEY_VENDOR_LOW_LATENCY));
        assert!(format.contains(KEY_OPERATING_RATE));
    }

    #[test]
    fn test_set_replaces_existing_key() {
        let mut format = DecoderFormat::default();
        format.set_i32(KEY_WIDTH, 640);
        format.set_i32(KEY_WIDTH, 1280);
        assert_eq!(format.iter().count(), 1);
        assert_eq!(format.get_i32(KEY_WIDTH), Some(1280));
    }
}
