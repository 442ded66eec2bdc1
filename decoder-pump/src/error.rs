/// Failures surfaced by the decoder core.
///
/// Backpressure is not an error: a full pool is reported through
/// `Option`/[`crate::decoder::SubmitStatus`] return values, not as an error.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// The caller drove a slot or the handle through an illegal transition.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("decoder already started")]
    AlreadyStarted,
    /// The device rejected the requested format or surface pairing.
    #[error("decoder configuration rejected: {0:#}")]
    Configuration(anyhow::Error),
    #[error("payload of {len} bytes exceeds input buffer capacity {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },
    #[error("decoder device error: {0:#}")]
    Device(anyhow::Error),
}

impl DecoderError {
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("protocol violation: {}", msg);
        DecoderError::ProtocolViolation(msg)
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, DecoderError::ProtocolViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, DecoderError>;
