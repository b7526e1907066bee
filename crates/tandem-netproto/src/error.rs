use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("{kind} packet expects {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("button bits {0:#x} exceed the defined button set")]
    ButtonOutOfRange(u32),
}
