//! Driver error taxonomy.
//!
//! Pool exhaustion is not an error: an empty pool suspends the producer
//! (backpressure) instead of failing. A zero-length request is a successful
//! no-op and never produces an error either.

use core::fmt;

/// Startup failures. Fatal: the firmware aborts when it sees one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The descriptor pool was already seeded.
    PoolAlreadySeeded,
    /// Descriptor storage does not match the pool capacity.
    StorageSize { len: usize, capacity: usize },
    /// A transfer was submitted before the pool was seeded.
    PoolNotSeeded,
    /// Pool capacity, queue depth or transfer size is zero.
    InvalidConfig,
    /// The transport could not be brought up (SPI or GPIO).
    Transport(Fault),
}

/// Reasons the bus refuses a transfer.
///
/// The descriptor has already been returned to the pool when the caller sees
/// one of these, so retrying is always safe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// The payload exceeds the largest transfer the bus accepts.
    TooLong { len: usize, max: usize },
    /// The transport cannot drive the requested line width.
    UnsupportedLineMode,
    /// The hardware queue stayed full past the configured queue timeout.
    QueueFull,
    /// The transport cannot clock a dummy phase of this many bits.
    UnsupportedDummyBits { bits: u8 },
}

/// Malformed requests caught before anything touches the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// Queued transfers return before completion, so they cannot receive.
    ReceiveNotQueueable,
    /// Full-duplex transfers need equally sized tx and rx buffers.
    LengthMismatch { tx: usize, rx: usize },
    /// A dirty region whose end lies before its start.
    InvalidArea,
    /// The pixel lease is shorter than the dirty region it should cover.
    RegionExceedsBuffer { needed: usize, available: usize },
    /// A descriptor handed to a pool that did not give it out.
    ForeignDescriptor { slot: u16 },
}

/// Transport-level failures (SPI peripheral or control pins).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    Spi,
    ChipSelect,
    DataCommand,
    /// Reset or backlight line.
    ControlPin,
}

/// Errors surfaced by the bus context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Init(InitError),
    Rejected(Rejection),
    InvalidRequest(RequestError),
    Transport(Fault),
}

impl Error {
    /// Whether resubmitting the same request can succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected(Rejection::QueueFull) | Self::Transport(_))
    }
}

impl From<InitError> for Error {
    fn from(e: InitError) -> Self { Self::Init(e) }
}

impl From<Rejection> for Error {
    fn from(e: Rejection) -> Self { Self::Rejected(e) }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self { Self::InvalidRequest(e) }
}

impl From<Fault> for Error {
    fn from(e: Fault) -> Self { Self::Transport(e) }
}

impl fmt::Display for Fault {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Spi => f.write_str("SPI transfer failed"),
            Self::ChipSelect => f.write_str("chip-select pin failed"),
            Self::DataCommand => f.write_str("data/command pin failed"),
            Self::ControlPin => f.write_str("reset/backlight pin failed"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Init(InitError::PoolAlreadySeeded) => f.write_str("descriptor pool already seeded"),
            Self::Init(InitError::StorageSize { len, capacity }) => {
                write!(f, "{len} descriptors supplied for a pool of {capacity}")
            }
            Self::Init(InitError::PoolNotSeeded) => f.write_str("descriptor pool not seeded"),
            Self::Init(InitError::InvalidConfig) => f.write_str("invalid bus configuration"),
            Self::Init(InitError::Transport(fault)) => write!(f, "transport bring-up failed: {fault}"),
            Self::Rejected(Rejection::TooLong { len, max }) => {
                write!(f, "transfer of {len} bytes exceeds bus limit of {max}")
            }
            Self::Rejected(Rejection::UnsupportedLineMode) => f.write_str("line mode not supported by transport"),
            Self::Rejected(Rejection::QueueFull) => f.write_str("hardware queue full"),
            Self::Rejected(Rejection::UnsupportedDummyBits { bits }) => {
                write!(f, "dummy phase of {bits} bits not supported by transport")
            }
            Self::InvalidRequest(RequestError::ReceiveNotQueueable) => {
                f.write_str("receive transfers need a waiting discipline")
            }
            Self::InvalidRequest(RequestError::LengthMismatch { tx, rx }) => {
                write!(f, "full-duplex length mismatch (tx {tx}, rx {rx})")
            }
            Self::InvalidRequest(RequestError::InvalidArea) => f.write_str("dirty region end precedes its start"),
            Self::InvalidRequest(RequestError::RegionExceedsBuffer { needed, available }) => {
                write!(f, "dirty region needs {needed} bytes, buffer has {available}")
            }
            Self::InvalidRequest(RequestError::ForeignDescriptor { slot }) => {
                write!(f, "descriptor in slot {slot} does not belong to this pool")
            }
            Self::Transport(fault) => write!(f, "{fault}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::string::ToString;

    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Rejected(Rejection::QueueFull).is_retryable());
        assert!(Error::Transport(Fault::Spi).is_retryable());
        assert!(!Error::Rejected(Rejection::TooLong { len: 9, max: 8 }).is_retryable());
        assert!(!Error::InvalidRequest(RequestError::ReceiveNotQueueable).is_retryable());
        assert!(!Error::Rejected(Rejection::UnsupportedDummyBits { bits: 4 }).is_retryable());
    }

    #[test]
    fn test_display() {
        let e = Error::from(Rejection::TooLong { len: 20_000, max: 10_248 });
        assert_eq!(e.to_string(), "transfer of 20000 bytes exceeds bus limit of 10248");
        assert_eq!(Error::from(Fault::ChipSelect).to_string(), "chip-select pin failed");
    }
}
