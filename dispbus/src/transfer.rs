//! Transfer requests and submission disciplines.
//!
//! A [`Transfer`] describes one chip-select framed bus transaction:
//!
//! ```text
//!   CS↓  [address phase]  [dummy cycles]  [tx / rx payload]  CS↑ (unless held)
//!        D/C held at the requested level for the whole transaction
//! ```
//!
//! A [`Submission`] pairs a transfer with how the caller wants to wait for it.

use heapless::Vec;

use crate::buffer::Lease;
use crate::error::RequestError;

/// Payloads up to this size are copied into the descriptor instead of referenced.
pub const INLINE_CAPACITY: usize = 4;

// =============================================================================
// Flags
// =============================================================================

/// Address phase sent before the payload, most significant byte first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Address {
    Bits8(u8),
    Bits16(u16),
    /// Only the low 24 bits are sent.
    Bits24(u32),
    Bits32(u32),
}

impl Address {
    /// Width of the address phase in bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::Bits8(_) => 8,
            Self::Bits16(_) => 16,
            Self::Bits24(_) => 24,
            Self::Bits32(_) => 32,
        }
    }

    /// Big-endian wire bytes.
    pub fn to_bytes(&self) -> Vec<u8, 4> {
        let (word, len) = match *self {
            Self::Bits8(v) => (u32::from(v), 1),
            Self::Bits16(v) => (u32::from(v), 2),
            Self::Bits24(v) => (v & 0x00FF_FFFF, 3),
            Self::Bits32(v) => (v, 4),
        };
        let be = word.to_be_bytes();
        let mut out = Vec::new();
        // Capacity 4 always fits at most 4 bytes.
        let _ = out.extend_from_slice(&be[4 - len..]);
        out
    }
}

/// Data line width of the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineMode {
    #[default]
    Single,
    /// Two data lines; `wide_address` also sends the address phase on both.
    Dual { wide_address: bool },
    /// Four data lines; `wide_address` also sends the address phase on all four.
    Quad { wide_address: bool },
}

/// Level of the data/command line while the transaction runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DcLevel {
    /// D/C low.
    Command,
    /// D/C high.
    #[default]
    Data,
}

impl DcLevel {
    #[inline]
    pub const fn is_high(self) -> bool { matches!(self, Self::Data) }
}

/// Which way the payload moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
    /// Full duplex: tx and rx clocked together.
    Exchange,
    /// No payload (address and dummy phases only, if any).
    None,
}

// =============================================================================
// Payload
// =============================================================================

/// Transmit payload storage.
#[derive(Debug, Default)]
pub enum TxData<'a> {
    #[default]
    None,
    /// Small payload copied into the transfer.
    Inline { bytes: [u8; INLINE_CAPACITY], len: u8 },
    /// Borrowed payload, only for disciplines that wait for completion.
    Borrowed(&'a [u8]),
    /// Leased static buffer, kept alive until the transfer completes.
    Leased(Lease),
}

impl TxData<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Inline { bytes, len } => &bytes[..usize::from(*len)],
            Self::Borrowed(bytes) => bytes,
            Self::Leased(lease) => lease.as_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize { self.as_slice().len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn inline(bytes: &[u8]) -> Option<TxData<'static>> {
        if bytes.len() > INLINE_CAPACITY {
            return None;
        }
        let mut buf = [0u8; INLINE_CAPACITY];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(TxData::Inline {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }
}

// =============================================================================
// Transfer
// =============================================================================

/// One bus transaction.
#[derive(Debug, Default)]
pub struct Transfer<'a> {
    tx: TxData<'a>,
    rx: Option<&'a mut [u8]>,
    address: Option<Address>,
    dummy_bits: u8,
    line_mode: LineMode,
    dc: DcLevel,
    keep_cs_active: bool,
    signal_flush: bool,
}

impl<'a> Transfer<'a> {
    /// A transfer with no payload and default flags.
    pub const fn empty() -> Self {
        Self {
            tx: TxData::None,
            rx: None,
            address: None,
            dummy_bits: 0,
            line_mode: LineMode::Single,
            dc: DcLevel::Data,
            keep_cs_active: false,
            signal_flush: false,
        }
    }

    /// Write `bytes`. Payloads of up to four bytes are copied inline.
    pub fn write(bytes: &'a [u8]) -> Self {
        let tx = match TxData::inline(bytes) {
            Some(inline) => inline,
            None => TxData::Borrowed(bytes),
        };
        Self { tx, ..Self::empty() }
    }

    /// Read into `rx`.
    pub fn read(rx: &'a mut [u8]) -> Self {
        Self {
            rx: Some(rx),
            ..Self::empty()
        }
    }

    /// Full-duplex exchange; `tx` and `rx` must have equal lengths.
    pub fn exchange(
        tx: &'a [u8],
        rx: &'a mut [u8],
    ) -> Self {
        Self {
            rx: Some(rx),
            ..Self::write(tx)
        }
    }

    // -------------------------------------------------------------------------
    // Flag builders
    // -------------------------------------------------------------------------

    /// Drive D/C low (command byte).
    pub fn command(mut self) -> Self {
        self.dc = DcLevel::Command;
        self
    }

    /// Drive D/C high (parameters, pixels).
    pub fn data(mut self) -> Self {
        self.dc = DcLevel::Data;
        self
    }

    pub fn with_address(
        mut self,
        address: Address,
    ) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_dummy_bits(
        mut self,
        bits: u8,
    ) -> Self {
        self.dummy_bits = bits;
        self
    }

    pub fn with_line_mode(
        mut self,
        mode: LineMode,
    ) -> Self {
        self.line_mode = mode;
        self
    }

    /// Leave chip select asserted after this transaction so the next one continues it.
    pub fn keep_cs_active(mut self) -> Self {
        self.keep_cs_active = true;
        self
    }

    /// Fire the flush-complete event when this transfer finishes.
    pub fn signal_flush(mut self) -> Self {
        self.signal_flush = true;
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn tx(&self) -> &[u8] { self.tx.as_slice() }

    #[inline]
    pub fn tx_data(&self) -> &TxData<'a> { &self.tx }

    #[inline]
    pub fn rx_mut(&mut self) -> Option<&mut [u8]> { self.rx.as_deref_mut() }

    /// Transmit bytes and receive buffer together, for transports.
    #[inline]
    pub fn buffers(&mut self) -> (&[u8], Option<&mut [u8]>) { (self.tx.as_slice(), self.rx.as_deref_mut()) }

    #[inline]
    pub fn rx_len(&self) -> usize { self.rx.as_ref().map_or(0, |rx| rx.len()) }

    #[inline]
    pub fn has_rx(&self) -> bool { self.rx.is_some() }

    #[inline]
    pub const fn address(&self) -> Option<Address> { self.address }

    #[inline]
    pub const fn dummy_bits(&self) -> u8 { self.dummy_bits }

    #[inline]
    pub const fn line_mode(&self) -> LineMode { self.line_mode }

    #[inline]
    pub const fn dc(&self) -> DcLevel { self.dc }

    #[inline]
    pub const fn keeps_cs_active(&self) -> bool { self.keep_cs_active }

    #[inline]
    pub const fn signals_flush(&self) -> bool { self.signal_flush }

    pub fn direction(&self) -> Direction {
        match (self.tx.is_empty(), self.rx.is_some()) {
            (false, true) => Direction::Exchange,
            (false, false) => Direction::Write,
            (true, true) => Direction::Read,
            (true, false) => Direction::None,
        }
    }

    /// Payload length in bytes (the longer of tx and rx).
    pub fn len(&self) -> usize { self.tx.len().max(self.rx_len()) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Payload length in bits.
    pub fn bit_len(&self) -> usize { self.len() * 8 }

    /// Checks that do not depend on the discipline or the bus.
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(rx) = &self.rx
            && !self.tx.is_empty()
            && rx.len() != self.tx.len()
        {
            return Err(RequestError::LengthMismatch {
                tx: self.tx.len(),
                rx: rx.len(),
            });
        }
        Ok(())
    }
}

impl Transfer<'static> {
    /// Copy a payload of up to four bytes inline; `None` if it is longer.
    pub fn inline(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            tx: TxData::inline(bytes)?,
            ..Self::empty()
        })
    }

    /// A single command byte with D/C low.
    pub fn command_byte(cmd: u8) -> Self {
        let mut bytes = [0u8; INLINE_CAPACITY];
        bytes[0] = cmd;
        Self {
            tx: TxData::Inline { bytes, len: 1 },
            dc: DcLevel::Command,
            ..Self::empty()
        }
    }

    /// Write from a leased buffer. Small leases are copied inline and released at once.
    pub fn write_leased(lease: Lease) -> Self {
        let tx = match TxData::inline(&lease) {
            Some(inline) => inline,
            None => TxData::Leased(lease),
        };
        Self { tx, ..Self::empty() }
    }
}

// =============================================================================
// Submission
// =============================================================================

/// How the caller waits for a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Discipline {
    /// Drain the bus, then busy-wait on the caller's task.
    Polling,
    /// Drain the bus, then run on the DMA path and wait for completion.
    Synchronous,
    /// Hand to the hardware queue and return.
    Queued,
}

/// A transfer tagged with its discipline.
#[derive(Debug)]
pub enum Submission<'a> {
    Polling(Transfer<'a>),
    Synchronous(Transfer<'a>),
    /// Queued transfers outlive the call, so their payload must be `'static`.
    Queued(Transfer<'static>),
}

impl<'a> Submission<'a> {
    pub const fn discipline(&self) -> Discipline {
        match self {
            Self::Polling(_) => Discipline::Polling,
            Self::Synchronous(_) => Discipline::Synchronous,
            Self::Queued(_) => Discipline::Queued,
        }
    }

    pub fn transfer(&self) -> &Transfer<'a> {
        match self {
            Self::Polling(t) | Self::Synchronous(t) => t,
            Self::Queued(t) => t,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
