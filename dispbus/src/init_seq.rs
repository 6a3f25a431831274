//! Controller bring-up tables and their player.
//!
//! Each entry is a command byte followed by up to 16 parameter bytes. The
//! `databytes` field packs the parameter count (low 5 bits) with a flag asking
//! for a 100 ms pause afterwards; `0xFF` ends the table.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;

use crate::bus::{DisplayBus, Transport};
use crate::error::Error;

/// Parameter bytes an entry can carry.
pub const MAX_PARAMS: usize = 16;

/// `databytes` bit requesting a pause after the entry.
pub const DELAY_FLAG: u8 = 0x80;

/// `databytes` mask for the parameter count.
pub const LEN_MASK: u8 = 0x1F;

/// `databytes` value terminating a table.
pub const END_MARKER: u8 = 0xFF;

/// Pause after flagged entries.
pub const INIT_DELAY_MS: u32 = 100;

/// One bring-up table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitCommand {
    pub cmd: u8,
    pub data: [u8; MAX_PARAMS],
    pub databytes: u8,
}

impl InitCommand {
    /// Command with parameters (at most 16 are kept).
    pub const fn new(
        cmd: u8,
        params: &[u8],
    ) -> Self {
        let mut data = [0u8; MAX_PARAMS];
        let mut i = 0;
        while i < params.len() && i < MAX_PARAMS {
            data[i] = params[i];
            i += 1;
        }
        Self {
            cmd,
            data,
            databytes: i as u8,
        }
    }

    /// Entry from a raw `databytes` value, as found in vendor tables.
    pub const fn raw(
        cmd: u8,
        data: [u8; MAX_PARAMS],
        databytes: u8,
    ) -> Self {
        Self { cmd, data, databytes }
    }

    /// Pause for 100 ms after this entry.
    pub const fn delayed(mut self) -> Self {
        self.databytes |= DELAY_FLAG;
        self
    }

    /// Table terminator.
    pub const fn end() -> Self {
        Self {
            cmd: 0,
            data: [0; MAX_PARAMS],
            databytes: END_MARKER,
        }
    }

    #[inline]
    pub const fn is_end(&self) -> bool { self.databytes == END_MARKER }

    #[inline]
    pub const fn has_delay(&self) -> bool { self.databytes & DELAY_FLAG != 0 }

    /// Parameter count after masking, clamped to the data array.
    #[inline]
    pub const fn param_len(&self) -> usize {
        let len = (self.databytes & LEN_MASK) as usize;
        if len > MAX_PARAMS { MAX_PARAMS } else { len }
    }

    #[inline]
    pub fn params(&self) -> &[u8] { &self.data[..self.param_len()] }
}

/// Play `table` over `bus` with polling transfers, stopping at the end marker.
///
/// Returns the number of commands sent.
pub async fn run_init_sequence<M, T, const C: usize, const Q: usize>(
    bus: &DisplayBus<M, T, C, Q>,
    table: &[InitCommand],
    delay: &mut impl DelayNs,
) -> Result<usize, Error>
where
    M: RawMutex,
    T: Transport,
{
    let mut sent = 0;
    for entry in table.iter().take_while(|entry| !entry.is_end()) {
        bus.send_command(entry.cmd).await?;
        bus.send_data(entry.params()).await?;
        if entry.has_delay() {
            delay.delay_ms(INIT_DELAY_MS).await;
        }
        sent += 1;
    }
    debug!("init sequence sent {=usize} commands", sent);
    Ok(sent)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_counts_params() {
        let entry = InitCommand::new(0xCF, &[0x00, 0x83, 0x30]);
        assert_eq!(entry.params(), &[0x00, 0x83, 0x30]);
        assert!(!entry.has_delay());
        assert!(!entry.is_end());
    }

    #[test]
    fn test_delay_flag_masked_from_length() {
        let entry = InitCommand::new(0x11, &[]).delayed();
        assert_eq!(entry.databytes, 0x80);
        assert_eq!(entry.param_len(), 0);
        assert!(entry.has_delay());
    }

    #[test]
    fn test_length_clamped() {
        let entry = InitCommand::raw(0xE0, [0xAA; MAX_PARAMS], 0x1F);
        assert_eq!(entry.param_len(), MAX_PARAMS);

        let long = InitCommand::new(0xE0, &[1; 20]);
        assert_eq!(long.param_len(), MAX_PARAMS);
    }

    #[test]
    fn test_end_marker() {
        assert!(InitCommand::end().is_end());
        // 0x9F carries the delay flag and a masked length but is not a terminator
        assert!(!InitCommand::raw(0x29, [0; MAX_PARAMS], 0x9F).is_end());
    }
}
