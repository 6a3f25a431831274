//! Display flush pipeline.
//!
//! Each dirty region goes through three phases:
//!
//! ```text
//!   Idle ─► SetColumnWindow ─► SetRowWindow ─► StreamPixels ─► (hardware done) ─► Idle
//!           CASET x1..x2       RASET y1..y2    RAMWR + queued pixel chunks
//! ```
//!
//! Window commands are polling transfers, so each region starts only after
//! the previous region's pixels are on the panel. Pixels are queued in chunks
//! no larger than the bus limit; the last chunk fires the flush event from
//! the engine once it has actually been transmitted. The renderer is told the
//! buffer is free only then.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::buffer::Lease;
use crate::bus::{DisplayBus, Transport};
use crate::config::BYTES_PER_PIXEL;
use crate::error::{Error, Rejection, RequestError};
use crate::transfer::{Submission, Transfer};

/// Column address set.
pub const CASET: u8 = 0x2A;
/// Row address set.
pub const RASET: u8 = 0x2B;
/// Memory write.
pub const RAMWR: u8 = 0x2C;

// =============================================================================
// Regions
// =============================================================================

/// Inclusive pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Area {
    pub x1: u16,
    pub y1: u16,
    pub x2: u16,
    pub y2: u16,
}

impl Area {
    pub const fn new(
        x1: u16,
        y1: u16,
        x2: u16,
        y2: u16,
    ) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub const fn is_valid(&self) -> bool { self.x2 >= self.x1 && self.y2 >= self.y1 }

    #[inline]
    pub const fn width(&self) -> usize { self.x2.saturating_sub(self.x1) as usize + 1 }

    #[inline]
    pub const fn height(&self) -> usize { self.y2.saturating_sub(self.y1) as usize + 1 }

    /// `None` when the count does not fit a `usize` (32-bit targets, huge areas).
    #[inline]
    pub const fn pixel_count(&self) -> Option<usize> { self.width().checked_mul(self.height()) }

    /// RGB565 bytes needed to cover the area.
    #[inline]
    pub const fn byte_len(&self) -> Option<usize> {
        match self.pixel_count() {
            Some(pixels) => pixels.checked_mul(BYTES_PER_PIXEL),
            None => None,
        }
    }
}

/// Window parameter bytes: start and end, big-endian.
fn window_bytes(
    start: u16,
    end: u16,
) -> [u8; 4] {
    let [s_hi, s_lo] = start.to_be_bytes();
    let [e_hi, e_lo] = end.to_be_bytes();
    [s_hi, s_lo, e_hi, e_lo]
}

/// A rendered area and the pixels for it, row-major RGB565 big-endian.
#[derive(Debug)]
pub struct DirtyRegion {
    pub area: Area,
    pub pixels: Lease,
}

/// Graphics side of the pipeline.
pub trait Renderer {
    /// Next area to push, if any.
    fn dirty_region(&mut self) -> Option<DirtyRegion>;

    /// The last flushed region is on the panel and its buffer may be reused.
    fn on_flush_complete(&mut self);
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlushState {
    #[default]
    Idle,
    SetColumnWindow,
    SetRowWindow,
    StreamPixels,
}

/// Handle for one in-progress flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlushTicket {
    seq: u32,
    /// Queued pixel transfers the region was split into.
    pub chunks: usize,
    /// Pixel bytes streamed.
    pub bytes: usize,
}

/// Drives dirty regions through the bus.
///
/// The pipeline must be the only user of the flush-signal flag on its bus.
pub struct FlushPipeline<'b, M: RawMutex, T, const C: usize, const Q: usize> {
    bus: &'b DisplayBus<M, T, C, Q>,
    state: FlushState,
    issued: u32,
}

impl<'b, M, T, const C: usize, const Q: usize> FlushPipeline<'b, M, T, C, Q>
where
    M: RawMutex,
    T: Transport,
{
    pub fn new(bus: &'b DisplayBus<M, T, C, Q>) -> Self {
        Self {
            bus,
            state: FlushState::Idle,
            issued: bus.queue().flush_count(),
        }
    }

    #[inline]
    pub const fn state(&self) -> FlushState { self.state }

    /// Bytes per queued pixel transfer: the bus limit rounded down to whole pixels.
    #[inline]
    pub const fn chunk_bytes(&self) -> usize {
        let max = self.bus.config().max_transfer_bytes;
        max - max % BYTES_PER_PIXEL
    }

    /// Start pushing `region`. Returns once every pixel chunk is queued.
    pub async fn flush(
        &mut self,
        region: DirtyRegion,
    ) -> Result<FlushTicket, Error> {
        let result = self.start(region).await;
        if result.is_err() {
            self.state = FlushState::Idle;
        }
        result
    }

    async fn start(
        &mut self,
        region: DirtyRegion,
    ) -> Result<FlushTicket, Error> {
        let DirtyRegion { area, pixels } = region;
        if !area.is_valid() {
            return Err(RequestError::InvalidArea.into());
        }
        let Some(needed) = area.byte_len() else {
            return Err(RequestError::RegionExceedsBuffer {
                needed: usize::MAX,
                available: pixels.len(),
            }
            .into());
        };
        if pixels.len() < needed {
            return Err(RequestError::RegionExceedsBuffer {
                needed,
                available: pixels.len(),
            }
            .into());
        }
        let chunk = self.chunk_bytes();
        if chunk == 0 {
            return Err(Rejection::TooLong {
                len: BYTES_PER_PIXEL,
                max: self.bus.config().max_transfer_bytes,
            }
            .into());
        }

        self.state = FlushState::SetColumnWindow;
        self.bus.send_command(CASET).await?;
        self.bus.send_data(&window_bytes(area.x1, area.x2)).await?;

        self.state = FlushState::SetRowWindow;
        self.bus.send_command(RASET).await?;
        self.bus.send_data(&window_bytes(area.y1, area.y2)).await?;

        self.state = FlushState::StreamPixels;
        self.bus.send_command(RAMWR).await?;

        let mut offset = 0;
        let mut chunks = 0;
        while offset < needed {
            let end = (offset + chunk).min(needed);
            let lease = pixels.slice(offset..end).ok_or(RequestError::RegionExceedsBuffer {
                needed,
                available: pixels.len(),
            })?;
            let mut transfer = Transfer::write_leased(lease).data();
            if end == needed {
                transfer = transfer.signal_flush();
            }
            self.bus.submit(Submission::Queued(transfer)).await?;
            offset = end;
            chunks += 1;
        }

        self.issued = self.issued.wrapping_add(1);
        trace!(
            "flush {=u32} queued: {=u16},{=u16}..{=u16},{=u16} in {=usize} chunks",
            self.issued,
            area.x1,
            area.y1,
            area.x2,
            area.y2,
            chunks
        );
        Ok(FlushTicket {
            seq: self.issued,
            chunks,
            bytes: needed,
        })
    }

    /// Whether the hardware has finished streaming `ticket`.
    pub fn is_complete(
        &self,
        ticket: &FlushTicket,
    ) -> bool {
        (self.bus.queue().flush_count().wrapping_sub(ticket.seq) as i32) >= 0
    }

    /// Wait for `ticket` to hit the panel, then notify the renderer.
    pub async fn complete(
        &mut self,
        ticket: FlushTicket,
        renderer: &mut impl Renderer,
    ) {
        self.bus.queue().wait_flush(ticket.seq).await;
        self.state = FlushState::Idle;
        renderer.on_flush_complete();
    }

    /// Push one dirty region end to end. Returns `false` when the renderer had nothing.
    pub async fn service(
        &mut self,
        renderer: &mut impl Renderer,
    ) -> Result<bool, Error> {
        let Some(region) = renderer.dirty_region() else {
            return Ok(false);
        };
        let ticket = self.flush(region).await?;
        self.complete(ticket, renderer).await;
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_dimensions() {
        let band = Area::new(0, 40, 239, 79);
        assert_eq!(band.width(), 240);
        assert_eq!(band.height(), 40);
        assert_eq!(band.byte_len(), Some(19_200));

        let dot = Area::new(5, 5, 5, 5);
        assert_eq!(dot.pixel_count(), Some(1));
        assert!(!Area::new(10, 0, 9, 0).is_valid());
    }

    #[test]
    fn test_full_range_area_checked() {
        let all = Area::new(0, 0, u16::MAX, u16::MAX);
        let expected = 65_536usize.checked_mul(65_536).and_then(|n| n.checked_mul(BYTES_PER_PIXEL));
        assert_eq!(all.byte_len(), expected);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(all.byte_len(), None);
    }

    #[test]
    fn test_window_bytes() {
        assert_eq!(window_bytes(0, 239), [0x00, 0x00, 0x00, 0xEF]);
        assert_eq!(window_bytes(0x0102, 0x0117), [0x01, 0x02, 0x01, 0x17]);
    }
}
