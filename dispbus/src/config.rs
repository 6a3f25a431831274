//! Bus and panel configuration.
//!
//! Everything here is fixed at build or init time. Pool capacity and hardware
//! queue depth are const generics on [`DisplayBus`](crate::DisplayBus) so the
//! storage is sized at compile time; the remaining knobs travel in
//! [`BusConfig`].

use embassy_time::Duration;

// =============================================================================
// Panel Geometry
// =============================================================================

/// Panel width in pixels (240x280 ST7789V / ILI9341-compatible module).
pub const LCD_WIDTH: u16 = 240;

/// Panel height in pixels.
pub const LCD_HEIGHT: u16 = 280;

/// RGB565: two bytes on the wire per pixel.
pub const BYTES_PER_PIXEL: usize = 2;

/// Lines the renderer draws per band (1/7 of the panel height).
pub const BAND_LINES: u16 = LCD_HEIGHT / 7;

/// Bytes in one full-width band (240 * 40 * 2 = 19,200).
pub const BAND_BYTES: usize = LCD_WIDTH as usize * BAND_LINES as usize * BYTES_PER_PIXEL;

/// Lines per bus transfer used to size the largest transfer.
pub const PARALLEL_LINES: usize = 16;

/// Largest single transfer the bus accepts: 16 lines of a 320-pixel row plus command slack.
pub const MAX_TRANSFER_BYTES: usize = PARALLEL_LINES * 320 * BYTES_PER_PIXEL + 8;

// =============================================================================
// Transfer Pool / Hardware Queue
// =============================================================================

/// Preallocated transfer descriptors.
pub const POOL_CAPACITY: usize = 50;

/// Reserve low-water mark is `capacity / RESERVE_DIVISOR` (10%).
pub const RESERVE_DIVISOR: usize = 10;

/// Transfers the SPI hardware queue holds before refusing more.
pub const QUEUE_DEPTH: usize = 7;

/// Tasks that may park on one pool or queue at the same time (producers
/// plus the engine). More waiters still make progress but wake each other.
pub const MAX_WAITERS: usize = 4;

/// Completion poll interval used while draining (one scheduler tick).
pub const DRAIN_POLL: Duration = Duration::from_millis(1);

// =============================================================================
// Clocks
// =============================================================================

/// Display SPI clock.
pub const DISPLAY_CLOCK_HZ: u32 = 10_000_000;

/// Touch controller SPI clock (XPT2046 tops out around 2.5 MHz).
pub const TOUCH_CLOCK_HZ: u32 = 2_000_000;

// =============================================================================
// Bus Configuration
// =============================================================================

/// SPI clock polarity/phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    /// CPOL: clock idles high.
    #[inline]
    pub const fn idle_high(self) -> bool { matches!(self, Self::Mode2 | Self::Mode3) }

    /// CPHA: data captured on the second clock edge.
    #[inline]
    pub const fn capture_on_second_edge(self) -> bool { matches!(self, Self::Mode1 | Self::Mode3) }
}

/// GPIO identities of the control lines. Informational for the driver, used
/// by the firmware for its pin table and logged at bring-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinMap {
    pub sclk: u8,
    pub mosi: u8,
    pub miso: Option<u8>,
    pub cs: u8,
    pub dc: Option<u8>,
    pub reset: Option<u8>,
    pub backlight: Option<u8>,
}

/// Per-bus configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// SPI clock in Hz.
    pub clock_hz: u32,
    /// SPI timing mode.
    pub mode: SpiMode,
    /// Control pin identities.
    pub pins: PinMap,
    /// Reserve low-water mark divisor (`R = max(1, C / reserve_divisor)`).
    pub reserve_divisor: usize,
    /// Largest payload a single transfer may carry.
    pub max_transfer_bytes: usize,
    /// Completion poll interval while draining; `None` waits indefinitely per completion.
    pub drain_poll: Option<Duration>,
    /// How long a queued submission waits for a hardware queue slot; `None` waits forever.
    pub queue_timeout: Option<Duration>,
}

impl BusConfig {
    /// Configuration with the default reserve, transfer limit and drain poll.
    pub const fn new(
        clock_hz: u32,
        pins: PinMap,
    ) -> Self {
        Self {
            clock_hz,
            mode: SpiMode::Mode0,
            pins,
            reserve_divisor: RESERVE_DIVISOR,
            max_transfer_bytes: MAX_TRANSFER_BYTES,
            drain_poll: Some(DRAIN_POLL),
            queue_timeout: None,
        }
    }

    pub const fn with_mode(
        mut self,
        mode: SpiMode,
    ) -> Self {
        self.mode = mode;
        self
    }

    pub const fn with_reserve_divisor(
        mut self,
        divisor: usize,
    ) -> Self {
        self.reserve_divisor = divisor;
        self
    }

    pub const fn with_max_transfer_bytes(
        mut self,
        bytes: usize,
    ) -> Self {
        self.max_transfer_bytes = bytes;
        self
    }

    pub const fn with_drain_poll(
        mut self,
        poll: Option<Duration>,
    ) -> Self {
        self.drain_poll = poll;
        self
    }

    pub const fn with_queue_timeout(
        mut self,
        timeout: Option<Duration>,
    ) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Reserve low-water mark for a pool of `capacity` descriptors.
    ///
    /// Never zero, otherwise a producer facing an empty pool would stop
    /// reaping before anything became idle.
    pub const fn reserve(
        &self,
        capacity: usize,
    ) -> usize {
        let divisor = if self.reserve_divisor == 0 { 1 } else { self.reserve_divisor };
        let reserve = capacity / divisor;
        if reserve == 0 { 1 } else { reserve }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PINS: PinMap = PinMap {
        sclk: 18,
        mosi: 19,
        miso: Some(4),
        cs: 17,
        dc: Some(16),
        reset: Some(21),
        backlight: Some(20),
    };

    #[test]
    fn test_constants() {
        assert_eq!(BAND_LINES, 40);
        assert_eq!(BAND_BYTES, 19_200);
        assert_eq!(MAX_TRANSFER_BYTES, 10_248);
        assert_eq!(POOL_CAPACITY / RESERVE_DIVISOR, 5);
    }

    #[test]
    fn test_reserve_defaults() {
        let config = BusConfig::new(DISPLAY_CLOCK_HZ, PINS);
        assert_eq!(config.reserve(POOL_CAPACITY), 5);
        assert_eq!(config.mode, SpiMode::Mode0);
        assert_eq!(config.queue_timeout, None);
    }

    #[test]
    fn test_reserve_never_zero() {
        let config = BusConfig::new(DISPLAY_CLOCK_HZ, PINS);
        assert_eq!(config.reserve(4), 1);
        assert_eq!(config.with_reserve_divisor(0).reserve(4), 4);
    }

    #[test]
    fn test_builders() {
        let config = BusConfig::new(TOUCH_CLOCK_HZ, PINS)
            .with_mode(SpiMode::Mode3)
            .with_max_transfer_bytes(64)
            .with_drain_poll(None);
        assert_eq!(config.clock_hz, 2_000_000);
        assert_eq!(config.mode, SpiMode::Mode3);
        assert_eq!(config.max_transfer_bytes, 64);
        assert!(config.drain_poll.is_none());
    }

    #[test]
    fn test_spi_mode_bits() {
        assert!(!SpiMode::Mode0.idle_high() && !SpiMode::Mode0.capture_on_second_edge());
        assert!(!SpiMode::Mode1.idle_high() && SpiMode::Mode1.capture_on_second_edge());
        assert!(SpiMode::Mode2.idle_high() && !SpiMode::Mode2.capture_on_second_edge());
        assert!(SpiMode::Mode3.idle_high() && SpiMode::Mode3.capture_on_second_edge());
    }
}
