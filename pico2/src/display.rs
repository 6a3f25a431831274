//! Board wiring for the display and touch buses.
//!
//! Display (SPI0, ST7789 / ILI9341):
//! - MISO: GPIO4 (SPI0 RX, panel ID read)
//! - DC: GPIO16
//! - CS: GPIO17 (software chip select)
//! - CLK: GPIO18 (SPI0 CLK)
//! - MOSI: GPIO19 (SPI0 TX)
//! - Backlight: GPIO20 (active high)
//! - Reset: GPIO21
//!
//! Touch (SPI1, XPT2046):
//! - CLK: GPIO10, MOSI: GPIO11, MISO: GPIO12
//! - CS: GPIO13
//! - IRQ: GPIO14 (active low, pull-up)

use dispbus::config::{DISPLAY_CLOCK_HZ, POOL_CAPACITY, QUEUE_DEPTH, TOUCH_CLOCK_HZ};
use dispbus::{BusConfig, DisplayBus, PinMap, SpiTransport};
use embassy_rp::gpio::Output;
use embassy_rp::peripherals::{SPI0, SPI1};
use embassy_rp::spi::{Async, Config as SpiConfig, Phase, Polarity, Spi};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Touch descriptors: the controller only sees synchronous reads.
pub const TOUCH_POOL_CAPACITY: usize = 2;
pub const TOUCH_QUEUE_DEPTH: usize = 1;

pub const DISPLAY_PINS: PinMap = PinMap {
    sclk: 18,
    mosi: 19,
    miso: Some(4),
    cs: 17,
    dc: Some(16),
    reset: Some(21),
    backlight: Some(20),
};

pub const TOUCH_PINS: PinMap = PinMap {
    sclk: 10,
    mosi: 11,
    miso: Some(12),
    cs: 13,
    dc: None,
    reset: None,
    backlight: None,
};

pub type DisplayTransport = SpiTransport<Spi<'static, SPI0, Async>, Output<'static>, Output<'static>>;
pub type DisplayBusCtx = DisplayBus<CriticalSectionRawMutex, DisplayTransport, POOL_CAPACITY, QUEUE_DEPTH>;

pub type TouchTransport = SpiTransport<Spi<'static, SPI1, Async>, Output<'static>>;
pub type TouchBusCtx = DisplayBus<CriticalSectionRawMutex, TouchTransport, TOUCH_POOL_CAPACITY, TOUCH_QUEUE_DEPTH>;

pub const fn display_bus_config() -> BusConfig { BusConfig::new(DISPLAY_CLOCK_HZ, DISPLAY_PINS) }

pub const fn touch_bus_config() -> BusConfig { BusConfig::new(TOUCH_CLOCK_HZ, TOUCH_PINS) }

/// SPI peripheral configuration matching a bus configuration.
pub fn spi_config(bus: &BusConfig) -> SpiConfig {
    let mut config = SpiConfig::default();
    config.frequency = bus.clock_hz;
    config.polarity = if bus.mode.idle_high() { Polarity::IdleHigh } else { Polarity::IdleLow };
    config.phase = if bus.mode.capture_on_second_edge() {
        Phase::CaptureOnSecondTransition
    } else {
        Phase::CaptureOnFirstTransition
    };
    config
}

