//! Display Bus Demo Firmware for Raspberry Pi Pico 2 (RP2350)
//!
//! Brings up an ST7789 or ILI9341 panel through the pooled `dispbus` driver
//! and draws a greeting plus a touch marker from an XPT2046 controller.
//!
//! # Architecture
//!
//! Renders in horizontal bands with two alternating band buffers:
//! - Main task: Renders the next band while the previous one streams, then
//!   queues it through the flush pipeline
//! - Engine task: Executes queued display transfers via SPI DMA
//! - Touch task: Polls the touch controller on its own bus and publishes
//!   changed samples

#![no_std]
#![no_main]
// Crate-level lints (match lib.rs for consistency)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

// Modules only used in the binary (not testable on host)
mod display;
mod tasks;

// Re-export testable modules from library for local use
mod render {
    pub use dispbus_pico2::render::*;
}

use core::sync::atomic::Ordering;

use defmt::{info, warn};
use dispbus::config::{BAND_BYTES, DRAIN_POLL, POOL_CAPACITY};
use dispbus::{
    Descriptor,
    DisplayBus,
    DmaBuffer,
    FlushPipeline,
    FlushTicket,
    PanelPins,
    Renderer,
    SpiTransport,
    TouchSample,
    TouchState,
    bring_up,
};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::spi::Spi;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::watch::Watch;
use embassy_time::{Delay, Duration, Instant, Timer};
use embedded_graphics::prelude::Point;
use embedded_hal::digital::PinState;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::display::{
    DisplayBusCtx,
    TOUCH_POOL_CAPACITY,
    TouchBusCtx,
    display_bus_config,
    spi_config,
    touch_bus_config,
};
use crate::render::BandRenderer;
use crate::tasks::{TOUCH_READ_ERRORS, TOUCH_READS, TOUCH_SAMPLES, display_engine_task, touch_task};

// =============================================================================
// Shared State
// =============================================================================

/// Band buffers the renderer alternates between.
static BAND_A: DmaBuffer<BAND_BYTES> = DmaBuffer::new();
static BAND_B: DmaBuffer<BAND_BYTES> = DmaBuffer::new();

/// Latest touch sample, written by the touch task and read by the render loop.
/// Initialized at compile time (Watch::new() is const).
static TOUCH_EVENTS: Watch<CriticalSectionRawMutex, TouchSample, 1> = Watch::new();

/// Redraw period when nothing changes (keeps the panel refreshed).
const IDLE_REDRAW: Duration = Duration::from_secs(1);

/// Interval between profiling log lines.
const PROFILE_INTERVAL: Duration = Duration::from_secs(2);

// Program metadata for `picotool info`
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"pico2-dispbus"),
    embassy_rp::binary_info::rp_program_description!(c"Pooled SPI display bus demo (ST7789/ILI9341 + XPT2046)"),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Display bus demo starting...");

    let p = embassy_rp::init(Default::default());

    // Display bus: SPI0 full duplex (MISO for the panel ID read)
    let display_config = display_bus_config();
    let cs = Output::new(p.PIN_17, Level::High);
    let dc = Output::new(p.PIN_16, Level::Low);
    let reset = Output::new(p.PIN_21, Level::High);
    let backlight = Output::new(p.PIN_20, Level::Low);
    let spi = Spi::new(
        p.SPI0,
        p.PIN_18,
        p.PIN_19,
        p.PIN_4,
        p.DMA_CH0,
        p.DMA_CH1,
        spi_config(&display_config),
    );

    // Bus and descriptor storage live for the whole program (tasks need 'static)
    static DISPLAY_BUS: StaticCell<DisplayBusCtx> = StaticCell::new();
    static DISPLAY_DESCRIPTORS: StaticCell<[Descriptor; POOL_CAPACITY]> = StaticCell::new();
    let bus: &'static DisplayBusCtx =
        DISPLAY_BUS.init(DisplayBus::new(display_config, SpiTransport::new(spi, cs, dc)));
    bus.init(DISPLAY_DESCRIPTORS.init([const { Descriptor::new() }; POOL_CAPACITY]))
        .unwrap();

    spawner.spawn(display_engine_task(bus)).unwrap();
    info!("Display engine task spawned");

    let mut panel_pins = PanelPins::new(reset, backlight, PinState::High);
    let panel = match bring_up(bus, &mut panel_pins, &mut Delay).await {
        Ok(kind) => kind,
        Err(e) => defmt::panic!("Panel bring-up failed: {}", e),
    };
    info!("Panel initialized: {}", panel);

    // Touch bus: SPI1, synchronous reads only (no engine task)
    let touch_config = touch_bus_config();
    let touch_cs = Output::new(p.PIN_13, Level::High);
    let touch_irq = Input::new(p.PIN_14, Pull::Up);
    let touch_spi = Spi::new(
        p.SPI1,
        p.PIN_10,
        p.PIN_11,
        p.PIN_12,
        p.DMA_CH2,
        p.DMA_CH3,
        spi_config(&touch_config),
    );

    static TOUCH_BUS: StaticCell<TouchBusCtx> = StaticCell::new();
    static TOUCH_DESCRIPTORS: StaticCell<[Descriptor; TOUCH_POOL_CAPACITY]> = StaticCell::new();
    let touch_bus: &'static TouchBusCtx =
        TOUCH_BUS.init(DisplayBus::new(touch_config, SpiTransport::without_dc(touch_spi, touch_cs)));
    touch_bus
        .init(TOUCH_DESCRIPTORS.init([const { Descriptor::new() }; TOUCH_POOL_CAPACITY]))
        .unwrap();

    // Get sender/receiver from static Watch channel (initialized at compile time)
    let mut touch_rx = TOUCH_EVENTS.dyn_receiver().unwrap();
    spawner.spawn(touch_task(touch_bus, touch_irq, TOUCH_EVENTS.dyn_sender())).unwrap();
    info!("Touch task spawned");

    let mut renderer = BandRenderer::new([&BAND_A, &BAND_B]);
    let mut pipeline = FlushPipeline::new(bus);
    let mut pending: Option<FlushTicket> = None;

    // Profiling
    let mut frames = 0u32;
    let mut flush_errors = 0u32;
    let mut frame_start = Instant::now();
    let mut frame_time_us = 0u32;
    let mut last_profile_log = Instant::now();

    info!("Main loop starting");

    loop {
        // Render the next band while the previous one is still streaming
        let region = renderer.dirty_region();

        if let Some(ticket) = pending.take() {
            pipeline.complete(ticket, &mut renderer).await;
        }

        match region {
            Some(region) => match pipeline.flush(region).await {
                Ok(ticket) => pending = Some(ticket),
                Err(e) => {
                    flush_errors = flush_errors.wrapping_add(1);
                    warn!("Flush failed: {}, redrawing frame", e);
                    renderer.invalidate();
                }
            },
            None if renderer.is_frame_done() => {
                frames = frames.wrapping_add(1);
                frame_time_us = frame_start.elapsed().as_micros() as u32;

                let sample = match select(touch_rx.changed(), Timer::after(IDLE_REDRAW)).await {
                    Either::First(sample) => Some(sample),
                    Either::Second(()) => None,
                };
                match sample {
                    Some(sample) => renderer.set_touch(touch_point(sample)),
                    None => renderer.invalidate(),
                }
                frame_start = Instant::now();
            }
            // Next band buffer still leased by unreaped transfers
            None => {
                bus.drain_one(Some(DRAIN_POLL)).await;
            }
        }

        if last_profile_log.elapsed() >= PROFILE_INTERVAL {
            let stats = bus.stats().snapshot();
            info!(
                "PROFILE: frame={}us frames={} bands={} idle={}/{} flushes={} faults={} waits={} errors={}",
                frame_time_us,
                frames,
                renderer.bands_flushed(),
                bus.idle_count(),
                POOL_CAPACITY,
                stats.flushes,
                stats.faults,
                stats.backpressure_waits,
                flush_errors
            );
            info!(
                "TOUCH: reads={} samples={} errors={}",
                TOUCH_READS.load(Ordering::Relaxed),
                TOUCH_SAMPLES.load(Ordering::Relaxed),
                TOUCH_READ_ERRORS.load(Ordering::Relaxed)
            );
            last_profile_log = Instant::now();
        }
    }
}

/// Marker position for a sample; released touches hide the marker.
fn touch_point(sample: TouchSample) -> Option<Point> {
    match sample.state {
        TouchState::Pressed => Some(Point::new(i32::from(sample.x), i32::from(sample.y))),
        TouchState::Released => None,
    }
}
