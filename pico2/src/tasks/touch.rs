//! Touch polling task.
//!
//! Samples the XPT2046 at a fixed rate through the touch bus and publishes
//! each changed reading on a `Watch` channel for the render loop.

use core::sync::atomic::{AtomicU32, Ordering};

use defmt::{info, warn};
use dispbus::touch::AVG_SAMPLES;
use dispbus::{AveragingFilter, Calibration, TouchConfig, TouchSample, Xpt2046};
use dispbus::config::{LCD_HEIGHT, LCD_WIDTH};
use embassy_rp::gpio::Input;
use embassy_sync::watch::DynSender;
use embassy_time::{Duration, Ticker};

use crate::display::TouchBusCtx;

/// Touch sampling period (~50 Hz).
const TOUCH_PERIOD: Duration = Duration::from_millis(20);

/// Raw range of the resistive overlay on the 240x280 module.
const TOUCH_CALIBRATION: Calibration = Calibration {
    x_min: 200,
    x_max: 3900,
    y_min: 200,
    y_max: 3900,
    ..Calibration::new(LCD_WIDTH, LCD_HEIGHT)
};

/// Controller samples taken (for profiling).
pub static TOUCH_READS: AtomicU32 = AtomicU32::new(0);

/// Failed controller reads (for profiling).
pub static TOUCH_READ_ERRORS: AtomicU32 = AtomicU32::new(0);

/// Samples published to the render loop (for profiling).
pub static TOUCH_SAMPLES: AtomicU32 = AtomicU32::new(0);

/// Touch polling task.
///
/// `irq` is the controller's PENIRQ line (active low). Only readings that
/// differ from the last published one are sent.
#[embassy_executor::task]
pub async fn touch_task(
    bus: &'static TouchBusCtx,
    irq: Input<'static>,
    sender: DynSender<'static, TouchSample>,
) {
    info!("Touch task started");

    let mut touch = Xpt2046::new(
        bus,
        TouchConfig::new(TOUCH_CALIBRATION),
        AveragingFilter::<AVG_SAMPLES>::new(),
    );
    let mut last: Option<TouchSample> = None;
    let mut ticker = Ticker::every(TOUCH_PERIOD);

    loop {
        ticker.next().await;

        TOUCH_READS.fetch_add(1, Ordering::Relaxed);
        match touch.read(irq.is_low()).await {
            Ok(sample) if last != Some(sample) => {
                sender.send(sample);
                TOUCH_SAMPLES.fetch_add(1, Ordering::Relaxed);
                last = Some(sample);
            }
            Ok(_) => {}
            Err(e) => {
                TOUCH_READ_ERRORS.fetch_add(1, Ordering::Relaxed);
                warn!("Touch read failed: {}", e);
            }
        }
    }
}
