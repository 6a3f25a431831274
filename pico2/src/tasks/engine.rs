//! Display bus engine task.
//!
//! Executes queued transfers one at a time over SPI DMA and posts their
//! completions, so the render loop can keep drawing the next band while the
//! previous one streams.

use defmt::info;

use crate::display::DisplayBusCtx;

#[embassy_executor::task]
pub async fn display_engine_task(bus: &'static DisplayBusCtx) {
    info!("Display engine task started");
    bus.run_engine().await
}
