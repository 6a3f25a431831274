//! Async tasks for the display bus firmware.
//!
//! This module contains Embassy async tasks that run concurrently with the
//! render loop:
//! - `engine`: Bus engine executing queued display transfers (DMA)
//! - `touch`: XPT2046 polling task publishing touch samples

pub mod engine;
pub mod touch;

pub use engine::display_engine_task;
pub use touch::{TOUCH_READS, TOUCH_READ_ERRORS, TOUCH_SAMPLES, touch_task};
