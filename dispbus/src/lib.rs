//! Pooled SPI transfer layer for streaming pixels to display controllers.
//!
//! The renderer hands dirty regions to a [`FlushPipeline`], which sets the
//! controller's address window with polling transfers and then queues the
//! pixels in bus-sized chunks. Queued transfers run on a bus engine task and
//! are reaped back into a fixed descriptor pool, so no memory is allocated
//! per transfer and a full pool simply slows the producer down.
//!
//! # Testing
//!
//! The crate is `no_std` on target and builds with `std` under test:
//! ```bash
//! cargo test -p dispbus
//! ```
//!
//! Enable the `defmt` feature to route driver logging through `defmt`.

// Use no_std only when NOT testing (tests need std for the test harness)
#![cfg_attr(not(test), no_std)]
// Crate-level lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

// Must come first so the logging macros are visible to every module
mod fmt;

pub mod buffer;
pub mod bus;
pub mod config;
pub mod error;
pub mod flush;
pub mod init_seq;
mod notify;
pub mod panel;
pub mod pool;
pub mod queue;
pub mod reaper;
pub mod spi;
pub mod touch;
pub mod transfer;

pub use buffer::{DmaBuffer, Lease, WriteGuard};
pub use bus::{BusLock, BusStats, DisplayBus, StatsSnapshot, Transport};
pub use config::{BusConfig, PinMap, SpiMode};
pub use error::{Error, Fault, InitError, Rejection, RequestError};
pub use flush::{Area, DirtyRegion, FlushPipeline, FlushState, FlushTicket, Renderer};
pub use init_seq::{InitCommand, run_init_sequence};
pub use panel::{PanelKind, PanelPins, bring_up, read_panel_id};
pub use pool::{Descriptor, DescriptorPool};
pub use queue::HwQueue;
pub use reaper::Completion;
pub use spi::{NoPin, SpiTransport};
pub use touch::{AveragingFilter, Calibration, TouchConfig, TouchFilter, TouchPolarity, TouchSample, TouchState, Xpt2046};
pub use transfer::{Address, DcLevel, Direction, Discipline, LineMode, Submission, Transfer, TxData};
