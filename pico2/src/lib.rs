//! Host-testable parts of the display bus firmware.
//!
//! The binary (`main.rs`) wires the `dispbus` driver to the RP2350
//! peripherals; this library holds the band renderer it feeds the flush
//! pipeline with.
//!
//! # Testing
//!
//! Run tests on host with:
//! ```bash
//! cargo test -p dispbus-pico2 --lib --target x86_64-unknown-linux-gnu  # Linux/macOS
//! cargo test -p dispbus-pico2 --lib --target x86_64-pc-windows-msvc    # Windows
//! ```

// Use no_std only when NOT testing (tests need std for the test harness)
#![cfg_attr(not(test), no_std)]
// Crate-level lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod render;
