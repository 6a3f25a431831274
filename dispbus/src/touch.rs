//! XPT2046 resistive touch controller.
//!
//! Each channel read is one synchronous transfer: the control byte goes out
//! as an 8-bit address phase, then two bytes come back holding a 12-bit
//! conversion left-aligned in bits 14..3.

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Deque;

use crate::bus::{DisplayBus, Transport};
use crate::error::Error;
use crate::transfer::{Address, Submission, Transfer};

// =============================================================================
// Controller Constants
// =============================================================================

/// Start bit, X position, 12-bit differential.
pub const CMD_X_READ: u8 = 0b1001_0000;
/// Start bit, Y position.
pub const CMD_Y_READ: u8 = 0b1101_0000;
/// Start bit, Z1 pressure.
pub const CMD_Z1_READ: u8 = 0b1011_0000;
/// Start bit, Z2 pressure.
pub const CMD_Z2_READ: u8 = 0b1100_0000;

/// Minimum pressure figure counted as a touch.
pub const TOUCH_THRESHOLD: i32 = 400;

/// Samples in the default moving average.
pub const AVG_SAMPLES: usize = 4;

/// Raw conversion range.
pub const RAW_MIN: i16 = 0;
pub const RAW_MAX: i16 = 4095;

// =============================================================================
// Samples
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchState {
    Pressed,
    Released,
}

/// How a detected touch maps to a reported state.
///
/// Controller boards disagree on this; `DetectedIsPressed` reports a touch as
/// pressed, `DetectedIsReleased` inverts it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchPolarity {
    #[default]
    DetectedIsPressed,
    DetectedIsReleased,
}

impl TouchPolarity {
    pub const fn state(
        self,
        detected: bool,
    ) -> TouchState {
        match (self, detected) {
            (Self::DetectedIsPressed, true) | (Self::DetectedIsReleased, false) => TouchState::Pressed,
            _ => TouchState::Released,
        }
    }
}

/// One pointer reading in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchSample {
    pub x: i16,
    pub y: i16,
    pub state: TouchState,
}

// =============================================================================
// Calibration
// =============================================================================

/// Raw-to-screen mapping: optional axis swap, offset, scale, optional inversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub x_min: i16,
    pub x_max: i16,
    pub y_min: i16,
    pub y_max: i16,
    pub width: u16,
    pub height: u16,
    pub swap_xy: bool,
    pub invert_x: bool,
    pub invert_y: bool,
}

impl Calibration {
    /// Full raw range mapped onto a `width` x `height` screen.
    pub const fn new(
        width: u16,
        height: u16,
    ) -> Self {
        Self {
            x_min: RAW_MIN,
            x_max: RAW_MAX,
            y_min: RAW_MIN,
            y_max: RAW_MAX,
            width,
            height,
            swap_xy: false,
            invert_x: false,
            invert_y: false,
        }
    }

    pub fn apply(
        &self,
        x: i16,
        y: i16,
    ) -> (i16, i16) {
        let (x, y) = if self.swap_xy { (y, x) } else { (x, y) };
        let x = scale_axis(x, self.x_min, self.x_max, self.width, self.invert_x);
        let y = scale_axis(y, self.y_min, self.y_max, self.height, self.invert_y);
        (x, y)
    }
}

fn scale_axis(
    raw: i16,
    min: i16,
    max: i16,
    resolution: u16,
    invert: bool,
) -> i16 {
    let offset = if raw > min { u32::from((raw - min) as u16) } else { 0 };
    let span = (i32::from(max) - i32::from(min)).max(1) as u32;
    let scaled = (offset * u32::from(resolution) / span) as i32;
    let value = if invert { i32::from(resolution) - scaled } else { scaled };
    value as i16
}

// =============================================================================
// Filtering
// =============================================================================

/// Smoothing applied to calibrated coordinates.
pub trait TouchFilter {
    fn push(
        &mut self,
        x: i16,
        y: i16,
    ) -> (i16, i16);

    /// Forget history (called on release).
    fn reset(&mut self);
}

/// Moving average over the last `N` samples.
#[derive(Debug, Default)]
pub struct AveragingFilter<const N: usize> {
    samples: Deque<(i16, i16), N>,
}

impl<const N: usize> AveragingFilter<N> {
    pub const fn new() -> Self { Self { samples: Deque::new() } }

    #[inline]
    pub fn len(&self) -> usize { self.samples.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.samples.is_empty() }
}

impl<const N: usize> TouchFilter for AveragingFilter<N> {
    fn push(
        &mut self,
        x: i16,
        y: i16,
    ) -> (i16, i16) {
        if self.samples.is_full() {
            self.samples.pop_back();
        }
        // Room was made above.
        let _ = self.samples.push_front((x, y));

        let count = self.samples.len().max(1) as i32;
        let (sx, sy) = self
            .samples
            .iter()
            .fold((0i32, 0i32), |(sx, sy), &(x, y)| (sx + i32::from(x), sy + i32::from(y)));
        ((sx / count) as i16, (sy / count) as i16)
    }

    fn reset(&mut self) { self.samples.clear(); }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TouchConfig {
    pub calibration: Calibration,
    pub polarity: TouchPolarity,
    /// Pressure check in addition to the IRQ line; `None` trusts IRQ alone.
    pub pressure_threshold: Option<i32>,
}

impl TouchConfig {
    pub const fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            polarity: TouchPolarity::DetectedIsPressed,
            pressure_threshold: Some(TOUCH_THRESHOLD),
        }
    }

    pub const fn with_polarity(
        mut self,
        polarity: TouchPolarity,
    ) -> Self {
        self.polarity = polarity;
        self
    }

    pub const fn with_pressure_threshold(
        mut self,
        threshold: Option<i32>,
    ) -> Self {
        self.pressure_threshold = threshold;
        self
    }
}

/// XPT2046 on its own bus context.
pub struct Xpt2046<'b, M: RawMutex, T, F, const C: usize, const Q: usize> {
    bus: &'b DisplayBus<M, T, C, Q>,
    config: TouchConfig,
    filter: F,
    last: (i16, i16),
}

impl<'b, M, T, F, const C: usize, const Q: usize> Xpt2046<'b, M, T, F, C, Q>
where
    M: RawMutex,
    T: Transport,
    F: TouchFilter,
{
    pub fn new(
        bus: &'b DisplayBus<M, T, C, Q>,
        config: TouchConfig,
        filter: F,
    ) -> Self {
        Self {
            bus,
            config,
            filter,
            last: (0, 0),
        }
    }

    #[inline]
    pub const fn config(&self) -> &TouchConfig { &self.config }

    /// One raw 16-bit channel conversion.
    pub async fn read_channel(
        &self,
        cmd: u8,
    ) -> Result<u16, Error> {
        let mut rx = [0u8; 2];
        let transfer = Transfer::read(&mut rx).with_address(Address::Bits8(cmd));
        self.bus.submit(Submission::Synchronous(transfer)).await?;
        Ok(u16::from_be_bytes(rx))
    }

    /// IRQ (active low, passed in as `irq_asserted`) and optional pressure check.
    pub async fn is_touch_detected(
        &self,
        irq_asserted: bool,
    ) -> Result<bool, Error> {
        if !irq_asserted {
            return Ok(false);
        }
        if let Some(threshold) = self.config.pressure_threshold {
            let z1 = i32::from(self.read_channel(CMD_Z1_READ).await? >> 3);
            let z2 = i32::from(self.read_channel(CMD_Z2_READ).await? >> 3);
            let z = z1 + 4096 - z2;
            if z < threshold {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sample the controller. Released readings repeat the last position.
    pub async fn read(
        &mut self,
        irq_asserted: bool,
    ) -> Result<TouchSample, Error> {
        let detected = self.is_touch_detected(irq_asserted).await?;
        if detected {
            let raw_x = (self.read_channel(CMD_X_READ).await? >> 4) as i16;
            let raw_y = (self.read_channel(CMD_Y_READ).await? >> 4) as i16;
            let (x, y) = self.config.calibration.apply(raw_x, raw_y);
            self.last = self.filter.push(x, y);
            trace!("touch raw ({=i16}, {=i16}) -> ({=i16}, {=i16})", raw_x, raw_y, self.last.0, self.last.1);
        } else {
            self.filter.reset();
        }

        Ok(TouchSample {
            x: self.last.0,
            y: self.last.1,
            state: self.config.polarity.state(detected),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
