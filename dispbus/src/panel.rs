//! Panel detection and bring-up.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal_async::delay::DelayNs;

use crate::bus::{DisplayBus, Transport};
use crate::error::{Error, Fault};
use crate::init_seq::{InitCommand, run_init_sequence};
use crate::transfer::Transfer;

/// Read display identification (24-bit response).
pub const RDDID: u8 = 0x04;

/// Reset pulse width and recovery time.
pub const RESET_DELAY_MS: u32 = 100;

/// Controllers this driver can bring up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelKind {
    Ili9341,
    St7789,
}

impl PanelKind {
    /// ILI9341 modules answer RDDID with zeros; anything else is taken as ST7789.
    pub const fn detect(id: u32) -> Self {
        if id == 0 { Self::Ili9341 } else { Self::St7789 }
    }

    pub fn init_table(self) -> &'static [InitCommand] {
        match self {
            Self::Ili9341 => &ILI9341_INIT,
            Self::St7789 => &ST7789_INIT,
        }
    }
}

// =============================================================================
// Init Tables
// =============================================================================

/// ILI9341: landscape, RGB565.
pub static ILI9341_INIT: [InitCommand; 25] = [
    // Power control B
    InitCommand::new(0xCF, &[0x00, 0x83, 0x30]),
    // Power on sequence control
    InitCommand::new(0xED, &[0x64, 0x03, 0x12, 0x81]),
    // Driver timing control A
    InitCommand::new(0xE8, &[0x85, 0x01, 0x79]),
    // Power control A
    InitCommand::new(0xCB, &[0x39, 0x2C, 0x00, 0x34, 0x02]),
    // Pump ratio control
    InitCommand::new(0xF7, &[0x20]),
    // Driver timing control B
    InitCommand::new(0xEA, &[0x00, 0x00]),
    // Power control 1, 2
    InitCommand::new(0xC0, &[0x26]),
    InitCommand::new(0xC1, &[0x11]),
    // VCOM control 1, 2
    InitCommand::new(0xC5, &[0x35, 0x3E]),
    InitCommand::new(0xC7, &[0xBE]),
    // MADCTL: MV=1, BGR=1
    InitCommand::new(0x36, &[0x28]),
    // COLMOD: 16 bits/pixel
    InitCommand::new(0x3A, &[0x55]),
    // Frame rate control
    InitCommand::new(0xB1, &[0x00, 0x1B]),
    // 3G off
    InitCommand::new(0xF2, &[0x08]),
    // Gamma curve 1
    InitCommand::new(0x26, &[0x01]),
    // Positive / negative gamma correction
    InitCommand::new(
        0xE0,
        &[0x1F, 0x1A, 0x18, 0x0A, 0x0F, 0x06, 0x45, 0x87, 0x32, 0x0A, 0x07, 0x02, 0x07, 0x05, 0x00],
    ),
    InitCommand::new(
        0xE1,
        &[0x00, 0x25, 0x27, 0x05, 0x10, 0x09, 0x3A, 0x78, 0x4D, 0x05, 0x18, 0x0D, 0x38, 0x3A, 0x1F],
    ),
    // Column / page address window
    InitCommand::new(0x2A, &[0x00, 0x00, 0x00, 0xEF]),
    InitCommand::new(0x2B, &[0x00, 0x00, 0x01, 0x3F]),
    // Memory write
    InitCommand::new(0x2C, &[]),
    // Entry mode set
    InitCommand::new(0xB7, &[0x07]),
    // Display function control
    InitCommand::new(0xB6, &[0x0A, 0x82, 0x27, 0x00]),
    // Sleep out, display on
    InitCommand::new(0x11, &[]).delayed(),
    InitCommand::new(0x29, &[]).delayed(),
    InitCommand::end(),
];

/// ST7789V 240x280: portrait, RGB565, inverted.
pub static ST7789_INIT: [InitCommand; 16] = [
    // Software reset
    InitCommand::new(0x01, &[]).delayed(),
    // Sleep out
    InitCommand::new(0x11, &[]).delayed(),
    // MADCTL: portrait, RGB order
    InitCommand::new(0x36, &[0x00]),
    // COLMOD: 16 bits/pixel
    InitCommand::new(0x3A, &[0x55]),
    // Porch control
    InitCommand::new(0xB2, &[0x0C, 0x0C, 0x00, 0x33, 0x33]),
    // Gate control
    InitCommand::new(0xB7, &[0x35]),
    // VCOM, LCM, VDV/VRH
    InitCommand::new(0xBB, &[0x19]),
    InitCommand::new(0xC0, &[0x2C]),
    InitCommand::new(0xC2, &[0x01]),
    InitCommand::new(0xC3, &[0x12]),
    InitCommand::new(0xC4, &[0x20]),
    // Frame rate 60 Hz
    InitCommand::new(0xC6, &[0x0F]),
    // Inversion on, normal mode
    InitCommand::new(0x21, &[]),
    InitCommand::new(0x13, &[]),
    // Display on
    InitCommand::new(0x29, &[]).delayed(),
    InitCommand::end(),
];

// =============================================================================
// Detection
// =============================================================================

/// Query the controller ID: RDDID with chip select held, then a 24-bit read.
pub async fn read_panel_id<M, T, const C: usize, const Q: usize>(
    bus: &DisplayBus<M, T, C, Q>,
) -> Result<u32, Error>
where
    M: RawMutex,
    T: Transport,
{
    let mut lock = bus.lock_bus().await;
    lock.transfer(Transfer::command_byte(RDDID).keep_cs_active())?;

    let mut id = [0u8; 3];
    lock.transfer(Transfer::read(&mut id).data())?;
    Ok(u32::from_le_bytes([id[0], id[1], id[2], 0]))
}

// =============================================================================
// Control Pins
// =============================================================================

/// Reset and backlight lines of the panel.
pub struct PanelPins<RST, BL> {
    reset: RST,
    backlight: BL,
    backlight_on: PinState,
}

impl<RST, BL> PanelPins<RST, BL>
where
    RST: OutputPin,
    BL: OutputPin,
{
    /// `backlight_on` is the level that lights the panel (low on many modules).
    pub fn new(
        reset: RST,
        backlight: BL,
        backlight_on: PinState,
    ) -> Self {
        Self {
            reset,
            backlight,
            backlight_on,
        }
    }

    /// Pulse reset low for 100 ms and wait 100 ms for the controller to recover.
    pub async fn hard_reset(
        &mut self,
        delay: &mut impl DelayNs,
    ) -> Result<(), Fault> {
        self.reset.set_low().map_err(|_| Fault::ControlPin)?;
        delay.delay_ms(RESET_DELAY_MS).await;
        self.reset.set_high().map_err(|_| Fault::ControlPin)?;
        delay.delay_ms(RESET_DELAY_MS).await;
        Ok(())
    }

    pub fn set_backlight(
        &mut self,
        on: bool,
    ) -> Result<(), Fault> {
        let level = if on { self.backlight_on } else { !self.backlight_on };
        self.backlight.set_state(level).map_err(|_| Fault::ControlPin)
    }
}

/// Reset the panel, identify it, play its init table and light the backlight.
pub async fn bring_up<M, T, RST, BL, const C: usize, const Q: usize>(
    bus: &DisplayBus<M, T, C, Q>,
    pins: &mut PanelPins<RST, BL>,
    delay: &mut impl DelayNs,
) -> Result<PanelKind, Error>
where
    M: RawMutex,
    T: Transport,
    RST: OutputPin,
    BL: OutputPin,
{
    pins.set_backlight(false)?;
    pins.hard_reset(delay).await?;

    let id = read_panel_id(bus).await?;
    let kind = PanelKind::detect(id);
    info!("panel id {=u32:#x}: {}", id, kind);

    run_init_sequence(bus, kind.init_table(), delay).await?;
    pins.set_backlight(true)?;
    Ok(kind)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(PanelKind::detect(0), PanelKind::Ili9341);
        assert_eq!(PanelKind::detect(0x0052_8585), PanelKind::St7789);
    }

    #[test]
    fn test_tables_terminated() {
        for kind in [PanelKind::Ili9341, PanelKind::St7789] {
            let table = kind.init_table();
            assert!(table.last().is_some_and(InitCommand::is_end));
            assert_eq!(table.iter().filter(|e| e.is_end()).count(), 1);
        }
    }

    #[test]
    fn test_ili9341_gamma_lengths() {
        let gamma: std::vec::Vec<_> = ILI9341_INIT
            .iter()
            .filter(|e| e.cmd == 0xE0 || e.cmd == 0xE1)
            .collect();
        assert_eq!(gamma.len(), 2);
        assert!(gamma.iter().all(|e| e.param_len() == 15));
    }
}
