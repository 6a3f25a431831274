//! [`Transport`] over `embedded-hal` SPI and GPIO.
//!
//! Chip select is driven in software so a transaction can keep it asserted
//! across the next one (command + read sequences). The bus must implement
//! both the blocking and the async `SpiBus` traits: polling submissions use
//! the former, everything else the latter.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin, PinState};
use embedded_hal::spi::SpiBus as BlockingSpiBus;
use embedded_hal_async::spi::SpiBus as AsyncSpiBus;
use heapless::Vec;

use crate::bus::Transport;
use crate::error::Fault;
use crate::transfer::Transfer;

/// Largest address phase (4 bytes) plus the longest dummy phase (255 bits).
const PREAMBLE_CAPACITY: usize = 4 + 32;

/// Stand-in D/C pin for devices without one (e.g. touch controllers).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Infallible> { Ok(()) }

    fn set_high(&mut self) -> Result<(), Infallible> { Ok(()) }
}

/// SPI bus with software chip select and a data/command line.
pub struct SpiTransport<SPI, CS, DC = NoPin> {
    spi: SPI,
    cs: CS,
    dc: DC,
    cs_held: bool,
}

impl<SPI, CS, DC> SpiTransport<SPI, CS, DC>
where
    SPI: BlockingSpiBus<u8> + AsyncSpiBus<u8>,
    CS: OutputPin,
    DC: OutputPin,
{
    pub fn new(
        spi: SPI,
        cs: CS,
        dc: DC,
    ) -> Self {
        Self {
            spi,
            cs,
            dc,
            cs_held: false,
        }
    }

    /// Give the peripherals back.
    pub fn release(self) -> (SPI, CS, DC) { (self.spi, self.cs, self.dc) }

    /// Whether chip select is still asserted from a `keep_cs_active` transfer.
    #[inline]
    pub const fn is_cs_held(&self) -> bool { self.cs_held }

    fn begin(
        &mut self,
        transfer: &Transfer<'_>,
    ) -> Result<(), Fault> {
        self.dc
            .set_state(PinState::from(transfer.dc().is_high()))
            .map_err(|_| Fault::DataCommand)?;
        self.cs.set_low().map_err(|_| Fault::ChipSelect)?;
        self.cs_held = true;
        Ok(())
    }

    fn end(
        &mut self,
        keep_cs_active: bool,
        result: Result<(), Fault>,
    ) -> Result<(), Fault> {
        if keep_cs_active && result.is_ok() {
            return Ok(());
        }
        let released = self.deassert();
        result.and(released)
    }

    fn deassert(&mut self) -> Result<(), Fault> {
        self.cs.set_high().map_err(|_| Fault::ChipSelect)?;
        self.cs_held = false;
        Ok(())
    }
}

impl<SPI, CS> SpiTransport<SPI, CS, NoPin>
where
    SPI: BlockingSpiBus<u8> + AsyncSpiBus<u8>,
    CS: OutputPin,
{
    /// Transport for a device without a D/C line.
    pub fn without_dc(
        spi: SPI,
        cs: CS,
    ) -> Self {
        Self::new(spi, cs, NoPin)
    }
}

/// Address bytes followed by zeroed dummy bytes.
fn preamble(transfer: &Transfer<'_>) -> Vec<u8, PREAMBLE_CAPACITY> {
    let mut out: Vec<u8, PREAMBLE_CAPACITY> = Vec::new();
    if let Some(address) = transfer.address() {
        let _ = out.extend_from_slice(&address.to_bytes());
    }
    // Submission only admits whole-byte dummy phases (`supports_dummy_bits`).
    let dummy_bytes = usize::from(transfer.dummy_bits() / 8);
    for _ in 0..dummy_bytes {
        let _ = out.push(0);
    }
    out
}

impl<SPI, CS, DC> SpiTransport<SPI, CS, DC>
where
    SPI: BlockingSpiBus<u8> + AsyncSpiBus<u8>,
    CS: OutputPin,
    DC: OutputPin,
{
    fn clock_blocking(
        &mut self,
        preamble: &[u8],
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        if !preamble.is_empty() {
            BlockingSpiBus::write(&mut self.spi, preamble).map_err(spi_fault)?;
        }
        match transfer.buffers() {
            (tx, None) if !tx.is_empty() => BlockingSpiBus::write(&mut self.spi, tx).map_err(spi_fault)?,
            (tx, Some(rx)) if tx.is_empty() => BlockingSpiBus::read(&mut self.spi, rx).map_err(spi_fault)?,
            (tx, Some(rx)) => BlockingSpiBus::transfer(&mut self.spi, rx, tx).map_err(spi_fault)?,
            (_, None) => {}
        }
        BlockingSpiBus::flush(&mut self.spi).map_err(spi_fault)
    }

    async fn clock_async(
        &mut self,
        preamble: &[u8],
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        if !preamble.is_empty() {
            AsyncSpiBus::write(&mut self.spi, preamble).await.map_err(spi_fault)?;
        }
        match transfer.buffers() {
            (tx, None) if !tx.is_empty() => AsyncSpiBus::write(&mut self.spi, tx).await.map_err(spi_fault)?,
            (tx, Some(rx)) if tx.is_empty() => AsyncSpiBus::read(&mut self.spi, rx).await.map_err(spi_fault)?,
            (tx, Some(rx)) => AsyncSpiBus::transfer(&mut self.spi, rx, tx).await.map_err(spi_fault)?,
            (_, None) => {}
        }
        AsyncSpiBus::flush(&mut self.spi).await.map_err(spi_fault)
    }
}

fn spi_fault<E>(_: E) -> Fault { Fault::Spi }

impl<SPI, CS, DC> Transport for SpiTransport<SPI, CS, DC>
where
    SPI: BlockingSpiBus<u8> + AsyncSpiBus<u8>,
    CS: OutputPin,
    DC: OutputPin,
{
    fn transfer_blocking(
        &mut self,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        self.begin(transfer)?;
        let pre = preamble(transfer);
        let result = self.clock_blocking(&pre, transfer);
        self.end(transfer.keeps_cs_active(), result)
    }

    async fn transfer(
        &mut self,
        transfer: &mut Transfer<'_>,
    ) -> Result<(), Fault> {
        self.begin(transfer)?;
        let pre = preamble(transfer);
        let result = self.clock_async(&pre, transfer).await;
        self.end(transfer.keeps_cs_active(), result)
    }

    fn release_hold(&mut self) -> Result<(), Fault> {
        if self.cs_held { self.deassert() } else { Ok(()) }
    }
}

// =============================================================================
// Tests
// =============================================================================
