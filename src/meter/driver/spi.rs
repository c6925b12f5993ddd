use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use super::MeterDriver;

// read accesses set the MSB of the address word
const READ_FLAG: u16 = 0x8000;

#[derive(Debug)]
pub enum SpiDriverError {
    Spi,
    ChipSelect,
}

/// SPI transport for the metering IC.
///
/// The bus must be configured for mode-3 clocking, MSB first. Clock rate is
/// whatever the surrounding board supports; the chip tolerates anything up
/// to a few hundred kHz.
pub struct SpiMeterDriver<SPI: SpiBus, CS: OutputPin> {
    pub spi: SPI,
    pub pin_cs: CS,
}

impl<SPI: SpiBus, CS: OutputPin> MeterDriver for SpiMeterDriver<SPI, CS> {
    type Error = SpiDriverError;

    fn transfer(&mut self, addr: u16, write: Option<u16>) -> Result<u16, SpiDriverError> {
        let addr = match write {
            Some(_) => addr & !READ_FLAG,
            None => addr | READ_FLAG,
        };

        let mut buf_tx = [0u8; 4];
        buf_tx[..2].copy_from_slice(&addr.to_be_bytes());
        if let Some(value) = write {
            buf_tx[2..].copy_from_slice(&value.to_be_bytes());
        }

        if self.pin_cs.set_low().is_err() {
            return Err(SpiDriverError::ChipSelect);
        }
        let mut buf_rx = [0u8; 4];
        let result = self.spi.transfer(&mut buf_rx, &buf_tx);
        let _ = self.pin_cs.set_high();

        if result.is_err() {
            return Err(SpiDriverError::Spi);
        }
        Ok(u16::from_be_bytes([buf_rx[2], buf_rx[3]]))
    }
}
