pub mod spi;

/// One half-duplex register-bus transaction.
///
/// The metering IC speaks a synchronous serial protocol: a 16-bit address
/// word (read/write flag in the MSB) followed by a 16-bit data word. A read
/// clocks the data word out of the chip, a write clocks it in.
pub trait MeterDriver {
    type Error;

    /// Performs a single transaction against `addr`. `write` carries the
    /// data word for a write access; `None` makes this a read and the
    /// returned word is the register content.
    fn transfer(&mut self, addr: u16, write: Option<u16>) -> Result<u16, Self::Error>;
}
