use log::warn;

use super::driver::MeterDriver;
use super::registers::{RegisterDescriptor, RegisterTable, ValueKind};
use super::Atm90e32;

/// Failure modes of a register operation. All of these are recoverable;
/// callers guard on the `Result` and carry on.
#[derive(Debug, PartialEq, Eq)]
pub enum AccessError<E> {
    /// no register with the requested name
    NotFound,
    /// the register's access kind forbids the requested operation
    AccessDenied,
    /// the bus transaction itself failed
    Bus(E),
}

impl<E> From<E> for AccessError<E> {
    fn from(err: E) -> Self {
        AccessError::Bus(err)
    }
}

/// Resolves register names to descriptors, shapes the raw bus access and
/// applies engineering-unit scaling.
pub struct RegisterAccess<D: MeterDriver> {
    chip: Atm90e32<D>,
    table: RegisterTable,
}

impl<D: MeterDriver> RegisterAccess<D> {
    pub fn new(driver: D) -> Self {
        Self {
            chip: Atm90e32::new(driver),
            table: RegisterTable::new(),
        }
    }

    /// Direct access to the underlying bus driver.
    pub fn driver_mut(&mut self) -> &mut D {
        self.chip.driver_mut()
    }

    /// Pure descriptor lookup, no bus traffic.
    pub fn register_info(&self, name: &str) -> Option<&'static RegisterDescriptor> {
        self.table.lookup(name)
    }

    /// The full register catalog in table order.
    pub fn registers(&self) -> &'static [RegisterDescriptor] {
        self.table.catalog()
    }

    /// Reads a register and converts the raw bits to an engineering-unit
    /// value. A custom decode function on the descriptor takes priority over
    /// linear scaling; signed kinds are sign-extended before scaling.
    pub fn read_register(&mut self, name: &str) -> Result<f32, AccessError<D::Error>> {
        let reg = self.table.lookup(name).ok_or(AccessError::NotFound)?;
        if !reg.access.readable() {
            return Err(AccessError::AccessDenied);
        }
        let raw = self.read_value(reg)?;
        Ok(convert_register_value(reg, raw))
    }

    /// Converts an engineering-unit value back to raw bits (divide by scale,
    /// truncate) and writes it with the access shape the descriptor demands.
    pub fn write_register(&mut self, name: &str, value: f32) -> Result<(), AccessError<D::Error>> {
        let reg = self.table.lookup(name).ok_or(AccessError::NotFound)?;
        if !reg.access.writable() {
            return Err(AccessError::AccessDenied);
        }
        let raw = (value / reg.scale) as u32;
        self.write_value(reg, raw)
    }

    /// Raw read, no scaling. This is the only correct way to consume a
    /// read-and-clear register: the value is captured in one transaction
    /// before any derived computation.
    pub fn read_register_raw(&mut self, name: &str) -> Result<u32, AccessError<D::Error>> {
        let reg = self.table.lookup(name).ok_or(AccessError::NotFound)?;
        if !reg.access.readable() {
            return Err(AccessError::AccessDenied);
        }
        Ok(self.read_value(reg)?)
    }

    /// Raw write, no scaling. Required for bit-exact calibration constants.
    pub fn write_register_raw(&mut self, name: &str, raw: u32) -> Result<(), AccessError<D::Error>> {
        let reg = self.table.lookup(name).ok_or(AccessError::NotFound)?;
        if !reg.access.writable() {
            return Err(AccessError::AccessDenied);
        }
        self.write_value(reg, raw)
    }

    fn read_value(&mut self, reg: &RegisterDescriptor) -> Result<u32, D::Error> {
        let addr = reg.address[0];
        match reg.kind {
            ValueKind::Bit => Ok(self.chip.read_bit(addr, reg.bit_pos)? as u32),
            ValueKind::BitField => {
                Ok(self.chip.read_bitfield(addr, reg.bit_pos, reg.bit_len)? as u32)
            }
            ValueKind::Uint8 | ValueKind::Int8 => {
                Ok(self.chip.read_bitfield(addr, reg.bit_pos, 8)? as u32)
            }
            ValueKind::Uint16 | ValueKind::Int16 => Ok(self.chip.read16(addr)? as u32),
            ValueKind::Uint32 | ValueKind::Int32 => {
                self.chip.read32(reg.address[0], reg.address[1])
            }
        }
    }

    fn write_value(&mut self, reg: &RegisterDescriptor, value: u32) -> Result<(), AccessError<D::Error>> {
        let addr = reg.address[0];
        match reg.kind {
            ValueKind::Bit => self.chip.write_bit(addr, reg.bit_pos, value != 0)?,
            ValueKind::BitField => {
                self.chip
                    .write_bitfield(addr, reg.bit_pos, reg.bit_len, value as u16)?
            }
            ValueKind::Uint8 | ValueKind::Int8 => {
                self.chip.write_bitfield(addr, reg.bit_pos, 8, value as u16)?
            }
            ValueKind::Uint16 | ValueKind::Int16 => self.chip.write16(addr, value as u16)?,
            ValueKind::Uint32 | ValueKind::Int32 => {
                self.chip.write32(reg.address[0], reg.address[1], value)?
            }
        }
        Ok(())
    }
}

/// Raw bits to engineering units for one descriptor.
pub(crate) fn convert_register_value(reg: &RegisterDescriptor, raw: u32) -> f32 {
    if let Some(convert) = reg.convert {
        if reg.reg_count == 1 {
            return convert(raw as u16);
        }
        warn!("register {} has a decode function but spans two cells", reg.name);
    }

    match reg.kind {
        ValueKind::Int8 => (raw as u8 as i8) as f32 * reg.scale,
        ValueKind::Int16 => (raw as u16 as i16) as f32 * reg.scale,
        ValueKind::Int32 => (raw as i32) as f32 * reg.scale,
        _ => raw as f32 * reg.scale,
    }
}

#[cfg(test)]
mod tests {
    use super::super::registers::REGISTERS;
    use super::*;

    fn descriptor(name: &str) -> &'static RegisterDescriptor {
        REGISTERS.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn unsigned_scaling() {
        let urms = descriptor("UrmsA");
        let value = convert_register_value(urms, 23012);
        assert!((value - 230.12).abs() < 1e-3);
    }

    #[test]
    fn signed_values_are_sign_extended() {
        let pf = descriptor("PFmeanA");
        // -500 as two's-complement u16
        let value = convert_register_value(pf, (-500i16 as u16) as u32);
        assert!((value + 0.5).abs() < 1e-6);

        let power = descriptor("PmeanA");
        let value = convert_register_value(power, (-100_000i32) as u32);
        assert!((value + 32.0).abs() < 1e-3);
    }

    #[test]
    fn custom_decode_takes_priority_over_scale() {
        let peak = descriptor("UPeakA");
        // sign-magnitude, not two's complement: scale alone would get this wrong
        let value = convert_register_value(peak, (0x8000 | 5000) as u32);
        assert!((value + 50.0).abs() < 1e-3);
    }
}
