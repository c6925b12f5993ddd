use std::collections::HashMap;

/// Register access permission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
    /// read-write, individual bits clear when written with 1
    ReadWriteClear1,
    /// reading the register resets its internal counter
    ReadClear,
}

impl AccessKind {
    pub fn readable(self) -> bool {
        !matches!(self, AccessKind::Write)
    }

    pub fn writable(self) -> bool {
        !matches!(self, AccessKind::Read | AccessKind::ReadClear)
    }
}

/// Shape of the value held in a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Bit,
    BitField,
}

impl ValueKind {
    /// Signed integer kinds are sign-extended before scaling and logged
    /// without decimal places.
    pub fn is_signed_integer(self) -> bool {
        matches!(self, ValueKind::Int8 | ValueKind::Int16 | ValueKind::Int32)
    }
}

/// One entry of the compiled-in register catalog.
///
/// `address[1]` is only meaningful when `reg_count == 2`; 32-bit quantities
/// live in two consecutive cells, high word at `address[0]`.
pub struct RegisterDescriptor {
    pub friendly_name: &'static str,
    pub name: &'static str,
    pub address: [u16; 2],
    pub reg_count: u8,
    pub access: AccessKind,
    pub kind: ValueKind,
    pub bit_pos: u8,
    pub bit_len: u8,
    pub scale: f32,
    pub convert: Option<fn(u16) -> f32>,
    pub unit: &'static str,
}

const fn r16(
    friendly_name: &'static str,
    name: &'static str,
    addr: u16,
    access: AccessKind,
    kind: ValueKind,
    scale: f32,
    unit: &'static str,
) -> RegisterDescriptor {
    RegisterDescriptor {
        friendly_name,
        name,
        address: [addr, 0],
        reg_count: 1,
        access,
        kind,
        bit_pos: 0,
        bit_len: 0,
        scale,
        convert: None,
        unit,
    }
}

const fn r32(
    friendly_name: &'static str,
    name: &'static str,
    addr_high: u16,
    addr_low: u16,
    access: AccessKind,
    kind: ValueKind,
    scale: f32,
    unit: &'static str,
) -> RegisterDescriptor {
    RegisterDescriptor {
        friendly_name,
        name,
        address: [addr_high, addr_low],
        reg_count: 2,
        access,
        kind,
        bit_pos: 0,
        bit_len: 0,
        scale,
        convert: None,
        unit,
    }
}

const fn bit(
    friendly_name: &'static str,
    name: &'static str,
    addr: u16,
    pos: u8,
    access: AccessKind,
) -> RegisterDescriptor {
    RegisterDescriptor {
        friendly_name,
        name,
        address: [addr, 0],
        reg_count: 1,
        access,
        kind: ValueKind::Bit,
        bit_pos: pos,
        bit_len: 1,
        scale: 1.0,
        convert: None,
        unit: "",
    }
}

const fn bitfield(
    friendly_name: &'static str,
    name: &'static str,
    addr: u16,
    pos: u8,
    len: u8,
    access: AccessKind,
) -> RegisterDescriptor {
    RegisterDescriptor {
        friendly_name,
        name,
        address: [addr, 0],
        reg_count: 1,
        access,
        kind: ValueKind::BitField,
        bit_pos: pos,
        bit_len: len,
        scale: 1.0,
        convert: None,
        unit: "",
    }
}

const fn byte(
    friendly_name: &'static str,
    name: &'static str,
    addr: u16,
    pos: u8,
    access: AccessKind,
) -> RegisterDescriptor {
    RegisterDescriptor {
        friendly_name,
        name,
        address: [addr, 0],
        reg_count: 1,
        access,
        kind: ValueKind::Uint8,
        bit_pos: pos,
        bit_len: 8,
        scale: 1.0,
        convert: None,
        unit: "",
    }
}

const fn decoded(
    friendly_name: &'static str,
    name: &'static str,
    addr: u16,
    convert: fn(u16) -> f32,
    unit: &'static str,
) -> RegisterDescriptor {
    RegisterDescriptor {
        friendly_name,
        name,
        address: [addr, 0],
        reg_count: 1,
        access: AccessKind::Read,
        kind: ValueKind::Uint16,
        bit_pos: 0,
        bit_len: 0,
        scale: 1.0,
        convert: Some(convert),
        unit,
    }
}

// peak detect registers hold sign-magnitude values: sign in bit 15,
// magnitude in the same LSB weight as the corresponding RMS register
fn decode_peak_voltage(raw: u16) -> f32 {
    let magnitude = (raw & 0x7fff) as f32 * 0.01;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_peak_current(raw: u16) -> f32 {
    let magnitude = (raw & 0x7fff) as f32 * 0.001;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

use AccessKind::{Read, ReadClear, ReadWrite, ReadWriteClear1, Write};
use ValueKind::{Int16, Int32, Uint16, Uint32};

pub static REGISTERS: &[RegisterDescriptor] = &[
    // --- special configuration ---
    r16("Metering Enable", "MeterEn", 0x00, ReadWrite, Uint16, 1.0, ""),
    byte("Sag Detect Period", "Sag_Period", 0x05, 0, ReadWrite),
    byte("Peak Detect Period", "PeakDet_period", 0x05, 8, ReadWrite),
    r16("Overvoltage Threshold", "OVth", 0x06, ReadWrite, Uint16, 0.01, "V"),
    r16("Zero-Crossing Config", "ZXConfig", 0x07, ReadWrite, Uint16, 1.0, ""),
    r16("Sag Threshold", "SagTh", 0x08, ReadWrite, Uint16, 0.01, "V"),
    r16("Phase Loss Threshold", "PhaseLossTh", 0x09, ReadWrite, Uint16, 0.01, "V"),
    r16("Neutral Warning Threshold", "InWarnTh", 0x0A, ReadWrite, Uint16, 0.001, "A"),
    r16("Overcurrent Threshold", "OIth", 0x0B, ReadWrite, Uint16, 0.001, "A"),
    r16("Frequency Low Threshold", "FreqLoTh", 0x0C, ReadWrite, Uint16, 0.01, "Hz"),
    r16("Frequency High Threshold", "FreqHiTh", 0x0D, ReadWrite, Uint16, 0.01, "Hz"),
    // --- metering configuration ---
    r32("PL Constant", "PL_Constant", 0x31, 0x32, ReadWrite, Uint32, 1.0, ""),
    r16("Metering Mode 0", "MMode0", 0x33, ReadWrite, Uint16, 1.0, ""),
    r16("Metering Mode 1", "MMode1", 0x34, ReadWrite, Uint16, 1.0, ""),
    bit("60 Hz Line Frequency", "Freq60Hz", 0x33, 12, ReadWrite),
    bit("High-Pass Filter Disable", "HPFoff", 0x33, 11, ReadWrite),
    bit("di/dt Sensor Enable", "didtEn", 0x33, 10, ReadWrite),
    bitfield("Three-Wire Mode", "3P3W", 0x33, 8, 2, ReadWrite),
    bit("CF2 Reactive Output", "CF2varh", 0x33, 7, ReadWrite),
    bit("Absolute Active Energy", "ABSEnP", 0x33, 6, ReadWrite),
    bit("Absolute Reactive Energy", "ABSEnQ", 0x33, 5, ReadWrite),
    bit("Phase A Metering Enable", "EnPA", 0x33, 2, ReadWrite),
    bit("Phase B Metering Enable", "EnPB", 0x33, 1, ReadWrite),
    bit("Phase C Metering Enable", "EnPC", 0x33, 0, ReadWrite),
    bitfield("PGA Gain", "PGA_GAIN", 0x34, 0, 8, ReadWrite),
    r16("Active Startup Threshold", "PStartTh", 0x35, ReadWrite, Uint16, 1.0, ""),
    r16("Reactive Startup Threshold", "QStartTh", 0x36, ReadWrite, Uint16, 1.0, ""),
    r16("Apparent Startup Threshold", "SStartTh", 0x37, ReadWrite, Uint16, 1.0, ""),
    r16("Active Phase Threshold", "PPhaseTh", 0x38, ReadWrite, Uint16, 1.0, ""),
    r16("Reactive Phase Threshold", "QPhaseTh", 0x39, ReadWrite, Uint16, 1.0, ""),
    r16("Apparent Phase Threshold", "SPhaseTh", 0x3A, ReadWrite, Uint16, 1.0, ""),
    // --- energy calibration ---
    r16("Phase A Active Offset", "PoffsetA", 0x41, ReadWrite, Int16, 1.0, ""),
    r16("Phase A Reactive Offset", "QoffsetA", 0x42, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Active Offset", "PoffsetB", 0x43, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Reactive Offset", "QoffsetB", 0x44, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Active Offset", "PoffsetC", 0x45, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Reactive Offset", "QoffsetC", 0x46, ReadWrite, Int16, 1.0, ""),
    r16("Phase A Power Gain", "PQGainA", 0x47, ReadWrite, Int16, 1.0, ""),
    r16("Phase A Phase Angle", "PhiA", 0x48, ReadWrite, Uint16, 1.0, ""),
    r16("Phase B Power Gain", "PQGainB", 0x49, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Phase Angle", "PhiB", 0x4A, ReadWrite, Uint16, 1.0, ""),
    r16("Phase C Power Gain", "PQGainC", 0x4B, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Phase Angle", "PhiC", 0x4C, ReadWrite, Uint16, 1.0, ""),
    // --- fundamental energy calibration ---
    r16("Phase A Fundamental Offset", "PoffsetAF", 0x51, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Fundamental Offset", "PoffsetBF", 0x52, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Fundamental Offset", "PoffsetCF", 0x53, ReadWrite, Int16, 1.0, ""),
    r16("Phase A Fundamental Gain", "PGainAF", 0x54, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Fundamental Gain", "PGainBF", 0x55, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Fundamental Gain", "PGainCF", 0x56, ReadWrite, Int16, 1.0, ""),
    // --- measurement calibration ---
    r16("Phase A Voltage Gain", "UgainA", 0x61, ReadWrite, Uint16, 1.0, ""),
    r16("Phase A Current Gain", "IgainA", 0x62, ReadWrite, Uint16, 1.0, ""),
    r16("Phase A Voltage Offset", "UoffsetA", 0x63, ReadWrite, Int16, 1.0, ""),
    r16("Phase A Current Offset", "IoffsetA", 0x64, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Voltage Gain", "UgainB", 0x65, ReadWrite, Uint16, 1.0, ""),
    r16("Phase B Current Gain", "IgainB", 0x66, ReadWrite, Uint16, 1.0, ""),
    r16("Phase B Voltage Offset", "UoffsetB", 0x67, ReadWrite, Int16, 1.0, ""),
    r16("Phase B Current Offset", "IoffsetB", 0x68, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Voltage Gain", "UgainC", 0x69, ReadWrite, Uint16, 1.0, ""),
    r16("Phase C Current Gain", "IgainC", 0x6A, ReadWrite, Uint16, 1.0, ""),
    r16("Phase C Voltage Offset", "UoffsetC", 0x6B, ReadWrite, Int16, 1.0, ""),
    r16("Phase C Current Offset", "IoffsetC", 0x6C, ReadWrite, Int16, 1.0, ""),
    // --- status and access control ---
    r16("Soft Reset", "SoftReset", 0x70, Write, Uint16, 1.0, ""),
    r16("Metering Status 0", "EMMState0", 0x71, Read, Uint16, 1.0, ""),
    r16("Metering Status 1", "EMMState1", 0x72, Read, Uint16, 1.0, ""),
    r16("Interrupt Status 0", "EMMIntState0", 0x73, ReadWriteClear1, Uint16, 1.0, ""),
    r16("Interrupt Status 1", "EMMIntState1", 0x74, ReadWriteClear1, Uint16, 1.0, ""),
    r16("Interrupt Enable 0", "EMMIntEn0", 0x75, ReadWrite, Uint16, 1.0, ""),
    r16("Interrupt Enable 1", "EMMIntEn1", 0x76, ReadWrite, Uint16, 1.0, ""),
    r16("Last SPI Data", "LastSPIData", 0x78, Read, Uint16, 1.0, ""),
    r16("Register Access Enable", "CfgRegAccEn", 0x7F, ReadWrite, Uint16, 1.0, ""),
    // --- energy accumulators (reading clears the counter) ---
    r16("Total Forward Active Energy", "APenergyT", 0x80, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase A Forward Active Energy", "APenergyA", 0x81, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase B Forward Active Energy", "APenergyB", 0x82, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase C Forward Active Energy", "APenergyC", 0x83, ReadClear, Uint16, 1.0, "CF"),
    r16("Total Reverse Active Energy", "ANenergyT", 0x84, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase A Reverse Active Energy", "ANenergyA", 0x85, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase B Reverse Active Energy", "ANenergyB", 0x86, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase C Reverse Active Energy", "ANenergyC", 0x87, ReadClear, Uint16, 1.0, "CF"),
    r16("Total Forward Reactive Energy", "RPenergyT", 0x88, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase A Forward Reactive Energy", "RPenergyA", 0x89, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase B Forward Reactive Energy", "RPenergyB", 0x8A, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase C Forward Reactive Energy", "RPenergyC", 0x8B, ReadClear, Uint16, 1.0, "CF"),
    r16("Total Apparent Energy", "SenergyT", 0x90, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase A Apparent Energy", "SenergyA", 0x91, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase B Apparent Energy", "SenergyB", 0x92, ReadClear, Uint16, 1.0, "CF"),
    r16("Phase C Apparent Energy", "SenergyC", 0x93, ReadClear, Uint16, 1.0, "CF"),
    // --- mean power ---
    r32("Total Active Power", "PmeanT", 0xB0, 0xC0, Read, Int32, 0.00032, "W"),
    r32("Phase A Active Power", "PmeanA", 0xB1, 0xC1, Read, Int32, 0.00032, "W"),
    r32("Phase B Active Power", "PmeanB", 0xB2, 0xC2, Read, Int32, 0.00032, "W"),
    r32("Phase C Active Power", "PmeanC", 0xB3, 0xC3, Read, Int32, 0.00032, "W"),
    r32("Total Reactive Power", "QmeanT", 0xB4, 0xC4, Read, Int32, 0.00032, "var"),
    r32("Phase A Reactive Power", "QmeanA", 0xB5, 0xC5, Read, Int32, 0.00032, "var"),
    r32("Phase B Reactive Power", "QmeanB", 0xB6, 0xC6, Read, Int32, 0.00032, "var"),
    r32("Phase C Reactive Power", "QmeanC", 0xB7, 0xC7, Read, Int32, 0.00032, "var"),
    r32("Total Apparent Power", "SmeanT", 0xB8, 0xC8, Read, Int32, 0.00032, "VA"),
    r32("Phase A Apparent Power", "SmeanA", 0xB9, 0xC9, Read, Int32, 0.00032, "VA"),
    r32("Phase B Apparent Power", "SmeanB", 0xBA, 0xCA, Read, Int32, 0.00032, "VA"),
    r32("Phase C Apparent Power", "SmeanC", 0xBB, 0xCB, Read, Int32, 0.00032, "VA"),
    r16("Total Power Factor", "PFmeanT", 0xBC, Read, Int16, 0.001, ""),
    r16("Phase A Power Factor", "PFmeanA", 0xBD, Read, Int16, 0.001, ""),
    r16("Phase B Power Factor", "PFmeanB", 0xBE, Read, Int16, 0.001, ""),
    r16("Phase C Power Factor", "PFmeanC", 0xBF, Read, Int16, 0.001, ""),
    // --- RMS measurements ---
    r16("Neutral Current RMS", "IrmsN", 0xD8, Read, Uint16, 0.001, "A"),
    r16("Phase A Voltage RMS", "UrmsA", 0xD9, Read, Uint16, 0.01, "V"),
    r16("Phase B Voltage RMS", "UrmsB", 0xDA, Read, Uint16, 0.01, "V"),
    r16("Phase C Voltage RMS", "UrmsC", 0xDB, Read, Uint16, 0.01, "V"),
    r16("Phase A Current RMS", "IrmsA", 0xDD, Read, Uint16, 0.001, "A"),
    r16("Phase B Current RMS", "IrmsB", 0xDE, Read, Uint16, 0.001, "A"),
    r16("Phase C Current RMS", "IrmsC", 0xDF, Read, Uint16, 0.001, "A"),
    // --- peak detect ---
    decoded("Phase A Voltage Peak", "UPeakA", 0xF1, decode_peak_voltage, "V"),
    decoded("Phase B Voltage Peak", "UPeakB", 0xF2, decode_peak_voltage, "V"),
    decoded("Phase C Voltage Peak", "UPeakC", 0xF3, decode_peak_voltage, "V"),
    decoded("Phase A Current Peak", "IPeakA", 0xF5, decode_peak_current, "A"),
    decoded("Phase B Current Peak", "IPeakB", 0xF6, decode_peak_current, "A"),
    decoded("Phase C Current Peak", "IPeakC", 0xF7, decode_peak_current, "A"),
    // --- frequency, angles, temperature ---
    r16("Line Frequency", "Freq", 0xF8, Read, Uint16, 0.01, "Hz"),
    r16("Phase A Power Angle", "PAngleA", 0xF9, Read, Int16, 0.1, "deg"),
    r16("Phase B Power Angle", "PAngleB", 0xFA, Read, Int16, 0.1, "deg"),
    r16("Phase C Power Angle", "PAngleC", 0xFB, Read, Int16, 0.1, "deg"),
    r16("Chip Temperature", "Temp", 0xFC, Read, Int16, 1.0, "C"),
    r16("Phase A Voltage Angle", "UangleA", 0xFD, Read, Int16, 0.1, "deg"),
    r16("Phase B Voltage Angle", "UangleB", 0xFE, Read, Int16, 0.1, "deg"),
    r16("Phase C Voltage Angle", "UangleC", 0xFF, Read, Int16, 0.1, "deg"),
];

/// Name-keyed view of [`REGISTERS`], built once at startup.
pub struct RegisterTable {
    by_name: HashMap<&'static str, &'static RegisterDescriptor>,
}

impl RegisterTable {
    pub fn new() -> Self {
        let mut by_name = HashMap::with_capacity(REGISTERS.len());
        for descriptor in REGISTERS {
            let previous = by_name.insert(descriptor.name, descriptor);
            debug_assert!(previous.is_none(), "duplicate register {}", descriptor.name);
        }
        Self { by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&'static RegisterDescriptor> {
        self.by_name.get(name).copied()
    }

    /// The full catalog in table order, for human-facing listings.
    pub fn catalog(&self) -> &'static [RegisterDescriptor] {
        REGISTERS
    }
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for descriptor in REGISTERS {
            assert!(seen.insert(descriptor.name), "duplicate {}", descriptor.name);
        }
    }

    #[test]
    fn bit_ranges_fit_the_word() {
        for descriptor in REGISTERS {
            assert!(
                descriptor.bit_pos as u32 + descriptor.bit_len as u32 <= 16,
                "{} exceeds word width",
                descriptor.name
            );
        }
    }

    #[test]
    fn composite_registers_have_two_addresses() {
        for descriptor in REGISTERS {
            if descriptor.reg_count == 2 {
                assert_ne!(descriptor.address[0], descriptor.address[1], "{}", descriptor.name);
            }
        }
    }

    #[test]
    fn lookup_by_name() {
        let table = RegisterTable::new();
        assert_eq!(table.lookup("UrmsA").unwrap().address[0], 0xD9);
        assert!(table.lookup("NoSuchRegister").is_none());
    }

    #[test]
    fn peak_decode_is_sign_magnitude() {
        assert_eq!(decode_peak_voltage(0x0000), 0.0);
        assert!((decode_peak_voltage(23000) - 230.0).abs() < 1e-3);
        assert!((decode_peak_voltage(0x8000 | 23000) + 230.0).abs() < 1e-3);
        assert!((decode_peak_current(1500) - 1.5).abs() < 1e-6);
    }
}
