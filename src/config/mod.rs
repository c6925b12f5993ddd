mod structs;
pub use structs::*;

use std::fs;

use crc::{Crc, CRC_32_ISCSI};
use log::{error, info, warn};

use crate::logger::VolumeHost;
use crate::meter::driver::MeterDriver;
use crate::meter::RegisterAccess;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const SETTINGS_FILE: &str = "settings.bin";

const REG_ACCESS_ENABLE: &str = "CfgRegAccEn";
const UNLOCK_KEY: f32 = 0x55AA as f32;
const LOCK_KEY: f32 = 0.0;

const P_OFFSET_REGISTERS: [&str; 3] = ["PoffsetA", "PoffsetB", "PoffsetC"];
const Q_OFFSET_REGISTERS: [&str; 3] = ["QoffsetA", "QoffsetB", "QoffsetC"];
const PQ_GAIN_REGISTERS: [&str; 3] = ["PQGainA", "PQGainB", "PQGainC"];
const PHI_REGISTERS: [&str; 3] = ["PhiA", "PhiB", "PhiC"];
const U_GAIN_REGISTERS: [&str; 3] = ["UgainA", "UgainB", "UgainC"];
const I_GAIN_REGISTERS: [&str; 3] = ["IgainA", "IgainB", "IgainC"];
const U_OFFSET_REGISTERS: [&str; 3] = ["UoffsetA", "UoffsetB", "UoffsetC"];
const I_OFFSET_REGISTERS: [&str; 3] = ["IoffsetA", "IoffsetB", "IoffsetC"];

/// The external settings store: setting groups with defaults, persisted as
/// CRC-framed records in one file at the volume root. A missing or corrupt
/// file falls back to defaults.
pub struct SettingsManager {
    energy: EnergySettings,
    logging: LoggingSettings,
    calibration: CalibrationRegisters,
    measurement: MeasurementCalibration,
}

impl SettingsManager {
    pub fn new() -> Self {
        Self {
            energy: Default::default(),
            logging: Default::default(),
            calibration: Default::default(),
            measurement: Default::default(),
        }
    }

    pub fn energy(&self) -> &EnergySettings {
        &self.energy
    }

    pub fn energy_mut(&mut self) -> &mut EnergySettings {
        &mut self.energy
    }

    pub fn logging(&self) -> &LoggingSettings {
        &self.logging
    }

    pub fn logging_mut(&mut self) -> &mut LoggingSettings {
        &mut self.logging
    }

    pub fn calibration(&self) -> &CalibrationRegisters {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationRegisters {
        &mut self.calibration
    }

    pub fn measurement(&self) -> &MeasurementCalibration {
        &self.measurement
    }

    pub fn measurement_mut(&mut self) -> &mut MeasurementCalibration {
        &mut self.measurement
    }

    /// Loads all groups from the volume. Returns false (keeping whatever
    /// values are currently held) when the volume is unmounted, the file is
    /// absent, or any record fails its CRC.
    pub fn load<V: VolumeHost>(&mut self, volume: &V) -> bool {
        let Some(root) = volume.root() else {
            warn!("cannot load settings: volume not mounted");
            return false;
        };

        let path = root.join(SETTINGS_FILE);
        let Ok(buffer) = fs::read(&path) else {
            info!("no settings file, using defaults");
            return false;
        };

        let Ok((energy, buffer)) =
            postcard::take_from_bytes_crc32::<EnergySettings>(&buffer, CRC.digest())
        else {
            error!("error deserializing energy settings");
            return false;
        };
        let Ok((logging, buffer)) =
            postcard::take_from_bytes_crc32::<LoggingSettings>(buffer, CRC.digest())
        else {
            error!("error deserializing logging settings");
            return false;
        };
        let Ok((calibration, buffer)) =
            postcard::take_from_bytes_crc32::<CalibrationRegisters>(buffer, CRC.digest())
        else {
            error!("error deserializing calibration registers");
            return false;
        };
        let Ok((measurement, _)) =
            postcard::take_from_bytes_crc32::<MeasurementCalibration>(buffer, CRC.digest())
        else {
            error!("error deserializing measurement calibration");
            return false;
        };

        if !logging.validate() {
            error!("persisted logging settings failed validation");
            return false;
        }

        self.energy = energy;
        self.logging = logging;
        self.calibration = calibration;
        self.measurement = measurement;

        info!("settings loaded from storage");
        true
    }

    /// Writes all groups to the volume synchronously. The emergency flush
    /// path relies on this completing before power is gone.
    pub fn save<V: VolumeHost>(&self, volume: &V) -> bool {
        let Some(root) = volume.root() else {
            warn!("cannot save settings: volume not mounted");
            return false;
        };

        let mut buffer = [0u8; 4096];
        let mut used = 0;

        let ok = append_record(&self.energy, &mut buffer, &mut used)
            && append_record(&self.logging, &mut buffer, &mut used)
            && append_record(&self.calibration, &mut buffer, &mut used)
            && append_record(&self.measurement, &mut buffer, &mut used);
        if !ok {
            return false;
        }

        let path = root.join(SETTINGS_FILE);
        if let Err(err) = fs::write(&path, &buffer[..used]) {
            error!("error writing settings file: {err}");
            return false;
        }
        true
    }

    /// Pushes every raw calibration value to the chip inside one
    /// unlock/lock bracket. Returns false if any write is refused.
    pub fn apply_registers<D: MeterDriver>(&self, access: &mut RegisterAccess<D>) -> bool {
        let mut success = access.write_register(REG_ACCESS_ENABLE, UNLOCK_KEY).is_ok();

        for phase in 0..3 {
            success &= access
                .write_register_raw(P_OFFSET_REGISTERS[phase], self.calibration.p_offset[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(Q_OFFSET_REGISTERS[phase], self.calibration.q_offset[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(PQ_GAIN_REGISTERS[phase], self.calibration.pq_gain[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(PHI_REGISTERS[phase], self.calibration.phi[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(U_GAIN_REGISTERS[phase], self.measurement.u_gain[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(I_GAIN_REGISTERS[phase], self.measurement.i_gain[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(U_OFFSET_REGISTERS[phase], self.measurement.u_offset[phase] as u32)
                .is_ok();
            success &= access
                .write_register_raw(I_OFFSET_REGISTERS[phase], self.measurement.i_offset[phase] as u32)
                .is_ok();
        }

        success &= access.write_register(REG_ACCESS_ENABLE, LOCK_KEY).is_ok();
        success
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn append_record<T: serde::Serialize>(value: &T, buffer: &mut [u8], used: &mut usize) -> bool {
    match postcard::to_slice_crc32(value, &mut buffer[*used..], CRC.digest()) {
        Ok(record) => {
            *used += record.len();
            true
        }
        Err(err) => {
            error!("error serializing settings: {err}");
            false
        }
    }
}
