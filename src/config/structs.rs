use serde::{Deserialize, Serialize};

use crate::energy::PHASE_COUNT;

#[derive(Serialize, Deserialize, Clone)]
pub struct EnergySettings {
    /// milliseconds between energy-counter drains
    pub read_interval_ms: u64,
    /// milliseconds between persisted total saves
    pub save_interval_ms: u64,
    /// per-phase totals in kWh
    pub accumulated_kwh: [f64; PHASE_COUNT],
    /// pulses per kWh relating CF counts to energy
    pub meter_constant: u16,
}

impl Default for EnergySettings {
    fn default() -> Self {
        Self {
            read_interval_ms: 20_000,
            save_interval_ms: 600_000,
            accumulated_kwh: [0.0; PHASE_COUNT],
            meter_constant: 3200,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct LoggingSettings {
    pub logging_interval_ms: u64,
    /// measurement slots, clamped to [1, 1000] at allocation
    pub buffer_size: usize,
    /// line voltage below which power is considered failing
    pub power_loss_threshold: f32,
    pub power_loss_detection: bool,
    /// comma-separated register names to capture
    pub log_fields: String,
}

impl LoggingSettings {
    pub fn validate(&self) -> bool {
        self.logging_interval_ms > 0 && self.power_loss_threshold >= 0.0
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            logging_interval_ms: 1000,
            buffer_size: 60,
            power_loss_threshold: 100.0,
            power_loss_detection: true,
            log_fields: String::from("UrmsA,IrmsA,PmeanA,SmeanA,QmeanA,Freq"),
        }
    }
}

/// Raw energy-calibration register values, phase-indexed.
#[derive(Serialize, Deserialize, Clone, Copy, Default)]
pub struct CalibrationRegisters {
    pub p_offset: [u16; PHASE_COUNT],
    pub q_offset: [u16; PHASE_COUNT],
    pub pq_gain: [u16; PHASE_COUNT],
    pub phi: [u16; PHASE_COUNT],
}

/// Raw RMS-calibration register values, phase-indexed.
#[derive(Serialize, Deserialize, Clone, Copy)]
pub struct MeasurementCalibration {
    pub u_gain: [u16; PHASE_COUNT],
    pub i_gain: [u16; PHASE_COUNT],
    pub u_offset: [u16; PHASE_COUNT],
    pub i_offset: [u16; PHASE_COUNT],
}

impl Default for MeasurementCalibration {
    fn default() -> Self {
        Self {
            // chip power-on defaults: mid-scale gain, zero offset
            u_gain: [0x8000; PHASE_COUNT],
            i_gain: [0x8000; PHASE_COUNT],
            u_offset: [0; PHASE_COUNT],
            i_offset: [0; PHASE_COUNT],
        }
    }
}
