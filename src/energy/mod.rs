use core::fmt;

use log::{info, warn};

use crate::config::SettingsManager;
use crate::logger::VolumeHost;
use crate::meter::driver::MeterDriver;
use crate::meter::RegisterAccess;

pub const PHASE_COUNT: usize = 3;

const PHASE_LABELS: [char; PHASE_COUNT] = ['A', 'B', 'C'];
const ENERGY_REGISTERS: [&str; PHASE_COUNT] = ["APenergyA", "APenergyB", "APenergyC"];
const GAIN_REGISTERS: [&str; PHASE_COUNT] = ["PQGainA", "PQGainB", "PQGainC"];

// CfgRegAccEn values gating calibration-register writes
const REG_ACCESS_ENABLE: &str = "CfgRegAccEn";
const UNLOCK_KEY: f32 = 0x55AA as f32;
const LOCK_KEY: f32 = 0.0;

// a completion measurement below this cannot produce a meaningful gain
const MIN_MEASURED_WH: f64 = 0.1;

#[derive(Debug, PartialEq, Eq)]
pub enum CalibrationError {
    SessionActive,
    InvalidPhaseMask,
    NotCalibrating,
    InvalidPhase,
    PhaseNotSelected,
    MeasurementTooSmall,
    RegisterAccess,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            CalibrationError::SessionActive => "calibration already in progress",
            CalibrationError::InvalidPhaseMask => "phase mask must select phases A..C",
            CalibrationError::NotCalibrating => "no calibration session active",
            CalibrationError::InvalidPhase => "phase index out of range",
            CalibrationError::PhaseNotSelected => "phase is not part of the active session",
            CalibrationError::MeasurementTooSmall => "measured energy below 0.1 Wh",
            CalibrationError::RegisterAccess => "register access failed",
        };
        f.write_str(message)
    }
}

/// One calibration session. Phases leave the mask individually as they
/// complete; the session ends when the mask reaches zero.
#[derive(Copy, Clone, Debug, Default)]
struct CalibrationState {
    calibrating: bool,
    phase_mask: u8,
    start_time_ms: u64,
}

/// Drains the chip's read-clear energy counters on a timer and keeps
/// per-phase kilowatt-hour totals. Sole writer of the totals; the data
/// logger reads them when stamping measurements.
pub struct EnergyAccumulator {
    accumulated_kwh: [f64; PHASE_COUNT],
    read_interval_ms: u64,
    save_interval_ms: u64,
    last_read_ms: u64,
    last_save_ms: u64,
    calibration: CalibrationState,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self {
            accumulated_kwh: [0.0; PHASE_COUNT],
            read_interval_ms: 20_000,
            save_interval_ms: 600_000,
            last_read_ms: 0,
            last_save_ms: 0,
            calibration: CalibrationState::default(),
        }
    }

    /// Loads persisted totals and intervals, then performs one throwaway
    /// read of each energy counter so accumulation starts from zero.
    pub fn begin<D: MeterDriver>(
        &mut self,
        now_ms: u64,
        access: &mut RegisterAccess<D>,
        settings: &SettingsManager,
    ) {
        let energy = settings.energy();
        self.read_interval_ms = energy.read_interval_ms;
        self.save_interval_ms = energy.save_interval_ms;
        self.accumulated_kwh = energy.accumulated_kwh;

        info!(
            "energy accumulator: restored totals {:.3} / {:.3} / {:.3} kWh",
            self.accumulated_kwh[0], self.accumulated_kwh[1], self.accumulated_kwh[2]
        );

        self.last_read_ms = now_ms;
        self.last_save_ms = now_ms;

        self.clear_energy_counters(access, settings.energy().meter_constant);
    }

    pub fn set_read_interval(&mut self, interval_ms: u64) {
        self.read_interval_ms = interval_ms;
    }

    pub fn set_save_interval(&mut self, interval_ms: u64) {
        self.save_interval_ms = interval_ms;
    }

    pub fn accumulated_energy(&self, phase: usize) -> f64 {
        if phase < PHASE_COUNT {
            self.accumulated_kwh[phase]
        } else {
            0.0
        }
    }

    pub fn set_accumulated_energy(&mut self, phase: usize, kwh: f64) {
        if phase < PHASE_COUNT {
            self.accumulated_kwh[phase] = kwh;
        }
    }

    /// Zeroes one phase total and persists the reset immediately.
    pub fn reset_accumulated_energy<V: VolumeHost>(
        &mut self,
        phase: usize,
        settings: &mut SettingsManager,
        volume: &V,
    ) {
        if phase < PHASE_COUNT {
            self.accumulated_kwh[phase] = 0.0;
            self.save_to_settings(settings, volume);
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.calibrating
    }

    pub fn calibration_mask(&self) -> u8 {
        self.calibration.phase_mask
    }

    pub fn calibration_started_ms(&self) -> u64 {
        self.calibration.start_time_ms
    }

    /// One cooperative tick: drain the energy counters when the read
    /// interval elapses (suppressed during calibration), persist the totals
    /// when the save interval elapses.
    pub fn update<D: MeterDriver, V: VolumeHost>(
        &mut self,
        now_ms: u64,
        access: &mut RegisterAccess<D>,
        settings: &mut SettingsManager,
        volume: &V,
    ) {
        if !self.calibration.calibrating
            && now_ms.wrapping_sub(self.last_read_ms) >= self.read_interval_ms
        {
            self.last_read_ms = now_ms;
            let meter_constant = settings.energy().meter_constant;

            for phase in 0..PHASE_COUNT {
                match read_energy_register(access, meter_constant, phase) {
                    Ok(watt_hours) => {
                        self.accumulated_kwh[phase] += watt_hours / 1000.0;
                        if watt_hours > 0.01 {
                            info!(
                                "energy read - phase {}: {:.2} Wh (total {:.3} kWh)",
                                PHASE_LABELS[phase], watt_hours, self.accumulated_kwh[phase]
                            );
                        }
                    }
                    Err(_) => {
                        warn!(
                            "failed to read energy register for phase {}",
                            PHASE_LABELS[phase]
                        );
                    }
                }
            }
        }

        if now_ms.wrapping_sub(self.last_save_ms) >= self.save_interval_ms {
            self.last_save_ms = now_ms;
            if !self.save_to_settings(settings, volume) {
                warn!("periodic energy save failed");
            }
        }
    }

    /// Opens a calibration session for the phases in `phase_mask`
    /// (bit 0 = A, bit 1 = B, bit 2 = C). Selected phases get their gain
    /// register forced to unity and their energy counter zeroed.
    pub fn start_calibration<D: MeterDriver>(
        &mut self,
        now_ms: u64,
        access: &mut RegisterAccess<D>,
        phase_mask: u8,
    ) -> Result<(), CalibrationError> {
        if self.calibration.calibrating {
            return Err(CalibrationError::SessionActive);
        }
        if phase_mask == 0 || phase_mask > 0b111 {
            return Err(CalibrationError::InvalidPhaseMask);
        }

        info!("starting energy calibration, phase mask {phase_mask:#05b}");

        let _ = access.write_register(REG_ACCESS_ENABLE, UNLOCK_KEY);

        for phase in 0..PHASE_COUNT {
            if phase_mask & (1 << phase) != 0 {
                if access.write_register_raw(GAIN_REGISTERS[phase], 0).is_err() {
                    warn!("failed to reset gain for phase {}", PHASE_LABELS[phase]);
                }
                // throwaway read zeroes the hardware counter
                let _ = access.read_register_raw(ENERGY_REGISTERS[phase]);
                info!("phase {} gain set to unity, counter cleared", PHASE_LABELS[phase]);
            }
        }

        let _ = access.write_register(REG_ACCESS_ENABLE, LOCK_KEY);

        self.calibration = CalibrationState {
            calibrating: true,
            phase_mask,
            start_time_ms: now_ms,
        };

        Ok(())
    }

    /// Finishes one phase of the session against a known reference load.
    /// Computes the gain correction, writes it to the chip and records it in
    /// the settings store. Returns the new gain on success.
    pub fn complete_calibration<D: MeterDriver, V: VolumeHost>(
        &mut self,
        now_ms: u64,
        access: &mut RegisterAccess<D>,
        settings: &mut SettingsManager,
        volume: &V,
        phase: usize,
        load_watts: f64,
        duration_minutes: f64,
    ) -> Result<i16, CalibrationError> {
        if !self.calibration.calibrating {
            return Err(CalibrationError::NotCalibrating);
        }
        if phase >= PHASE_COUNT {
            return Err(CalibrationError::InvalidPhase);
        }
        if self.calibration.phase_mask & (1 << phase) == 0 {
            return Err(CalibrationError::PhaseNotSelected);
        }

        let expected_wh = load_watts * duration_minutes / 60.0;
        let meter_constant = settings.energy().meter_constant;
        let measured_wh = read_energy_register(access, meter_constant, phase)
            .map_err(|_| CalibrationError::RegisterAccess)?;

        info!(
            "calibration phase {}: expected {:.2} Wh, measured {:.2} Wh",
            PHASE_LABELS[phase], expected_wh, measured_wh
        );

        let gain = compute_gain(expected_wh, measured_wh)?;

        let _ = access.write_register(REG_ACCESS_ENABLE, UNLOCK_KEY);
        let written = access.write_register_raw(GAIN_REGISTERS[phase], gain as u16 as u32);
        let _ = access.write_register(REG_ACCESS_ENABLE, LOCK_KEY);

        if written.is_err() {
            return Err(CalibrationError::RegisterAccess);
        }

        info!(
            "calibration phase {}: new gain {:#06x} ({})",
            PHASE_LABELS[phase], gain as u16, gain
        );

        settings.calibration_mut().pq_gain[phase] = gain as u16;
        if !settings.save(volume) {
            warn!("failed to persist calibration gain");
        }

        self.calibration.phase_mask &= !(1 << phase);

        if self.calibration.phase_mask == 0 {
            self.calibration.calibrating = false;
            info!("calibration complete for all phases");

            // resume normal accumulation from freshly zeroed counters
            self.clear_energy_counters(access, meter_constant);
            self.last_read_ms = now_ms;
        }

        Ok(gain)
    }

    /// Pushes the totals and intervals into the settings store and saves it.
    /// Safe to call at any time, including from the emergency flush path.
    pub fn save_to_settings<V: VolumeHost>(
        &self,
        settings: &mut SettingsManager,
        volume: &V,
    ) -> bool {
        let energy = settings.energy_mut();
        energy.accumulated_kwh = self.accumulated_kwh;
        energy.read_interval_ms = self.read_interval_ms;
        energy.save_interval_ms = self.save_interval_ms;
        settings.save(volume)
    }

    fn clear_energy_counters<D: MeterDriver>(
        &mut self,
        access: &mut RegisterAccess<D>,
        meter_constant: u16,
    ) {
        for phase in 0..PHASE_COUNT {
            let _ = read_energy_register(access, meter_constant, phase);
        }
    }
}

impl Default for EnergyAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// One atomic drain of a phase's read-clear energy counter, converted to
/// watt-hours: `Wh = counts * 1000 / meter_constant`.
fn read_energy_register<D: MeterDriver>(
    access: &mut RegisterAccess<D>,
    meter_constant: u16,
    phase: usize,
) -> Result<f64, ()> {
    let counts = access
        .read_register_raw(ENERGY_REGISTERS[phase])
        .map_err(|_| ())? as f64;
    Ok(counts * 1000.0 / meter_constant as f64)
}

/// Gain correction from a reference-load comparison:
/// `gain = round((-e / (1 + e)) * 32768)` where `e` is the relative error.
/// The sign convention is fixed by the chip; do not re-derive it.
fn compute_gain(expected_wh: f64, measured_wh: f64) -> Result<i16, CalibrationError> {
    if measured_wh < MIN_MEASURED_WH {
        return Err(CalibrationError::MeasurementTooSmall);
    }
    let epsilon = (measured_wh - expected_wh) / expected_wh;
    Ok(((-epsilon / (1.0 + epsilon)) * 32768.0).round() as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_formula() {
        // 10% over-reading: e = 0.1, gain = round(-0.1/1.1 * 32768)
        assert_eq!(compute_gain(100.0, 110.0).unwrap(), -2979);
        // 10% under-reading pulls the gain positive
        assert_eq!(compute_gain(100.0, 90.0).unwrap(), 3641);
        // perfect match leaves unity
        assert_eq!(compute_gain(100.0, 100.0).unwrap(), 0);
    }

    #[test]
    fn gain_guard_rejects_tiny_measurements() {
        assert_eq!(
            compute_gain(100.0, 0.05),
            Err(CalibrationError::MeasurementTooSmall)
        );
    }

    #[test]
    fn gain_saturates_at_i16_range() {
        // an absurd error cannot overflow the 16-bit register
        let gain = compute_gain(1000.0, 0.5).unwrap();
        assert_eq!(gain, i16::MAX);
    }
}
