mod csv;
mod volume;

pub use volume::{MountStrategy, StorageError, VolumeHost};

use std::thread;
use std::time::Duration;

use heapless::String as BoundedString;
use heapless::Vec as BoundedVec;
use log::{error, info, warn};

use crate::config::{LoggingSettings, SettingsManager};
use crate::energy::EnergyAccumulator;
use crate::meter::driver::MeterDriver;
use crate::meter::{RegisterAccess, RegisterDescriptor};
use crate::WallClock;

/// Upper bound on the number of registers captured per measurement.
pub const MAX_LOG_FIELDS: usize = 16;

const BUFFER_SIZE_MIN: usize = 1;
const BUFFER_SIZE_MAX: usize = 1000;

const CARD_CHECK_INTERVAL_MS: u64 = 1000;
const POWER_CHECK_INTERVAL_MS: u64 = 100;

// delay between mount strategies, to let marginal cards settle
const MOUNT_RETRY_DELAY_MS: u64 = 100;

// the register sampled to detect imminent power failure
const POWER_SENSE_REGISTER: &str = "UrmsA";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoggerState {
    Uninitialized,
    MountedIdle,
    MountedLogging,
    WriteProtected,
    PowerLost,
}

/// One configured capture column: the register name as given, plus its
/// descriptor when the catalog knows it. Unknown or write-only names stay in
/// the list and surface as invalid samples.
pub struct LogField {
    pub name: BoundedString<32>,
    pub descriptor: Option<&'static RegisterDescriptor>,
}

#[derive(Copy, Clone, Debug)]
pub struct FieldSample {
    pub value: f32,
    pub valid: bool,
}

/// One timestamped sample. Field storage is owned by the buffer slot and
/// released when the slot is flushed; `fields[i]` corresponds to the i-th
/// configured log field (reconfiguration is refused while slots are held,
/// so the correspondence cannot drift).
pub struct Measurement {
    pub fields: BoundedVec<FieldSample, MAX_LOG_FIELDS>,
    pub timestamp: i64,
    pub kwh: f64,
}

/// Buffered, power-loss-safe measurement logger.
///
/// Captures a configurable set of registers on a timer into a bounded
/// buffer, flushes to dated CSV files when the buffer fills, and owns the
/// emergency flush-and-unmount path taken when supply voltage collapses.
pub struct DataLogger {
    initialized: bool,
    card_present: bool,
    write_protected: bool,
    logging_enabled: bool,
    settings_need_reload: bool,

    buffer: Vec<Measurement>,
    buffer_capacity: usize,

    power_loss_detection: bool,
    power_loss_threshold: f32,
    power_lost: bool,
    last_power_check_ms: u64,

    logging_interval_ms: u64,
    last_log_ms: u64,
    log_count: u64,
    last_card_check_ms: u64,

    fields: Vec<LogField>,
}

impl DataLogger {
    pub fn new() -> Self {
        let mut logger = Self {
            initialized: false,
            card_present: false,
            write_protected: false,
            logging_enabled: false,
            settings_need_reload: false,
            buffer: Vec::new(),
            buffer_capacity: 0,
            power_loss_detection: true,
            power_loss_threshold: 100.0,
            power_lost: false,
            last_power_check_ms: 0,
            logging_interval_ms: 1000,
            last_log_ms: 0,
            log_count: 0,
            last_card_check_ms: 0,
            fields: Vec::new(),
        };
        logger.allocate_buffer(60);
        logger
    }

    /// Initial card detection and mount attempt.
    pub fn begin<V: VolumeHost>(&mut self, volume: &mut V) -> bool {
        self.card_present = volume.card_present();
        self.write_protected = self.card_present && volume.write_protected();

        if self.card_present {
            self.mount_card(volume)
        } else {
            warn!("no storage card detected on startup");
            false
        }
    }

    /// Applies the persisted logging configuration. Called at startup and
    /// whenever the settings store is reloaded.
    pub fn apply_settings<D: MeterDriver>(
        &mut self,
        settings: &LoggingSettings,
        access: &RegisterAccess<D>,
    ) {
        self.logging_interval_ms = settings.logging_interval_ms;
        self.power_loss_threshold = settings.power_loss_threshold;
        self.power_loss_detection = settings.power_loss_detection;
        self.set_buffer_size(settings.buffer_size);
        self.set_log_fields(&settings.log_fields, access);
    }

    pub fn set_logging_interval(&mut self, interval_ms: u64) {
        self.logging_interval_ms = interval_ms;
    }

    pub fn set_power_loss_threshold(&mut self, voltage: f32) {
        self.power_loss_threshold = voltage;
    }

    pub fn enable_power_loss_detection(&mut self, enable: bool) {
        self.power_loss_detection = enable;
    }

    /// Resizes the measurement buffer. Refused while the buffer holds
    /// unflushed data; flush or disable logging first.
    pub fn set_buffer_size(&mut self, size: usize) -> bool {
        if self.logging_enabled && !self.buffer.is_empty() {
            warn!("cannot change buffer size while buffered data is pending");
            return false;
        }
        self.allocate_buffer(size)
    }

    /// Reconfigures the captured register set. Refused while the buffer
    /// holds unflushed data. Unknown and write-only names are kept with a
    /// warning; they produce invalid samples at capture time.
    pub fn set_log_fields<D: MeterDriver>(
        &mut self,
        list: &str,
        access: &RegisterAccess<D>,
    ) -> bool {
        if self.logging_enabled && !self.buffer.is_empty() {
            warn!("cannot change log fields while buffered data is pending");
            return false;
        }

        self.fields.clear();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if self.fields.len() >= MAX_LOG_FIELDS {
                warn!("log field list truncated to {MAX_LOG_FIELDS} entries");
                break;
            }
            let Ok(bounded) = BoundedString::try_from(name) else {
                warn!("log field name '{name}' too long, skipped");
                continue;
            };
            let descriptor = access.register_info(name);
            match descriptor {
                None => warn!("log field '{name}' not found in register catalog"),
                Some(reg) if !reg.access.readable() => {
                    warn!("log field '{name}' is write-only and cannot be captured")
                }
                Some(_) => {}
            }
            self.fields.push(LogField {
                name: bounded,
                descriptor,
            });
        }

        info!("log fields configured: {}", self.log_fields());
        true
    }

    /// The configured field list as a comma-separated string.
    pub fn log_fields(&self) -> String {
        let names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        names.join(",")
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn log_count(&self) -> u64 {
        self.log_count
    }

    pub fn is_card_present(&self) -> bool {
        self.card_present && self.initialized
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    /// Read-and-clear flag raised after a power-loss recovery remount; the
    /// owning configuration store should reload persisted settings.
    pub fn settings_need_reload(&mut self) -> bool {
        let result = self.settings_need_reload;
        self.settings_need_reload = false;
        result
    }

    pub fn state(&self) -> LoggerState {
        if self.power_lost {
            LoggerState::PowerLost
        } else if !self.initialized {
            LoggerState::Uninitialized
        } else if self.write_protected {
            LoggerState::WriteProtected
        } else if self.logging_enabled {
            LoggerState::MountedLogging
        } else {
            LoggerState::MountedIdle
        }
    }

    /// Enables or disables periodic capture. Enabling requires a mounted,
    /// writable card and an allocated buffer; disabling flushes any
    /// buffered data first.
    pub fn enable_logging<V: VolumeHost>(&mut self, enable: bool, volume: &V) {
        if enable && self.write_protected {
            warn!("cannot enable logging: card is write-protected");
            self.logging_enabled = false;
            return;
        }
        if enable && !self.card_present {
            warn!("cannot enable logging: no card present");
            self.logging_enabled = false;
            return;
        }
        if enable && self.buffer_capacity == 0 {
            warn!("cannot enable logging: buffer not allocated");
            self.logging_enabled = false;
            return;
        }

        if !enable && self.logging_enabled && !self.buffer.is_empty() {
            info!("flushing buffer before disabling logging");
            self.flush_buffer(volume);
        }

        self.logging_enabled = enable;
        info!(
            "data logging {}",
            if enable { "enabled" } else { "disabled" }
        );
    }

    /// One cooperative tick: poll card and power status on their own
    /// cadences, then capture a measurement when the logging interval
    /// elapses and every gate (mounted, enabled, writable, clock valid) is
    /// open.
    pub fn update<D: MeterDriver, V: VolumeHost, C: WallClock>(
        &mut self,
        now_ms: u64,
        access: &mut RegisterAccess<D>,
        accumulator: &EnergyAccumulator,
        settings: &mut SettingsManager,
        volume: &mut V,
        clock: &C,
    ) {
        if now_ms.wrapping_sub(self.last_card_check_ms) >= CARD_CHECK_INTERVAL_MS {
            self.last_card_check_ms = now_ms;
            self.check_card_status(volume);
        }

        if now_ms.wrapping_sub(self.last_power_check_ms) >= POWER_CHECK_INTERVAL_MS {
            self.last_power_check_ms = now_ms;
            self.check_power_status(access, accumulator, settings, volume, clock);
        }

        if self.power_lost {
            return;
        }

        if !self.initialized || !self.logging_enabled || self.write_protected || !clock.is_valid()
        {
            return;
        }

        if now_ms.wrapping_sub(self.last_log_ms) >= self.logging_interval_ms {
            if self.log_measurement(access, accumulator, volume, clock) {
                self.last_log_ms = now_ms;
            }
        }
    }

    /// Flushes every buffered measurement to the dated file tree. Trivially
    /// succeeds on an empty buffer; leaves the cursor at zero on success.
    pub fn flush_buffer<V: VolumeHost>(&mut self, volume: &V) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        if !self.initialized || self.write_protected {
            error!("cannot flush: storage not ready or write-protected");
            return false;
        }
        let Some(root) = volume.root() else {
            error!("cannot flush: volume reports no root path");
            return false;
        };

        match csv::write_measurements(root, &self.fields, &self.buffer) {
            Ok(()) => {
                info!("flushed {} measurements", self.buffer.len());
                self.buffer.clear();
                true
            }
            Err(err) => {
                error!("failed to flush buffer: {err}");
                false
            }
        }
    }

    fn allocate_buffer(&mut self, size: usize) -> bool {
        let size = size.clamp(BUFFER_SIZE_MIN, BUFFER_SIZE_MAX);

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(size).is_err() {
            error!("failed to allocate buffer for {size} measurements, logging disabled");
            self.buffer = Vec::new();
            self.buffer_capacity = 0;
            self.logging_enabled = false;
            return false;
        }

        self.buffer = buffer;
        self.buffer_capacity = size;
        info!("measurement buffer allocated: {size} slots");
        true
    }

    fn check_card_status<V: VolumeHost>(&mut self, volume: &mut V) {
        let was_present = self.card_present;
        let was_protected = self.write_protected;

        self.card_present = volume.card_present();
        self.write_protected = self.card_present && volume.write_protected();

        if self.card_present && !was_present {
            info!("storage card inserted");
            self.mount_card(volume);
        }

        if !self.card_present && was_present {
            info!("storage card removed");
            volume.unmount();
            self.initialized = false;
            if self.logging_enabled {
                self.logging_enabled = false;
                info!("data logging stopped (card removed)");
            }
        }

        if self.card_present && self.write_protected != was_protected {
            if self.write_protected {
                warn!("storage card is now write-protected");
            } else {
                info!("storage card write protection removed");
            }
        }
    }

    fn mount_card<V: VolumeHost>(&mut self, volume: &mut V) -> bool {
        info!("attempting to mount storage volume");

        for (attempt, strategy) in MountStrategy::SEQUENCE.iter().enumerate() {
            if attempt > 0 {
                thread::sleep(Duration::from_millis(MOUNT_RETRY_DELAY_MS));
            }
            match volume.mount(*strategy) {
                Ok(()) => {
                    info!("volume mounted ({strategy:?})");
                    self.initialized = true;
                    return true;
                }
                Err(err) => warn!("mount strategy {strategy:?} failed: {err:?}"),
            }
        }

        error!("volume mount failed");
        self.initialized = false;
        false
    }

    fn check_power_status<D: MeterDriver, V: VolumeHost, C: WallClock>(
        &mut self,
        access: &mut RegisterAccess<D>,
        accumulator: &EnergyAccumulator,
        settings: &mut SettingsManager,
        volume: &mut V,
        clock: &C,
    ) {
        if !self.power_loss_detection {
            return;
        }

        // supply health is inferred from the metered line voltage
        let Ok(voltage) = access.read_register(POWER_SENSE_REGISTER) else {
            return;
        };

        if voltage < self.power_loss_threshold && !self.power_lost {
            warn!(
                "power loss detected: {voltage:.2} V below threshold {:.2} V",
                self.power_loss_threshold
            );
            self.power_lost = true;
            self.handle_power_loss(access, accumulator, settings, volume, clock);
        }

        if voltage >= self.power_loss_threshold && self.power_lost {
            info!("power restored: {voltage:.2} V");
            self.power_lost = false;
            self.handle_power_restoration(volume);
        }
    }

    /// Emergency persistence: save the energy totals, capture one final
    /// measurement if a slot is free, flush, and unmount no matter what.
    fn handle_power_loss<D: MeterDriver, V: VolumeHost, C: WallClock>(
        &mut self,
        access: &mut RegisterAccess<D>,
        accumulator: &EnergyAccumulator,
        settings: &mut SettingsManager,
        volume: &mut V,
        clock: &C,
    ) {
        info!(
            "emergency flush: {} / {} slots in use",
            self.buffer.len(),
            self.buffer_capacity
        );

        if !accumulator.save_to_settings(settings, volume) {
            warn!("failed to save energy totals during power loss");
        }

        if self.buffer.len() < self.buffer_capacity {
            let measurement = self.take_measurement(access, accumulator, clock);
            self.buffer.push(measurement);
            info!("final measurement captured");
        }

        if !self.flush_buffer(volume) {
            error!("emergency flush failed");
        }

        // unmount regardless of the flush outcome; logging stays enabled so
        // capture resumes by itself after a successful remount
        volume.unmount();
        self.initialized = false;

        info!("system in safe state, waiting for power restoration");
    }

    fn handle_power_restoration<V: VolumeHost>(&mut self, volume: &mut V) -> bool {
        self.card_present = volume.card_present();
        if !self.card_present {
            warn!("no storage card detected after power restoration");
            return false;
        }

        if !self.mount_card(volume) {
            error!("failed to remount volume after power restoration");
            return false;
        }

        self.write_protected = volume.write_protected();
        if self.write_protected {
            warn!("card is write-protected after power restoration, logging blocked");
            return false;
        }

        // flush always empties the buffer before unmount, so any leftover
        // cursor state is stale by construction
        self.buffer.clear();
        self.settings_need_reload = true;

        info!("volume remounted, logging will resume automatically");
        true
    }

    fn take_measurement<D: MeterDriver, C: WallClock>(
        &self,
        access: &mut RegisterAccess<D>,
        accumulator: &EnergyAccumulator,
        clock: &C,
    ) -> Measurement {
        let mut fields = BoundedVec::new();

        for field in &self.fields {
            let sample = match access.read_register(&field.name) {
                Ok(value) => FieldSample { value, valid: true },
                Err(_) => {
                    warn!("failed to read log field {}", field.name);
                    FieldSample {
                        value: 0.0,
                        valid: false,
                    }
                }
            };
            // cannot overflow: the field list is capped at MAX_LOG_FIELDS
            let _ = fields.push(sample);
        }

        Measurement {
            fields,
            timestamp: clock.unix_time(),
            kwh: accumulator.accumulated_energy(0),
        }
    }

    fn log_measurement<D: MeterDriver, V: VolumeHost, C: WallClock>(
        &mut self,
        access: &mut RegisterAccess<D>,
        accumulator: &EnergyAccumulator,
        volume: &V,
        clock: &C,
    ) -> bool {
        if self.buffer_capacity == 0 {
            error!("buffer not allocated");
            return false;
        }

        let measurement = self.take_measurement(access, accumulator, clock);
        self.buffer.push(measurement);
        self.log_count += 1;

        if self.buffer.len() >= self.buffer_capacity {
            info!("buffer full ({} measurements), flushing", self.buffer.len());
            return self.flush_buffer(volume);
        }

        true
    }
}

impl Default for DataLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_is_clamped() {
        let mut logger = DataLogger::new();
        logger.set_buffer_size(0);
        assert_eq!(logger.buffer_capacity(), 1);
        logger.set_buffer_size(5000);
        assert_eq!(logger.buffer_capacity(), 1000);
        logger.set_buffer_size(60);
        assert_eq!(logger.buffer_capacity(), 60);
    }

    #[test]
    fn new_logger_starts_uninitialized() {
        let logger = DataLogger::new();
        assert_eq!(logger.state(), LoggerState::Uninitialized);
        assert_eq!(logger.buffer_len(), 0);
        assert_eq!(logger.buffer_capacity(), 60);
    }
}
