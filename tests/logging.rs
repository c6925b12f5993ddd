mod common;

use std::fs;

use common::{scratch_dir, FixedClock, MockDriver, MockVolume};
use wattmeter_core::config::SettingsManager;
use wattmeter_core::energy::EnergyAccumulator;
use wattmeter_core::logger::{DataLogger, LoggerState, MountStrategy};
use wattmeter_core::meter::RegisterAccess;

const URMS_A: u16 = 0xD9;
const IRMS_A: u16 = 0xDD;
const FREQ: u16 = 0xF8;

// 2023-11-14 22:13:20 UTC
const T0: i64 = 1_700_000_000;

struct Rig {
    access: RegisterAccess<MockDriver>,
    logger: DataLogger,
    accumulator: EnergyAccumulator,
    settings: SettingsManager,
    volume: MockVolume,
    clock: FixedClock,
}

fn rig(tag: &str) -> Rig {
    let mut driver = MockDriver::new();
    driver.set(URMS_A, 23_000); // 230.00 V
    driver.set(IRMS_A, 1_500); // 1.500 A
    driver.set(FREQ, 5_000); // 50.00 Hz

    let access = RegisterAccess::new(driver);
    let mut logger = DataLogger::new();
    let volume = MockVolume::new(scratch_dir(tag));
    let clock = FixedClock::new(T0);

    logger.set_log_fields("UrmsA,IrmsA,Freq", &access);
    logger.set_buffer_size(3);
    logger.set_logging_interval(1000);

    Rig {
        access,
        logger,
        accumulator: EnergyAccumulator::new(),
        settings: SettingsManager::new(),
        volume,
        clock,
    }
}

impl Rig {
    fn mount_and_enable(&mut self) {
        assert!(self.logger.begin(&mut self.volume));
        self.logger.enable_logging(true, &self.volume);
        assert_eq!(self.logger.state(), LoggerState::MountedLogging);
    }

    fn tick(&mut self, now_ms: u64) {
        self.logger.update(
            now_ms,
            &mut self.access,
            &self.accumulator,
            &mut self.settings,
            &mut self.volume,
            &self.clock,
        );
    }

    fn day_file(&self, year: i32, month: u32, day: u32) -> String {
        let path = self
            .volume
            .root_path()
            .join("data")
            .join(format!("{year:04}"))
            .join(format!("{month:02}"))
            .join(format!("{day:02}.csv"));
        fs::read_to_string(path).unwrap()
    }
}

#[test]
fn buffer_fills_then_flushes_to_a_dated_file() {
    let mut rig = rig("fill-flush");
    rig.mount_and_enable();

    rig.tick(1000);
    rig.tick(2000);
    assert_eq!(rig.logger.buffer_len(), 2);

    // third capture reaches capacity and flushes synchronously
    rig.tick(3000);
    assert_eq!(rig.logger.buffer_len(), 0);
    assert_eq!(rig.logger.log_count(), 3);

    let content = rig.day_file(2023, 11, 14);
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "Phase A Voltage RMS,Phase A Current RMS,Line Frequency,kWh,UnixTime"
    );
    assert_eq!(lines[1], "230.000,1.500,50.00,0.000,1700000000");
}

#[test]
fn captures_respect_the_logging_interval() {
    let mut rig = rig("interval");
    rig.mount_and_enable();

    rig.tick(999);
    assert_eq!(rig.logger.buffer_len(), 0);
    rig.tick(1000);
    assert_eq!(rig.logger.buffer_len(), 1);
    // interval measured from the last capture
    rig.tick(1500);
    assert_eq!(rig.logger.buffer_len(), 1);
    rig.tick(2000);
    assert_eq!(rig.logger.buffer_len(), 2);
}

#[test]
fn invalid_fields_surface_as_nan() {
    let mut rig = rig("invalid-fields");
    // unknown and write-only names stay configured but never read
    rig.logger
        .set_log_fields("UrmsA,Bogus,SoftReset", &rig.access);
    rig.logger.set_buffer_size(1);
    rig.mount_and_enable();

    rig.tick(1000);

    let content = rig.day_file(2023, 11, 14);
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "Phase A Voltage RMS,Bogus,Soft Reset,kWh,UnixTime");
    assert_eq!(lines[1], "230.000,NaN,NaN,0.000,1700000000");
}

#[test]
fn no_capture_without_a_valid_clock() {
    let mut rig = rig("invalid-clock");
    rig.mount_and_enable();
    rig.clock.valid = false;

    rig.tick(1000);
    rig.tick(2000);
    assert_eq!(rig.logger.buffer_len(), 0);
}

#[test]
fn flush_on_an_empty_buffer_is_a_no_op() {
    let mut rig = rig("empty-flush");
    rig.mount_and_enable();

    assert!(rig.logger.flush_buffer(&rig.volume));
    assert_eq!(rig.logger.buffer_len(), 0);
}

#[test]
fn reconfiguration_is_refused_while_data_is_buffered() {
    let mut rig = rig("reconfig-refused");
    rig.mount_and_enable();

    rig.tick(1000);
    assert_eq!(rig.logger.buffer_len(), 1);

    assert!(!rig.logger.set_log_fields("Freq", &rig.access));
    assert!(!rig.logger.set_buffer_size(10));
    assert_eq!(rig.logger.log_fields(), "UrmsA,IrmsA,Freq");
    assert_eq!(rig.logger.buffer_capacity(), 3);

    // after a flush both changes go through
    assert!(rig.logger.flush_buffer(&rig.volume));
    assert!(rig.logger.set_log_fields("Freq", &rig.access));
    assert!(rig.logger.set_buffer_size(10));
    assert_eq!(rig.logger.log_fields(), "Freq");
    assert_eq!(rig.logger.buffer_capacity(), 10);
}

#[test]
fn buffer_spanning_midnight_rolls_to_the_next_file() {
    let mut rig = rig("midnight");
    rig.logger.set_buffer_size(2);
    rig.mount_and_enable();

    // 23:59:59 on 2023-11-14
    rig.clock.unix.set(1_700_006_399);
    rig.tick(1000);

    // 00:00:01 on 2023-11-15; second capture fills the buffer and flushes
    rig.clock.unix.set(1_700_006_401);
    rig.tick(2000);
    assert_eq!(rig.logger.buffer_len(), 0);

    let first_day = rig.day_file(2023, 11, 14);
    let second_day = rig.day_file(2023, 11, 15);
    assert_eq!(first_day.lines().count(), 2);
    assert_eq!(second_day.lines().count(), 2);
    assert!(first_day.ends_with("1700006399\n"));
    assert!(second_day.ends_with("1700006401\n"));
}

#[test]
fn power_loss_runs_the_emergency_sequence_exactly_once() {
    let mut rig = rig("power-loss");
    rig.mount_and_enable();

    rig.tick(1000);
    assert_eq!(rig.logger.buffer_len(), 1);

    // line voltage collapses below the 100 V threshold
    rig.access.driver_mut().set(URMS_A, 5_000);
    rig.tick(1100);

    assert_eq!(rig.logger.state(), LoggerState::PowerLost);
    assert_eq!(rig.logger.buffer_len(), 0);
    assert_eq!(rig.volume.unmount_count, 1);

    // buffered capture plus the final emergency capture made it to disk
    let content = rig.day_file(2023, 11, 14);
    assert_eq!(content.lines().count(), 3);

    // energy totals were persisted on the way down
    assert!(rig.volume.root_path().join("settings.bin").exists());

    // staying below the threshold does not repeat the sequence
    rig.tick(1200);
    rig.tick(1300);
    assert_eq!(rig.volume.unmount_count, 1);
    assert_eq!(rig.logger.state(), LoggerState::PowerLost);
}

#[test]
fn power_restoration_remounts_and_resumes_logging() {
    let mut rig = rig("power-restore");
    rig.mount_and_enable();

    rig.access.driver_mut().set(URMS_A, 5_000);
    rig.tick(1000);
    assert_eq!(rig.logger.state(), LoggerState::PowerLost);
    let mounts_before = rig.volume.mount_attempts.len();

    rig.access.driver_mut().set(URMS_A, 23_000);
    rig.tick(1100);

    assert_eq!(rig.logger.state(), LoggerState::MountedLogging);
    assert!(rig.volume.mount_attempts.len() > mounts_before);
    assert!(rig.logger.settings_need_reload());
    assert!(!rig.logger.settings_need_reload());

    // capture resumed within the same tick and keeps its cadence
    assert_eq!(rig.logger.buffer_len(), 1);
    rig.tick(2000);
    assert_eq!(rig.logger.buffer_len(), 2);
}

#[test]
fn mount_strategies_are_tried_in_order() {
    let mut rig = rig("mount-ladder");
    rig.volume.fail_mounts = 2;

    assert!(rig.logger.begin(&mut rig.volume));
    assert_eq!(
        rig.volume.mount_attempts,
        vec![
            MountStrategy::ReducedClock,
            MountStrategy::BusReinit,
            MountStrategy::DefaultClock,
        ]
    );
}

#[test]
fn card_removal_stops_logging() {
    let mut rig = rig("card-removal");
    rig.mount_and_enable();

    rig.volume.present = false;
    rig.tick(1000);

    assert_eq!(rig.logger.state(), LoggerState::Uninitialized);
    assert!(!rig.logger.is_logging_enabled());
    assert_eq!(rig.volume.unmount_count, 1);
}

#[test]
fn write_protection_blocks_logging() {
    let mut rig = rig("write-protect");
    rig.mount_and_enable();

    rig.volume.protected = true;
    rig.tick(1000);
    assert_eq!(rig.logger.state(), LoggerState::WriteProtected);

    rig.tick(2000);
    assert_eq!(rig.logger.buffer_len(), 0);

    // cannot re-enable while protected
    rig.logger.enable_logging(true, &rig.volume);
    assert!(!rig.logger.is_logging_enabled());
}

#[test]
fn disabling_logging_flushes_first() {
    let mut rig = rig("disable-flushes");
    rig.mount_and_enable();

    rig.tick(1000);
    assert_eq!(rig.logger.buffer_len(), 1);

    rig.logger.enable_logging(false, &rig.volume);
    assert_eq!(rig.logger.buffer_len(), 0);
    assert_eq!(rig.logger.state(), LoggerState::MountedIdle);

    let content = rig.day_file(2023, 11, 14);
    assert_eq!(content.lines().count(), 2);
}
