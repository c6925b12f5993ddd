#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};

use wattmeter_core::logger::{MountStrategy, StorageError, VolumeHost};
use wattmeter_core::meter::driver::MeterDriver;
use wattmeter_core::WallClock;

/// Bus-level simulation of the metering IC: a word of memory per address,
/// with read-clear semantics on the energy accumulator range.
pub struct MockDriver {
    memory: HashMap<u16, u16>,
    read_clear_low: u16,
    read_clear_high: u16,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            memory: HashMap::new(),
            read_clear_low: 0x80,
            read_clear_high: 0x93,
        }
    }

    pub fn set(&mut self, addr: u16, value: u16) {
        self.memory.insert(addr, value);
    }

    pub fn get(&self, addr: u16) -> u16 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }
}

impl MeterDriver for MockDriver {
    type Error = Infallible;

    fn transfer(&mut self, addr: u16, write: Option<u16>) -> Result<u16, Infallible> {
        match write {
            Some(value) => {
                self.memory.insert(addr, value);
                Ok(value)
            }
            None => {
                let value = self.get(addr);
                if (self.read_clear_low..=self.read_clear_high).contains(&addr) {
                    self.memory.insert(addr, 0);
                }
                Ok(value)
            }
        }
    }
}

/// Card slot simulation backed by a scratch directory.
pub struct MockVolume {
    pub present: bool,
    pub protected: bool,
    pub fail_mounts: usize,
    pub mount_attempts: Vec<MountStrategy>,
    pub unmount_count: usize,
    mounted: bool,
    root: PathBuf,
}

impl MockVolume {
    pub fn new(root: PathBuf) -> Self {
        fs::create_dir_all(&root).unwrap();
        Self {
            present: true,
            protected: false,
            fail_mounts: 0,
            mount_attempts: Vec::new(),
            unmount_count: 0,
            mounted: false,
            root,
        }
    }

    /// The backing directory, reachable even while unmounted.
    pub fn root_path(&self) -> &Path {
        &self.root
    }
}

impl VolumeHost for MockVolume {
    fn card_present(&mut self) -> bool {
        self.present
    }

    fn write_protected(&mut self) -> bool {
        self.protected
    }

    fn mount(&mut self, strategy: MountStrategy) -> Result<(), StorageError> {
        self.mount_attempts.push(strategy);
        if !self.present {
            return Err(StorageError::CardAbsent);
        }
        if self.fail_mounts > 0 {
            self.fail_mounts -= 1;
            return Err(StorageError::MountFailed);
        }
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) {
        self.mounted = false;
        self.unmount_count += 1;
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn root(&self) -> Option<&Path> {
        if self.mounted {
            Some(self.root.as_path())
        } else {
            None
        }
    }
}

pub struct FixedClock {
    pub unix: Cell<i64>,
    pub valid: bool,
}

impl FixedClock {
    pub fn new(unix: i64) -> Self {
        Self {
            unix: Cell::new(unix),
            valid: true,
        }
    }
}

impl WallClock for FixedClock {
    fn unix_time(&self) -> i64 {
        self.unix.get()
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Per-test scratch directory, recreated empty on every run.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("wattmeter-core-{}-{tag}", std::process::id()));
    let _ = fs::remove_dir_all(&path);
    fs::create_dir_all(&path).unwrap();
    path
}
