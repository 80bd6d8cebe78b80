//! Boot mode selection via a persistent flag file.
//!
//! The flag's existence alone carries the state: present means the next
//! boot runs the sync drain instead of the radar. A reboot is the only way
//! to move between the two modes, so the flag is checked exactly once, at
//! startup, before any radio comes up.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Scan, serve the local UI, buffer snapshots.
    Radar,
    /// Join the home network, drain the log, reboot.
    Sync,
}

/// Existence-only marker file, distinct from the log file.
pub struct ModeFlag {
    path: PathBuf,
}

impl ModeFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Decide the mode for this boot cycle. Called once at startup.
    pub fn boot_mode(&self) -> BootMode {
        if self.path.exists() {
            BootMode::Sync
        } else {
            BootMode::Radar
        }
    }

    /// Arm the flag so the next boot enters sync mode. A single byte is
    /// written but never read back.
    pub fn arm(&self) -> Result<()> {
        fs::write(&self.path, b"1")
            .with_context(|| format!("writing sync flag {}", self.path.display()))
    }

    /// Remove the flag. Missing flag is a no-op, so the sync tail can call
    /// this unconditionally.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing sync flag {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_flag_means_radar() {
        let dir = TempDir::new().unwrap();
        let flag = ModeFlag::new(dir.path().join("do_sync"));
        assert_eq!(flag.boot_mode(), BootMode::Radar);
    }

    #[test]
    fn test_armed_flag_means_sync() {
        let dir = TempDir::new().unwrap();
        let flag = ModeFlag::new(dir.path().join("do_sync"));
        flag.arm().unwrap();
        assert_eq!(flag.boot_mode(), BootMode::Sync);
    }

    #[test]
    fn test_clear_returns_to_radar_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let flag = ModeFlag::new(dir.path().join("do_sync"));
        flag.arm().unwrap();
        flag.clear().unwrap();
        assert_eq!(flag.boot_mode(), BootMode::Radar);
        flag.clear().unwrap();
    }

    #[test]
    fn test_arming_twice_keeps_a_single_flag() {
        let dir = TempDir::new().unwrap();
        let flag = ModeFlag::new(dir.path().join("do_sync"));
        flag.arm().unwrap();
        flag.arm().unwrap();
        assert_eq!(flag.boot_mode(), BootMode::Sync);
    }
}
