// databasebackup/src/backup/naming.rs
use chrono::{NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

/// Zero-padded, most significant field first, so names sort chronologically.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H%M%S";
pub const ARCHIVE_EXT: &str = "tar.gz";

/// Run timestamps are UTC so names never repeat or reorder across DST changes.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Always returns the same instant.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Names derived for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNames {
    /// Directory the dump tool writes into.
    pub output_dir: PathBuf,
    /// Archive path without its extension.
    pub archive_base: PathBuf,
    /// Object key in the bucket.
    pub remote_key: String,
}

impl BackupNames {
    pub fn archive_path(&self) -> PathBuf {
        archive_path_for(&self.archive_base)
    }
}

#[derive(Debug, Clone)]
pub struct NamingPolicy {
    base_output_dir: PathBuf,
}

impl NamingPolicy {
    pub fn new(base_output_dir: impl Into<PathBuf>) -> Self {
        NamingPolicy { base_output_dir: base_output_dir.into() }
    }

    pub fn stamp(captured_at: &NaiveDateTime) -> String {
        captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn derive(&self, database: &str, captured_at: &NaiveDateTime) -> BackupNames {
        let stem = format!("{}_{}", database, Self::stamp(captured_at));
        BackupNames {
            output_dir: self.base_output_dir.join(&stem),
            archive_base: self.base_output_dir.join(&stem),
            remote_key: format!("{}.{}", stem, ARCHIVE_EXT),
        }
    }
}

/// `{archive_base}.tar.gz`. Appends rather than replaces, so a stem like
/// `orders.v2_...` keeps its dot.
pub fn archive_path_for(archive_base: &Path) -> PathBuf {
    let mut os = archive_base.as_os_str().to_owned();
    os.push(".");
    os.push(ARCHIVE_EXT);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap()
    }

    #[test]
    fn test_derive_names_for_orders() {
        let names = NamingPolicy::new(".").derive("orders", &at(2024, 1, 2, 3, 4, 5));
        assert_eq!(names.output_dir, PathBuf::from("./orders_2024_01_02_030405"));
        assert_eq!(names.archive_base, PathBuf::from("./orders_2024_01_02_030405"));
        assert_eq!(names.archive_path(), PathBuf::from("./orders_2024_01_02_030405.tar.gz"));
        assert_eq!(names.remote_key, "orders_2024_01_02_030405.tar.gz");
    }

    #[test]
    fn test_derive_is_pure() {
        let policy = NamingPolicy::new("/var/backups");
        let ts = at(2023, 12, 31, 23, 59, 59);
        assert_eq!(policy.derive("orders", &ts), policy.derive("orders", &ts));
    }

    #[test]
    fn test_distinct_timestamps_never_collide() {
        let policy = NamingPolicy::new("/var/backups");
        let first = policy.derive("orders", &at(2024, 1, 2, 3, 4, 5));
        let second = policy.derive("orders", &at(2024, 1, 2, 3, 4, 6));
        assert_ne!(first.output_dir, second.output_dir);
        assert_ne!(first.archive_path(), second.archive_path());
        assert_ne!(first.remote_key, second.remote_key);
    }

    #[test]
    fn test_stamps_sort_chronologically() {
        let instants = [
            at(2023, 12, 31, 23, 59, 59),
            at(2024, 1, 2, 3, 4, 5),
            at(2024, 1, 2, 10, 0, 0),
            at(2024, 10, 1, 0, 0, 0),
        ];
        let stamps: Vec<String> = instants.iter().map(NamingPolicy::stamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn test_archive_extension_is_appended() {
        let names = NamingPolicy::new("/b").derive("orders.v2", &at(2024, 1, 2, 3, 4, 5));
        assert_eq!(names.archive_path(), PathBuf::from("/b/orders.v2_2024_01_02_030405.tar.gz"));
    }

    #[test]
    fn test_system_clock_tracks_utc() {
        let before = Utc::now().naive_utc();
        let now = SystemClock.now();
        let after = Utc::now().naive_utc();
        assert!(before <= now && now <= after);
    }

    #[test]
    fn test_fixed_clock_is_stable() {
        let clock = FixedClock(at(2024, 1, 2, 3, 4, 5));
        assert_eq!(clock.now(), clock.now());
    }
}
