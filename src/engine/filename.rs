//! Database file naming.
//!
//! Everything lives flat in the database directory:
//!
//! | File | Holds |
//! |------|-------|
//! | `CURRENT` | name of the live manifest, newline-terminated |
//! | `LOCK` | advisory exclusive lock while the DB is open |
//! | `MANIFEST-NNNNNN` | version-edit record stream |
//! | `NNNNNN.log` | write-ahead log, one per memtable generation |
//! | `NNNNNN.ldb` | table file (`.sst` accepted when reading) |
//! | `NNNNNN.dbtmp` | transient file, renamed or swept |

use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    Lock,
    Table,
    Manifest,
    Current,
    Temp,
    /// `LOG` / `LOG.old` info logs from other tooling; never live.
    InfoLog,
}

pub fn log_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.log", number))
}

pub fn table_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.ldb", number))
}

/// Legacy table name, consulted when the `.ldb` name is absent.
pub fn sst_table_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.sst", number))
}

pub fn manifest_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("MANIFEST-{:06}", number))
}

pub fn current_file_name(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

pub fn lock_file_name(db_path: &Path) -> PathBuf {
    db_path.join("LOCK")
}

pub fn temp_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.dbtmp", number))
}

/// Classify a bare file name. Returns `None` for names this engine
/// never produces.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        "LOG" | "LOG.old" => return Some((FileType::InfoLog, 0)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        let number: u64 = rest.parse().ok()?;
        return Some((FileType::Manifest, number));
    }
    let dot = name.find('.')?;
    let number: u64 = name[..dot].parse().ok()?;
    match &name[dot..] {
        ".log" => Some((FileType::Log, number)),
        ".ldb" | ".sst" => Some((FileType::Table, number)),
        ".dbtmp" => Some((FileType::Temp, number)),
        _ => None,
    }
}

/// Point `CURRENT` at `MANIFEST-{number}`, atomically via a temp file.
pub fn set_current_file(db_path: &Path, manifest_number: u64) -> Result<()> {
    let contents = format!("MANIFEST-{:06}\n", manifest_number);
    let tmp = temp_file_name(db_path, manifest_number);
    std::fs::write(&tmp, contents)?;
    match std::fs::rename(&tmp, current_file_name(db_path)) {
        Ok(()) => {
            // Make the rename durable.
            if let Ok(dir) = std::fs::File::open(db_path) {
                let _ = dir.sync_all();
            }
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e.into())
        }
    }
}

/// Read `CURRENT`; returns the manifest file name it points at.
pub fn read_current_file(db_path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(current_file_name(db_path))?;
    let name = contents.trim_end_matches('\n');
    if name.is_empty() || contents == name {
        return Err(crate::Error::corruption(
            "CURRENT file does not end with newline",
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let dir = Path::new("/db");
        let cases = [
            (log_file_name(dir, 7), FileType::Log, 7u64),
            (table_file_name(dir, 123456), FileType::Table, 123456),
            (sst_table_file_name(dir, 5), FileType::Table, 5),
            (manifest_file_name(dir, 1), FileType::Manifest, 1),
            (temp_file_name(dir, 99), FileType::Temp, 99),
            (current_file_name(dir), FileType::Current, 0),
            (lock_file_name(dir), FileType::Lock, 0),
        ];
        for (path, file_type, number) in cases {
            let name = path.file_name().unwrap().to_str().unwrap();
            let (parsed_type, parsed_number) = parse_file_name(name).unwrap();
            assert_eq!(parsed_type, file_type, "{name}");
            assert_eq!(parsed_number, number, "{name}");
        }
    }

    #[test]
    fn foreign_names_are_rejected() {
        for name in [
            "",
            "foo",
            "foo-dx-100.log",
            ".log",
            "100",
            "100.",
            "100.lop",
            "MANIFEST",
            "MANIFEST-",
            "MANIFEST-abc",
            "XCURRENT",
        ] {
            assert!(parse_file_name(name).is_none(), "{name:?}");
        }
    }

    #[test]
    fn current_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        set_current_file(dir.path(), 42).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000042");
        // No stray temp files remain.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n != "CURRENT")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
