use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::backup::MAX_BACKUPS;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Creates the backup directory if it does not exist yet
fn ensure_backup_dir(backup_dir: &Path) -> Result<()> {
    if !backup_dir.exists() {
        fs::create_dir_all(backup_dir)
            .with_context(|| format!("create backup directory {}", backup_dir.display()))?;
        log::info!("Created backup directory: {}", backup_dir.display());
    }
    Ok(())
}

/// Copies the database file into `backup_dir`
///
/// The copy is named `YYYYMMDD_HHMMSS_<db file name>`. Only the newest
/// [`MAX_BACKUPS`] copies are kept.
///
/// # Returns
///
/// Path of the created backup
pub fn create_backup(db_path: &str, backup_dir: &Path) -> Result<PathBuf> {
    ensure_backup_dir(backup_dir)?;

    let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
    let db_name = Path::new(db_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("kiuf_bot.db");
    let backup_path = backup_dir.join(format!("{}_{}", timestamp, db_name));

    fs::copy(db_path, &backup_path).with_context(|| format!("copy {} to {}", db_path, backup_path.display()))?;
    log::info!("Created backup: {}", backup_path.display());

    cleanup_old_backups(backup_dir, MAX_BACKUPS)?;

    Ok(backup_path)
}

/// Timestamp encoded in a backup file name, if the name has the backup layout
fn backup_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let file_name = path.file_name()?.to_str()?;
    let stamp = file_name.get(0..15)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Lists backups in `backup_dir`, newest first
pub fn list_backups(backup_dir: &Path) -> Result<Vec<(PathBuf, NaiveDateTime)>> {
    let mut backups = Vec::new();

    if backup_dir.is_dir() {
        for entry in fs::read_dir(backup_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(created) = backup_timestamp(&path) {
                backups.push((path, created));
            }
        }
    }

    backups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(backups)
}

/// Removes old backups, keeping only the newest `keep`
fn cleanup_old_backups(backup_dir: &Path, keep: usize) -> Result<()> {
    let backups = list_backups(backup_dir)?;

    for (path, _) in backups.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to remove old backup {}: {}", path.display(), e);
        } else {
            log::info!("Removed old backup: {}", path.display());
        }
    }

    Ok(())
}

/// File size in megabytes, for backup captions
pub fn file_size_mb(path: &Path) -> Result<f64> {
    let bytes = fs::metadata(path)?.len();
    Ok(bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backup_copies_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("kiuf_bot.db");
        fs::write(&db_path, b"sqlite bytes").unwrap();
        let backup_dir = dir.path().join("backups");

        let backup = create_backup(db_path.to_str().unwrap(), &backup_dir).unwrap();

        assert!(backup.starts_with(&backup_dir));
        assert!(backup.to_str().unwrap().ends_with("_kiuf_bot.db"));
        assert_eq!(fs::read(&backup).unwrap(), b"sqlite bytes");
        assert_eq!(list_backups(&backup_dir).unwrap().len(), 1);
    }

    #[test]
    fn test_create_backup_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.db");
        assert!(create_backup(missing.to_str().unwrap(), &dir.path().join("backups")).is_err());
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            let name = format!("202501{:02}_120000_kiuf_bot.db", day);
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"not a backup").unwrap();

        cleanup_old_backups(dir.path(), 2).unwrap();

        let left: Vec<String> = list_backups(dir.path())
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["20250105_120000_kiuf_bot.db", "20250104_120000_kiuf_bot.db"]);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_file_size_mb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, vec![0u8; 1024 * 1024]).unwrap();
        assert!((file_size_mb(&path).unwrap() - 1.0).abs() < f64::EPSILON);
    }
}
