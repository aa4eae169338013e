//! Timestamped copies of configuration files
//!
//! A backup is taken immediately before every destructive write. Backup
//! failure aborts the write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tokio::fs;

use crate::models::BackupInfo;

/// Prefix shared by every PJSIP backup label
pub const BACKUP_PREFIX: &str = "pjsip_";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Invalid backup name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct BackupService {
    backup_dir: PathBuf,
}

impl BackupService {
    pub fn new(backup_dir: impl AsRef<Path>) -> Self {
        Self {
            backup_dir: backup_dir.as_ref().to_path_buf(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy `config_path` to `<backup_dir>/<label>_<stem>_<timestamp>.conf`.
    ///
    /// Returns `None` when there is nothing to back up yet.
    pub async fn create_backup(
        &self,
        config_path: &Path,
        label: &str,
    ) -> Result<Option<PathBuf>, BackupError> {
        fs::create_dir_all(&self.backup_dir).await?;

        if !fs::try_exists(config_path).await? {
            tracing::warn!("Config file {:?} does not exist, skipping backup", config_path);
            return Ok(None);
        }

        let stem = config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("config");
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let backup_path = self
            .backup_dir
            .join(format!("{}_{}_{}.conf", label, stem, timestamp));

        fs::copy(config_path, &backup_path).await.map_err(|e| {
            tracing::error!("Failed to create backup {:?}: {}", backup_path, e);
            e
        })?;

        tracing::info!("Backup created: {:?}", backup_path);
        Ok(Some(backup_path))
    }

    /// PJSIP backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>, BackupError> {
        if !fs::try_exists(&self.backup_dir).await? {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let mut entries = fs::read_dir(&self.backup_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.starts_with(BACKUP_PREFIX) || !filename.ends_with(".conf") {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let created: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            backups.push(BackupInfo {
                filename,
                size: metadata.len(),
                created,
            });
        }

        backups.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(backups)
    }

    /// Replace `config_path` with the named backup.
    ///
    /// The current file is itself backed up first.
    pub async fn restore_backup(&self, name: &str, config_path: &Path) -> Result<(), BackupError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(BackupError::InvalidName(name.to_string()));
        }

        let backup_path = self.backup_dir.join(name);
        if !fs::try_exists(&backup_path).await? {
            return Err(BackupError::NotFound(name.to_string()));
        }

        self.create_backup(config_path, "pjsip_pre_restore").await?;
        fs::copy(&backup_path, config_path).await?;

        tracing::info!("Restored {:?} from backup {}", config_path, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_backup_copies_file() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("pjsip.conf");
        std::fs::write(&config, "[6001-auth]\nusername=6001\n").unwrap();

        let service = BackupService::new(dir.path().join("backups"));
        let backup = service.create_backup(&config, "pjsip_6001").await.unwrap().unwrap();

        let name = backup.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("pjsip_6001_pjsip_"));
        assert!(name.ends_with(".conf"));
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            "[6001-auth]\nusername=6001\n"
        );
    }

    #[tokio::test]
    async fn test_missing_source_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path().join("backups"));

        let result = service
            .create_backup(&dir.path().join("pjsip.conf"), "pjsip_add")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_unwritable_backup_dir_fails() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("pjsip.conf");
        std::fs::write(&config, "[a]\n").unwrap();

        // A regular file where the backup directory should be
        let blocker = dir.path().join("backups");
        std::fs::write(&blocker, "").unwrap();

        let service = BackupService::new(&blocker);
        let result = service.create_backup(&config, "pjsip_add").await;
        assert!(matches!(result, Err(BackupError::Io(_))));
    }

    #[tokio::test]
    async fn test_list_backups_filters_names() {
        let dir = TempDir::new().unwrap();
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("pjsip_add_pjsip_20260101_120000.conf"), "a").unwrap();
        std::fs::write(backups.join("extensions_20260101_120000.conf"), "b").unwrap();
        std::fs::write(backups.join("pjsip_notes.txt"), "c").unwrap();

        let service = BackupService::new(&backups);
        let listed = service.list_backups().await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "pjsip_add_pjsip_20260101_120000.conf");
        assert_eq!(listed[0].size, 1);
    }

    #[tokio::test]
    async fn test_list_backups_without_directory() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path().join("nowhere"));
        assert!(service.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_backup() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("pjsip.conf");
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(&config, "[current]\n").unwrap();
        std::fs::write(backups.join("pjsip_old_pjsip_20260101_120000.conf"), "[old]\n").unwrap();

        let service = BackupService::new(&backups);
        service
            .restore_backup("pjsip_old_pjsip_20260101_120000.conf", &config)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&config).unwrap(), "[old]\n");
        let listed = service.list_backups().await.unwrap();
        assert!(listed.iter().any(|b| b.filename.starts_with("pjsip_pre_restore_")));
    }

    #[tokio::test]
    async fn test_restore_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());
        let config = dir.path().join("pjsip.conf");

        assert!(matches!(
            service.restore_backup("../etc/passwd", &config).await,
            Err(BackupError::InvalidName(_))
        ));
        assert!(matches!(
            service.restore_backup("pjsip_missing.conf", &config).await,
            Err(BackupError::NotFound(_))
        ));
    }
}
