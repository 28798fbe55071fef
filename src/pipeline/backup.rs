//! 持久备份存储：真实写入前必须先落盘的安全网
//!
//! 默认实现把 `<文件名>.backup.<毫秒时间戳>` 写在原文件旁边，
//! 也可指定统一备份目录。失败的应用永不删除备份（留给人工恢复）。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::pipeline::error::PipelineError;
use crate::pipeline::types::BackupRef;

/// 备份存储契约：save 先于写入，restore 可逐字节还原
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn save(&self, file: &Path, content: &str) -> Result<BackupRef, PipelineError>;
    async fn restore(&self, backup: &BackupRef) -> Result<String, PipelineError>;
}

/// 文件系统备份存储
#[derive(Debug, Default)]
pub struct FileBackupStore {
    /// 未设置时备份写在原文件旁
    dir: Option<PathBuf>,
}

impl FileBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    fn backup_path(&self, file: &Path, millis: i64) -> PathBuf {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let backup_name = format!("{}.backup.{}", name, millis);

        match &self.dir {
            Some(dir) => dir.join(backup_name),
            None => file.with_file_name(backup_name),
        }
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn save(&self, file: &Path, content: &str) -> Result<BackupRef, PipelineError> {
        let created_at = Utc::now();
        let path = self.backup_path(file, created_at.timestamp_millis());

        if let Some(dir) = &self.dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::Backup(format!("create backup dir: {}", e)))?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| PipelineError::Backup(format!("write '{}': {}", path.display(), e)))?;

        tracing::info!(backup = %path.display(), "backup created");
        Ok(BackupRef { path, created_at })
    }

    async fn restore(&self, backup: &BackupRef) -> Result<String, PipelineError> {
        tokio::fs::read_to_string(&backup.path)
            .await
            .map_err(|e| {
                PipelineError::Backup(format!("read '{}': {}", backup.path.display(), e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.rs");
        let content = "fn main() {}\n";

        let store = FileBackupStore::new();
        let backup = store.save(&file, content).await.unwrap();

        assert!(backup.path.starts_with(dir.path()));
        let restored = store.restore(&backup).await.unwrap();
        assert_eq!(restored, content);
    }

    #[tokio::test]
    async fn test_backup_into_dedicated_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        let file = dir.path().join("sample.rs");

        let store = FileBackupStore::with_dir(&backups);
        let backup = store.save(&file, "x").await.unwrap();

        assert!(backup.path.starts_with(&backups));
        assert_eq!(store.restore(&backup).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_restore_missing_backup_errors() {
        let store = FileBackupStore::new();
        let missing = BackupRef {
            path: PathBuf::from("/nonexistent/mender.backup.0"),
            created_at: Utc::now(),
        };
        assert!(matches!(
            store.restore(&missing).await,
            Err(PipelineError::Backup(_))
        ));
    }
}
