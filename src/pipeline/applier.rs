//! 改进应用器：已验证改进的模拟或落盘
//!
//! 单文件状态机：Validated → (dry_run) Simulated；
//! 或 → BackedUp → Written；或 → WriteFailed（备份保留，供人工恢复）。
//! 备份是前置条件：备份失败则中止，写入不会发生。
//! 同一路径的真实应用由 per-path 异步锁串行化。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::pipeline::backup::BackupStore;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{ApplyResult, Improvement};

/// 应用选项；默认真实写入 + 强制备份
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub backup: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup: true,
        }
    }
}

pub struct ImprovementApplier {
    backup: Arc<dyn BackupStore>,
    allowed_root: PathBuf,
    max_file_size_kb: u64,
    /// 路径级写锁：同一文件不允许并发应用
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ImprovementApplier {
    pub fn new(backup: Arc<dyn BackupStore>, allowed_root: impl AsRef<Path>) -> Self {
        Self {
            backup,
            allowed_root: allowed_root.as_ref().to_path_buf(),
            max_file_size_kb: 1024,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_file_size_kb(mut self, kb: u64) -> Self {
        self.max_file_size_kb = kb;
        self
    }

    /// 应用（或模拟）一个改进；永不返回 Err，所有失败以 ApplyResult 表达
    pub async fn apply(&self, improvement: &Improvement, opts: &ApplyOptions) -> ApplyResult {
        // 未生成成功或未通过验证的改进一律拒绝，不产生副作用
        if !improvement.success {
            return Self::refused(improvement, opts, "generation did not succeed");
        }
        if !improvement.is_validated() {
            return Self::refused(improvement, opts, "improvement is not validated");
        }

        let path = match self.validate_path(&improvement.file) {
            Ok(p) => p,
            Err(e) => return Self::refused(improvement, opts, e.to_string()),
        };

        if improvement.improved.len() as u64 > self.max_file_size_kb * 1024 {
            return Self::refused(
                improvement,
                opts,
                format!("generated content exceeds {} KiB limit", self.max_file_size_kb),
            );
        }

        if opts.dry_run {
            tracing::info!(file = %path.display(), "[dry run] would apply improvement");
            return ApplyResult {
                file: improvement.file.clone(),
                dry_run: true,
                backup: None,
                success: true,
                error: None,
            };
        }

        // 真实写入必须有备份，否则拒绝（保证 成功 ⇒ 有备份引用 的不变量）
        if !opts.backup {
            return Self::refused(
                improvement,
                opts,
                "backup is mandatory for non-dry-run applies",
            );
        }

        let lock = self.path_lock(&path).await;
        let _guard = lock.lock().await;

        // 备份落盘当前内容（而非扫描期快照），覆盖扫描后外部改动
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return Self::refused(
                    improvement,
                    opts,
                    format!("cannot read current content: {}", e),
                )
            }
        };

        let backup_ref = match self.backup.save(&path, &current).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "backup failed; apply aborted");
                return Self::refused(improvement, opts, format!("backup failed: {}", e));
            }
        };

        match tokio::fs::write(&path, &improvement.improved).await {
            Ok(()) => {
                tracing::info!(file = %path.display(), "improvement applied");
                ApplyResult {
                    file: improvement.file.clone(),
                    dry_run: false,
                    backup: Some(backup_ref),
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                // 写失败不删备份
                tracing::warn!(file = %path.display(), error = %e, backup = %backup_ref.path.display(), "write failed; backup retained");
                ApplyResult {
                    file: improvement.file.clone(),
                    dry_run: false,
                    backup: Some(backup_ref),
                    success: false,
                    error: Some(format!("write failed: {}", e)),
                }
            }
        }
    }

    fn refused(improvement: &Improvement, opts: &ApplyOptions, error: impl Into<String>) -> ApplyResult {
        ApplyResult {
            file: improvement.file.clone(),
            dry_run: opts.dry_run,
            backup: None,
            success: false,
            error: Some(error.into()),
        }
    }

    /// 路径约束：规范化后必须落在允许的根目录内
    fn validate_path(&self, file: &Path) -> Result<PathBuf, PipelineError> {
        let absolute = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.allowed_root.join(file)
        };

        let canonical = absolute.canonicalize().unwrap_or(absolute);
        let allowed = self
            .allowed_root
            .canonicalize()
            .unwrap_or_else(|_| self.allowed_root.clone());

        if !canonical.starts_with(&allowed) {
            return Err(PipelineError::PathEscape(format!(
                "'{}' is outside allowed root",
                file.display()
            )));
        }

        Ok(canonical)
    }

    async fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backup::FileBackupStore;
    use crate::pipeline::types::{BackupRef, ValidationReport};
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    fn passing_report() -> ValidationReport {
        ValidationReport {
            passed: true,
            score_before: 0.5,
            score_after: 0.9,
            improvement: 0.4,
            resolved_issues: vec!["long-function".to_string()],
            introduced_issues: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
            reason: "Improvement validated".to_string(),
            files: Vec::new(),
        }
    }

    fn improvement(file: PathBuf, original: &str, improved: &str, validated: bool) -> Improvement {
        Improvement {
            id: Uuid::new_v4(),
            file,
            original: original.to_string(),
            improved: improved.to_string(),
            estimated_gain: 0.1,
            validation: validated.then(passing_report),
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn applier(root: &Path) -> ImprovementApplier {
        ImprovementApplier::new(Arc::new(FileBackupStore::new()), root)
    }

    #[tokio::test]
    async fn test_refuses_unvalidated_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "old").unwrap();

        let imp = improvement(file.clone(), "old", "new", false);
        let result = applier(dir.path()).apply(&imp, &ApplyOptions::default()).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("not validated"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_dry_run_is_idempotent_and_mutation_free() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "old").unwrap();

        let imp = improvement(file.clone(), "old", "new", true);
        let a = applier(dir.path());
        let opts = ApplyOptions {
            dry_run: true,
            backup: true,
        };

        for _ in 0..3 {
            let result = a.apply(&imp, &opts).await;
            assert!(result.success);
            assert!(result.dry_run);
            assert!(result.backup.is_none());
        }
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old");
        // 没有备份文件产生
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_apply_writes_and_backup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "old content\n").unwrap();

        let imp = improvement(file.clone(), "old content\n", "new content\n", true);
        let result = applier(dir.path()).apply(&imp, &ApplyOptions::default()).await;

        assert!(result.success, "{:?}", result.error);
        assert!(!result.dry_run);
        let backup = result.backup.expect("backup must exist for real applies");

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new content\n");
        let restored = FileBackupStore::new().restore(&backup).await.unwrap();
        assert_eq!(restored, "old content\n");
    }

    #[tokio::test]
    async fn test_backup_disabled_refuses_real_apply() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "old").unwrap();

        let imp = improvement(file.clone(), "old", "new", true);
        let opts = ApplyOptions {
            dry_run: false,
            backup: false,
        };
        let result = applier(dir.path()).apply(&imp, &opts).await;

        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_path_escape_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("a.rs");
        std::fs::write(&file, "old").unwrap();

        let imp = improvement(file.clone(), "old", "new", true);
        let result = applier(dir.path()).apply(&imp, &ApplyOptions::default()).await;

        assert!(!result.success);
        let error = result.error.as_deref().unwrap_or("");
        assert!(error.contains("Path escape"));
        assert!(error.contains("outside allowed root"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old");
    }

    /// 只会失败的备份存储，用于验证「备份失败则不写入」
    struct FailingBackup;

    #[async_trait]
    impl BackupStore for FailingBackup {
        async fn save(&self, _file: &Path, _content: &str) -> Result<BackupRef, PipelineError> {
            Err(PipelineError::Backup("disk full".to_string()))
        }

        async fn restore(&self, _backup: &BackupRef) -> Result<String, PipelineError> {
            Err(PipelineError::Backup("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backup_failure_aborts_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "old").unwrap();

        let imp = improvement(file.clone(), "old", "new", true);
        let a = ImprovementApplier::new(Arc::new(FailingBackup), dir.path());
        let result = a.apply(&imp, &ApplyOptions::default()).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("backup failed"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old");
    }

    /// 记录每次备份内容的存储；save 中途让出调度，拉大竞态窗口
    struct RecordingBackup {
        snapshots: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BackupStore for RecordingBackup {
        async fn save(&self, _file: &Path, content: &str) -> Result<BackupRef, PipelineError> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.snapshots.lock().await.push(content.to_string());
            Ok(BackupRef {
                path: PathBuf::from("recorded"),
                created_at: Utc::now(),
            })
        }

        async fn restore(&self, _backup: &BackupRef) -> Result<String, PipelineError> {
            Err(PipelineError::Backup("recording store".to_string()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_applies_to_one_path_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "original\n").unwrap();

        let store = Arc::new(RecordingBackup {
            snapshots: Mutex::new(Vec::new()),
        });
        let applier = Arc::new(ImprovementApplier::new(store.clone(), dir.path()));

        let imp_a = improvement(file.clone(), "original\n", "content a\n", true);
        let imp_b = improvement(file.clone(), "original\n", "content b\n", true);

        let opts = ApplyOptions::default();
        let (ra, rb) = tokio::join!(
            applier.apply(&imp_a, &opts),
            applier.apply(&imp_b, &opts),
        );
        assert!(ra.success && rb.success);

        let final_content = std::fs::read_to_string(&file).unwrap();
        assert!(final_content == "content a\n" || final_content == "content b\n");

        // 串行化下：先到者备份原文，后到者备份先到者写入的完整内容。
        // 若两次应用交叉执行，两个快照都会是原文，中间状态丢失。
        let snapshots = store.snapshots.lock().await;
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().any(|s| s == "original\n"));
        let intermediate = snapshots
            .iter()
            .find(|s| *s != "original\n")
            .expect("second backup must capture the first rewrite");
        assert_ne!(*intermediate, final_content);
    }

    #[tokio::test]
    async fn test_oversized_content_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "old").unwrap();

        let big = "x".repeat(2048);
        let imp = improvement(file.clone(), "old", &big, true);
        let a = applier(dir.path()).with_max_file_size_kb(1);
        let result = a.apply(&imp, &ApplyOptions::default()).await;

        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old");
    }
}
