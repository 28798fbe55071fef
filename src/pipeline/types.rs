//! 流水线共享类型
//!
//! Opportunity 由扫描器创建后不可变；Improvement 的验证报告由验证器附加，
//! 终态由应用器写入；CycleResult 只在一次编排调用内存在。

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::quality::{FileQuality, Issue, Priority, Severity};

/// 一个子机会：同类问题的分组 + 优先级档位 + 预估收益
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubOpportunity {
    pub kind: String,
    pub priority: Priority,
    /// 预估质量收益（咨询值，权威增量以验证报告为准）
    pub estimated_gain: f64,
    pub issues: Vec<Issue>,
}

/// 改进机会：低于质量阈值的文件及其问题清单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub file: PathBuf,
    /// 扫描时读取的原始内容（生成器的输入基线）
    pub content: String,
    /// 扫描时的基线质量分
    pub score: f64,
    /// 子机会中的最高档位；无子机会时 Medium
    pub priority: Priority,
    pub issues: Vec<Issue>,
    pub opportunities: Vec<SubOpportunity>,
}

/// 针对一个机会生成的重写候选
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Improvement {
    pub id: Uuid,
    pub file: PathBuf,
    pub original: String,
    pub improved: String,
    /// 生成期的临时收益估计（重打分 - 基线），非权威
    pub estimated_gain: f64,
    pub validation: Option<ValidationReport>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Improvement {
    /// 生成失败时的占位 Improvement（供应商错误不向上抛，由编排器按跳过处理）
    pub fn failed(file: PathBuf, original: String, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            original,
            improved: String::new(),
            estimated_gain: 0.0,
            validation: None,
            success: false,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    /// 是否已验证通过（应用器的前置门槛）
    pub fn is_validated(&self) -> bool {
        self.validation.as_ref().map(|v| v.passed).unwrap_or(false)
    }
}

/// 单文件的验证明细（多文件改进时打包进聚合报告）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidation {
    pub file: PathBuf,
    pub score_before: f64,
    pub score_after: f64,
    pub resolved_issues: Vec<String>,
    pub introduced_issues: Vec<String>,
}

/// 验证报告：改动前后对比的最终裁决，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub score_before: f64,
    pub score_after: f64,
    /// 权威质量增量 = score_after - score_before
    pub improvement: f64,
    pub resolved_issues: Vec<String>,
    pub introduced_issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub reason: String,
    pub files: Vec<FileValidation>,
}

/// 备份引用：可交给 BackupStore::restore 还原
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRef {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// 应用结果（终态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub file: PathBuf,
    pub dry_run: bool,
    /// dry_run=false 且 success=true 时必非空
    pub backup: Option<BackupRef>,
    pub success: bool,
    pub error: Option<String>,
}

/// 单个机会在一次循环内的归宿
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Applied,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub status: OutcomeStatus,
    /// 仅 Applied 时为验证报告的权威增量
    pub quality_gain: Option<f64>,
    pub error: Option<String>,
}

/// 一次循环的聚合结果；不变量：applied <= attempted <= scanned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub success: bool,
    pub scanned: usize,
    pub attempted: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<FileOutcome>,
    pub error: Option<String>,
}

impl CycleResult {
    pub fn structural_failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            scanned: 0,
            attempted: 0,
            applied: 0,
            skipped: 0,
            failed: 0,
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}
