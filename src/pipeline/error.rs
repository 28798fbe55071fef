//! 流水线错误类型
//!
//! 只有结构性失败（扫描根不存在、模式非法、路径逃逸等）走 Result；
//! 单个文件的生成失败、验证不通过、写入失败都以类型化结果字段表达，循环继续。

use thiserror::Error;

/// 流水线结构性错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Backup failed: {0}")]
    Backup(String),
}
