//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MENDER__*` 覆盖（双下划线表示嵌套，如 `MENDER__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub improve: ImproveSection,
    #[serde(default)]
    pub apply: ApplySection,
}

/// [app] 段：被改进代码库的根目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 扫描与应用的根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时回退到环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [scan] 段：文件模式、质量阈值与扫描规模上限
#[derive(Debug, Clone, Deserialize)]
pub struct ScanSection {
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default = "default_min_quality_threshold")]
    pub min_quality_threshold: f64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// 读取与打分的有界并发
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            file_patterns: default_file_patterns(),
            min_quality_threshold: default_min_quality_threshold(),
            max_files: default_max_files(),
            read_concurrency: default_read_concurrency(),
        }
    }
}

fn default_file_patterns() -> Vec<String> {
    vec!["**/*.rs".to_string()]
}

fn default_min_quality_threshold() -> f64 {
    0.7
}

fn default_max_files() -> usize {
    50
}

fn default_read_concurrency() -> usize {
    8
}

/// [improve] 段：单循环改进数上限与验证容差
#[derive(Debug, Clone, Deserialize)]
pub struct ImproveSection {
    #[serde(default = "default_max_improvements")]
    pub max_improvements: usize,
    /// 聚合分数允许的回退幅度
    #[serde(default = "default_validation_tolerance")]
    pub validation_tolerance: f64,
}

impl Default for ImproveSection {
    fn default() -> Self {
        Self {
            max_improvements: default_max_improvements(),
            validation_tolerance: default_validation_tolerance(),
        }
    }
}

fn default_max_improvements() -> usize {
    10
}

fn default_validation_tolerance() -> f64 {
    0.05
}

/// [apply] 段：落盘策略；默认 dry_run 预览，真实写入需显式关闭
#[derive(Debug, Clone, Deserialize)]
pub struct ApplySection {
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// 未设置时备份放在原文件旁
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,
}

impl Default for ApplySection {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            backup_dir: None,
            max_file_size_kb: default_max_file_size_kb(),
        }
    }
}

fn default_dry_run() -> bool {
    true
}

fn default_max_file_size_kb() -> u64 {
    1024
}

/// 从 config 目录加载配置，环境变量 MENDER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MENDER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MENDER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_safe() {
        let cfg = AppConfig::default();
        // 默认必须是预览模式，避免误伤工作副本
        assert!(cfg.apply.dry_run);
        assert_eq!(cfg.scan.file_patterns, vec!["**/*.rs"]);
        assert!(cfg.scan.min_quality_threshold > 0.0 && cfg.scan.min_quality_threshold < 1.0);
    }
}
