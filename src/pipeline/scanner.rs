//! 机会扫描器：枚举 → 打分 → 过滤 → 最差优先排序
//!
//! 读取与打分用有界并发；单个文件不可读只告警跳过，绝不让整次扫描失败。
//! 排序规则：质量分升序（最差在前），同分按路径字典序保证确定性。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::pipeline::error::PipelineError;
use crate::pipeline::types::{Issue, Opportunity, Priority, Severity, SubOpportunity};
use crate::quality::QualityScorer;

/// 枚举时剪掉的目录（构建产物与版本库内部）
const IGNORED_DIRS: &[&str] = &["target", ".git", "node_modules", "dist", ".next", "out"];

/// 单个子机会的收益估计上限与单问题系数
const GAIN_CAP: f64 = 0.15;
const GAIN_PER_ISSUE: f64 = 0.03;

/// 扫描选项
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// 不设置时用扫描器自身的工作根
    pub target_dir: Option<PathBuf>,
    pub file_patterns: Vec<String>,
    /// 达到该分数的文件视为足够好，跳过
    pub min_quality_threshold: f64,
    /// 按最差优先保留的文件数上限
    pub max_files: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            target_dir: None,
            file_patterns: vec!["**/*.rs".to_string()],
            min_quality_threshold: 0.7,
            max_files: 50,
        }
    }
}

pub struct OpportunityScanner {
    scorer: Arc<dyn QualityScorer>,
    root: PathBuf,
    read_concurrency: usize,
}

impl OpportunityScanner {
    pub fn new(scorer: Arc<dyn QualityScorer>, root: impl AsRef<Path>) -> Self {
        Self {
            scorer,
            root: root.as_ref().to_path_buf(),
            read_concurrency: 8,
        }
    }

    pub fn with_read_concurrency(mut self, n: usize) -> Self {
        self.read_concurrency = n.max(1);
        self
    }

    /// 扫描并返回按最差优先排好序、截断到 max_files 的机会列表。
    /// 只有结构性问题（根不存在、模式非法）才返回 Err。
    pub async fn scan(&self, opts: &ScanOptions) -> Result<Vec<Opportunity>, PipelineError> {
        let root = opts.target_dir.clone().unwrap_or_else(|| self.root.clone());
        if !root.is_dir() {
            return Err(PipelineError::ScanFailed(format!(
                "target '{}' is not a directory",
                root.display()
            )));
        }

        let patterns = compile_patterns(&opts.file_patterns)?;
        let candidates = enumerate_files(&root, &patterns);
        tracing::debug!(count = candidates.len(), root = %root.display(), "scan candidates");

        // 有界并发读取 + 打分；读取失败记日志并产出 None
        let scored: Vec<Option<(PathBuf, String, crate::quality::FileQuality)>> =
            stream::iter(candidates)
                .map(|path| {
                    let scorer = self.scorer.clone();
                    async move {
                        match tokio::fs::read_to_string(&path).await {
                            Ok(content) => {
                                let quality = scorer.score(&path, &content);
                                Some((path, content, quality))
                            }
                            Err(e) => {
                                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable file");
                                None
                            }
                        }
                    }
                })
                .buffer_unordered(self.read_concurrency)
                .collect()
                .await;

        let mut retained: Vec<Opportunity> = scored
            .into_iter()
            .flatten()
            .filter(|(_, _, q)| q.score < opts.min_quality_threshold)
            .map(|(file, content, q)| {
                let opportunities = group_issues(&q.issues);
                // 文件级档位取子机会中的最高档
                let priority = opportunities
                    .iter()
                    .map(|o| o.priority)
                    .min()
                    .unwrap_or_default();
                Opportunity {
                    opportunities,
                    file,
                    content,
                    score: q.score,
                    priority,
                    issues: q.issues,
                }
            })
            .collect();

        // 最差优先；同分按路径保证确定性
        retained.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file.cmp(&b.file))
        });
        retained.truncate(opts.max_files);

        tracing::info!(opportunities = retained.len(), "scan complete");
        Ok(retained)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>, PipelineError> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| PipelineError::InvalidPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn enumerate_files(root: &Path, patterns: &[glob::Pattern]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .map(|n| IGNORED_DIRS.contains(&n))
                    .unwrap_or(false))
        })
        .filter_map(|entry| entry.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            patterns.iter().any(|p| p.matches_path(rel))
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// 按问题类别分组为子机会；打分器未给档位时默认 Medium，
/// 问题超过 3 个的组升为 High（与问题越多越值得先修的排序策略一致）
fn group_issues(issues: &[Issue]) -> Vec<SubOpportunity> {
    let mut groups: Vec<SubOpportunity> = Vec::new();

    for issue in issues {
        match groups.iter_mut().find(|g| g.kind == issue.kind) {
            Some(g) => g.issues.push(issue.clone()),
            None => groups.push(SubOpportunity {
                kind: issue.kind.clone(),
                priority: Priority::Medium,
                estimated_gain: 0.0,
                issues: vec![issue.clone()],
            }),
        }
    }

    for g in &mut groups {
        g.priority = g
            .issues
            .iter()
            .filter_map(|i| i.priority)
            .min()
            .unwrap_or(Priority::Medium);
        if g.issues.len() > 3 || g.issues.iter().any(|i| i.severity == Severity::Blocking) {
            g.priority = Priority::High;
        }
        g.estimated_gain = (g.issues.len() as f64 * GAIN_PER_ISSUE).min(GAIN_CAP);
    }

    groups.sort_by_key(|g| g.priority);
    groups
}
