//! 循环编排器：扫描 → 生成 → 验证 → 应用的有界批次
//!
//! 机会按扫描器的最差优先顺序串行处理；单个机会的失败只记账不致命，
//! 只有扫描本身的结构性失败让整个循环 success=false。
//! 每个机会应用前做一次协作式取消检查；指标在循环结束后一次性更新。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::pipeline::applier::{ApplyOptions, ImprovementApplier};
use crate::pipeline::generator::ImprovementGenerator;
use crate::pipeline::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::pipeline::scanner::{OpportunityScanner, ScanOptions};
use crate::pipeline::types::{CycleResult, FileOutcome, OutcomeStatus};
use crate::pipeline::validator::{GeneratedFile, ImprovementValidator};

/// 一次循环的选项；应用默认 dry_run（预览），落盘需显式开启
#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub scan: ScanOptions,
    pub apply: ApplyOptions,
    pub max_improvements: usize,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            apply: ApplyOptions {
                dry_run: true,
                backup: true,
            },
            max_improvements: 10,
        }
    }
}

pub struct CycleOrchestrator {
    scanner: OpportunityScanner,
    generator: Arc<ImprovementGenerator>,
    validator: Arc<ImprovementValidator>,
    /// 与门面共享一个实例：per-path 写锁只有在单实例下才能串行化同文件的应用
    applier: Arc<ImprovementApplier>,
    metrics: Arc<ServiceMetrics>,
    cancel: CancellationToken,
}

impl CycleOrchestrator {
    pub fn new(
        scanner: OpportunityScanner,
        generator: Arc<ImprovementGenerator>,
        validator: Arc<ImprovementValidator>,
        applier: Arc<ImprovementApplier>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            scanner,
            generator,
            validator,
            applier,
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消句柄：循环在机会之间协作式停止；已落盘的改动不回滚（有备份）
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 指标快照：纯读取，可与进行中的循环并发调用
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn scanner(&self) -> &OpportunityScanner {
        &self.scanner
    }

    pub(crate) fn applier(&self) -> &Arc<ImprovementApplier> {
        &self.applier
    }

    /// 跑一整个改进循环
    pub async fn run_cycle(&self, opts: &CycleOptions) -> CycleResult {
        tracing::info!(max_improvements = opts.max_improvements, dry_run = opts.apply.dry_run, "starting improvement cycle");

        let opportunities = match self.scanner.scan(&opts.scan).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(error = %e, "scan failed; cycle aborted");
                return CycleResult::structural_failure(e.to_string());
            }
        };

        let scanned = opportunities.len();
        self.metrics.record_scan(scanned as u64);

        let mut results: Vec<FileOutcome> = Vec::new();
        let mut attempted = 0usize;
        let mut applied = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;
        let mut generated = 0u64;
        let mut rejected = 0u64;
        let mut gain_sum = 0.0f64;

        for opportunity in opportunities.iter().take(opts.max_improvements) {
            if self.cancel.is_cancelled() {
                tracing::info!("cycle cancelled; stopping before next opportunity");
                break;
            }

            attempted += 1;
            let mut improvement = self.generator.generate(opportunity).await;

            if !improvement.success {
                failed += 1;
                results.push(FileOutcome {
                    file: opportunity.file.clone(),
                    status: OutcomeStatus::Failed,
                    quality_gain: None,
                    error: improvement.error.clone(),
                });
                continue;
            }
            generated += 1;

            // 验证的聚合基线用扫描期分数
            let report = self.validator.validate(
                &[GeneratedFile {
                    file: improvement.file.clone(),
                    original: improvement.original.clone(),
                    improved: improvement.improved.clone(),
                }],
                Some(opportunity.score),
            );
            let authoritative_gain = report.improvement;
            let passed = report.passed;
            let reason = report.reason.clone();
            improvement.validation = Some(report);

            if !passed {
                rejected += 1;
                skipped += 1;
                tracing::info!(file = %opportunity.file.display(), reason = %reason, "improvement rejected");
                results.push(FileOutcome {
                    file: opportunity.file.clone(),
                    status: OutcomeStatus::Skipped,
                    quality_gain: None,
                    error: Some(reason),
                });
                continue;
            }

            // 应用前的协作式取消检查
            if self.cancel.is_cancelled() {
                tracing::info!("cycle cancelled; skipping apply");
                break;
            }

            let apply_result = self.applier.apply(&improvement, &opts.apply).await;
            if apply_result.success {
                applied += 1;
                if !apply_result.dry_run {
                    gain_sum += authoritative_gain;
                }
                results.push(FileOutcome {
                    file: opportunity.file.clone(),
                    status: OutcomeStatus::Applied,
                    quality_gain: Some(authoritative_gain),
                    error: None,
                });
            } else {
                failed += 1;
                results.push(FileOutcome {
                    file: opportunity.file.clone(),
                    status: OutcomeStatus::Failed,
                    quality_gain: None,
                    error: apply_result.error.clone(),
                });
            }
        }

        // 指标按循环为单位一次性更新
        self.metrics.record_cycle(generated, applied as u64, rejected, gain_sum);

        tracing::info!(scanned, attempted, applied, skipped, failed, "improvement cycle complete");

        CycleResult {
            success: true,
            scanned,
            attempted,
            applied,
            skipped,
            failed,
            results,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, MockLlmClient};
    use crate::pipeline::applier::ImprovementApplier;
    use crate::pipeline::backup::FileBackupStore;
    use crate::quality::{FileQuality, Issue, QualityScorer, Severity};
    use std::path::Path;

    /// 文件名里带分数的打分器：`f40_x.rs` → 0.40
    struct NameScorer;

    impl QualityScorer for NameScorer {
        fn score(&self, path: &Path, content: &str) -> FileQuality {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            // 改写后的内容统一打高分
            let score = if content.contains("improved") {
                0.95
            } else {
                name.trim_start_matches('f')
                    .split('_')
                    .next()
                    .and_then(|d| d.parse::<f64>().ok())
                    .map(|d| d / 100.0)
                    .unwrap_or(0.9)
            };
            let issues = if score < 0.7 {
                vec![Issue {
                    kind: "long-function".to_string(),
                    description: "too long".to_string(),
                    severity: Severity::Warning,
                    line: None,
                    priority: None,
                }]
            } else {
                Vec::new()
            };
            FileQuality { score, issues }
        }
    }

    fn orchestrator(
        root: &Path,
        llm: Arc<dyn LlmClient>,
    ) -> (CycleOrchestrator, Arc<ServiceMetrics>) {
        let scorer: Arc<dyn QualityScorer> = Arc::new(NameScorer);
        let metrics = Arc::new(ServiceMetrics::new());
        let orch = CycleOrchestrator::new(
            OpportunityScanner::new(scorer.clone(), root),
            Arc::new(ImprovementGenerator::new(llm, scorer.clone())),
            Arc::new(ImprovementValidator::new(scorer)),
            Arc::new(ImprovementApplier::new(Arc::new(FileBackupStore::new()), root)),
            metrics.clone(),
        );
        (orch, metrics)
    }

    fn seed_files(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), format!("fn main() {{}} // {}\n", name)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_caps_attempts_and_processes_worst_first() {
        let dir = tempfile::tempdir().unwrap();
        seed_files(
            dir.path(),
            &["f40_a.rs", "f50_b.rs", "f30_c.rs", "f60_d.rs", "f45_e.rs"],
        );

        let llm = Arc::new(MockLlmClient::with_response("```\n// improved\n```"));
        let (orch, _) = orchestrator(dir.path(), llm.clone());

        let opts = CycleOptions {
            max_improvements: 2,
            ..Default::default()
        };
        let result = orch.run_cycle(&opts).await;

        assert!(result.success);
        assert_eq!(result.scanned, 5);
        assert_eq!(result.attempted, 2);
        // 每个尝试的机会恰好一次生成调用
        assert_eq!(llm.call_count(), 2);
        // 最差的两个先被处理
        assert!(result.results[0].file.ends_with("f30_c.rs"));
        assert!(result.results[1].file.ends_with("f40_a.rs"));
        assert!(result.applied <= result.attempted && result.attempted <= result.scanned);
    }

    #[tokio::test]
    async fn test_provider_failure_counts_failed_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        seed_files(dir.path(), &["f40_a.rs"]);
        let before = std::fs::read_to_string(dir.path().join("f40_a.rs")).unwrap();

        let llm = Arc::new(MockLlmClient::failing());
        let (orch, metrics) = orchestrator(dir.path(), llm);

        let result = orch
            .run_cycle(&CycleOptions {
                apply: ApplyOptions::default(),
                ..Default::default()
            })
            .await;

        assert!(result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.applied, 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("f40_a.rs")).unwrap(), before);
        assert_eq!(metrics.snapshot().generated, 0);
    }

    #[tokio::test]
    async fn test_dry_run_cycle_mutates_nothing_but_counts_applied() {
        let dir = tempfile::tempdir().unwrap();
        seed_files(dir.path(), &["f40_a.rs"]);
        let before = std::fs::read_to_string(dir.path().join("f40_a.rs")).unwrap();

        let llm = Arc::new(MockLlmClient::with_response("```\n// improved\n```"));
        let (orch, metrics) = orchestrator(dir.path(), llm);

        let result = orch.run_cycle(&CycleOptions::default()).await;

        assert_eq!(result.applied, 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("f40_a.rs")).unwrap(), before);
        // dry run 不累计质量增量
        assert_eq!(metrics.snapshot().total_quality_gain, 0.0);
    }

    #[tokio::test]
    async fn test_real_cycle_applies_and_accrues_gain() {
        let dir = tempfile::tempdir().unwrap();
        seed_files(dir.path(), &["f40_a.rs"]);

        let llm = Arc::new(MockLlmClient::with_response("```\n// improved\n```"));
        let (orch, metrics) = orchestrator(dir.path(), llm);

        let result = orch
            .run_cycle(&CycleOptions {
                apply: ApplyOptions::default(),
                ..Default::default()
            })
            .await;

        assert_eq!(result.applied, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f40_a.rs")).unwrap(),
            "// improved\n"
        );
        let snap = metrics.snapshot();
        assert_eq!(snap.applied, 1);
        assert!((snap.total_quality_gain - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_stops_between_opportunities() {
        let dir = tempfile::tempdir().unwrap();
        seed_files(dir.path(), &["f40_a.rs", "f50_b.rs"]);

        let llm = Arc::new(MockLlmClient::with_response("```\n// improved\n```"));
        let (orch, _) = orchestrator(dir.path(), llm);
        orch.cancellation_token().cancel();

        let result = orch.run_cycle(&CycleOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.scanned, 2);
        assert_eq!(result.attempted, 0);
        assert_eq!(result.applied, 0);
    }

    #[tokio::test]
    async fn test_scan_failure_is_cycle_fatal() {
        let llm = Arc::new(MockLlmClient::new());
        let (orch, _) = orchestrator(Path::new("/nonexistent/mender"), llm);

        let result = orch.run_cycle(&CycleOptions::default()).await;

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(result.scanned, 0);
    }
}
