//! 改进服务门面：把扫描/生成/验证/应用组合成少量请求-响应接口
//!
//! 所有响应都附带一份指标快照，调用方（CLI 或上层服务）
//! 不需要再单独查询计数器。

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::pipeline::applier::{ApplyOptions, ImprovementApplier};
use crate::pipeline::backup::BackupStore;
use crate::pipeline::generator::ImprovementGenerator;
use crate::pipeline::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::pipeline::orchestrator::{CycleOptions, CycleOrchestrator};
use crate::pipeline::scanner::{OpportunityScanner, ScanOptions};
use crate::pipeline::types::{ApplyResult, CycleResult, Improvement, Opportunity};
use crate::pipeline::validator::{GeneratedFile, ImprovementValidator};
use crate::pipeline::PipelineError;
use crate::quality::QualityScorer;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(flatten)]
    pub options: ScanOptions,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub opportunities: usize,
    pub results: Vec<Opportunity>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImproveRequest {
    pub opportunity: Opportunity,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub backup: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ImproveResponse {
    pub improvement: Improvement,
    pub applied: Option<ApplyResult>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CycleRequest {
    #[serde(default)]
    pub scan: ScanOptions,
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub max_improvements: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CycleResponse {
    pub success: bool,
    pub result: CycleResult,
    pub metrics: MetricsSnapshot,
    pub message: String,
}

pub struct ImprovementService {
    orchestrator: CycleOrchestrator,
    generator: Arc<ImprovementGenerator>,
    validator: Arc<ImprovementValidator>,
    /// 与编排器共享同一实例：per-path 写锁只有单实例才能跨 improve/cycle 串行化
    applier: Arc<ImprovementApplier>,
    metrics: Arc<ServiceMetrics>,
}

impl ImprovementService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        scorer: Arc<dyn QualityScorer>,
        backup: Arc<dyn BackupStore>,
        root: impl AsRef<Path>,
    ) -> Self {
        let root = root.as_ref();
        let metrics = Arc::new(ServiceMetrics::new());
        let generator = Arc::new(ImprovementGenerator::new(llm, scorer.clone()));
        let validator = Arc::new(ImprovementValidator::new(scorer.clone()));
        let applier = Arc::new(ImprovementApplier::new(backup, root));
        let orchestrator = CycleOrchestrator::new(
            OpportunityScanner::new(scorer, root),
            generator.clone(),
            validator.clone(),
            applier.clone(),
            metrics.clone(),
        );
        Self {
            orchestrator,
            generator,
            validator,
            applier,
            metrics,
        }
    }

    /// 按配置装配各组件（验证容差、生成超时、读并发、文件大小上限）
    pub fn from_config(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        scorer: Arc<dyn QualityScorer>,
        backup: Arc<dyn BackupStore>,
        root: impl AsRef<Path>,
    ) -> Self {
        let root = root.as_ref();
        let metrics = Arc::new(ServiceMetrics::new());
        let scanner = OpportunityScanner::new(scorer.clone(), root)
            .with_read_concurrency(cfg.scan.read_concurrency);
        let generator = Arc::new(
            ImprovementGenerator::new(llm, scorer.clone()).with_timeout(cfg.llm.timeouts.request),
        );
        let validator = Arc::new(
            ImprovementValidator::new(scorer).with_tolerance(cfg.improve.validation_tolerance),
        );
        let applier = Arc::new(
            ImprovementApplier::new(backup, root).with_max_file_size_kb(cfg.apply.max_file_size_kb),
        );
        let orchestrator = CycleOrchestrator::new(
            scanner,
            generator.clone(),
            validator.clone(),
            applier.clone(),
            metrics.clone(),
        );
        Self {
            orchestrator,
            generator,
            validator,
            applier,
            metrics,
        }
    }

    /// 扫描代码库，返回最差优先的改进机会
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, PipelineError> {
        let results = self.orchestrator.scanner().scan(&request.options).await?;
        self.metrics.record_scan(results.len() as u64);
        Ok(ScanResponse {
            opportunities: results.len(),
            results,
            metrics: self.metrics.snapshot(),
        })
    }

    /// 单文件改进：生成 → 验证 → (可选) 应用
    ///
    /// 生成或验证失败不返回 Err，结果体里自带失败原因。
    pub async fn improve(&self, request: &ImproveRequest) -> ImproveResponse {
        let mut improvement = self.generator.generate(&request.opportunity).await;

        if improvement.success {
            let report = self.validator.validate(
                &[GeneratedFile {
                    file: improvement.file.clone(),
                    original: improvement.original.clone(),
                    improved: improvement.improved.clone(),
                }],
                Some(request.opportunity.score),
            );
            let passed = report.passed;
            let gain = report.improvement;
            improvement.validation = Some(report);

            if passed {
                let apply_result = self
                    .applier
                    .apply(
                        &improvement,
                        &ApplyOptions {
                            dry_run: request.dry_run,
                            backup: request.backup,
                        },
                    )
                    .await;
                let real_apply = apply_result.success && !apply_result.dry_run;
                self.metrics
                    .record_cycle(1, apply_result.success as u64, 0, if real_apply { gain } else { 0.0 });
                return ImproveResponse {
                    improvement,
                    applied: Some(apply_result),
                    metrics: self.metrics.snapshot(),
                };
            }
            self.metrics.record_cycle(1, 0, 1, 0.0);
        }

        ImproveResponse {
            improvement,
            applied: None,
            metrics: self.metrics.snapshot(),
        }
    }

    /// 跑一整个改进循环；指标更新由编排器完成
    pub async fn run_cycle(&self, request: &CycleRequest) -> CycleResponse {
        let mut opts = CycleOptions {
            scan: request.scan.clone(),
            ..Default::default()
        };
        if let Some(dry_run) = request.dry_run {
            opts.apply.dry_run = dry_run;
        }
        if let Some(max) = request.max_improvements {
            opts.max_improvements = max;
        }

        let result = self.orchestrator.run_cycle(&opts).await;
        let message = if result.success {
            format!(
                "improvement cycle complete: {} applied, {} skipped, {} failed",
                result.applied, result.skipped, result.failed
            )
        } else {
            result
                .error
                .clone()
                .unwrap_or_else(|| "improvement cycle failed".to_string())
        };

        CycleResponse {
            success: result.success,
            result,
            metrics: self.metrics.snapshot(),
            message,
        }
    }

    /// 取消句柄：对进行中的循环生效
    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.orchestrator.cancellation_token()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::backup::FileBackupStore;
    use crate::quality::HeuristicScorer;

    fn service(root: &Path, llm: Arc<dyn LlmClient>) -> ImprovementService {
        ImprovementService::new(
            llm,
            Arc::new(HeuristicScorer::new()),
            Arc::new(FileBackupStore::new()),
            root,
        )
    }

    #[test]
    fn test_improve_and_cycle_share_one_applier() {
        // 同一实例的 per-path 锁才能跨 improve/cycle 串行化同文件写入
        let svc = service(Path::new("."), Arc::new(MockLlmClient::new()));
        assert!(Arc::ptr_eq(&svc.applier, svc.orchestrator.applier()));
    }

    #[tokio::test]
    async fn test_scan_response_carries_metrics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.rs"), "fn main() {}\n").unwrap();

        let svc = service(dir.path(), Arc::new(MockLlmClient::new()));
        let resp = svc.scan(&ScanRequest::default()).await.unwrap();

        assert_eq!(resp.opportunities, resp.results.len());
        assert_eq!(resp.metrics.scans, 1);
    }

    #[tokio::test]
    async fn test_improve_rejects_without_applying() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.rs");
        // unwrap 密集的文件，改写版更糟（引入硬编码密钥)
        let mut body = String::new();
        for i in 0..30 {
            body.push_str(&format!("fn f{}() {{ x.unwrap(); }}\n", i));
        }
        std::fs::write(&file, &body).unwrap();

        let llm = Arc::new(MockLlmClient::with_response(
            "```\nlet password = \"hunter2\";\n```",
        ));
        let svc = service(dir.path(), llm);

        let scan = svc.scan(&ScanRequest::default()).await.unwrap();
        assert_eq!(scan.opportunities, 1);

        let resp = svc
            .improve(&ImproveRequest {
                opportunity: scan.results[0].clone(),
                dry_run: false,
                backup: true,
            })
            .await;

        assert!(resp.applied.is_none());
        let validation = resp.improvement.validation.as_ref().unwrap();
        assert!(!validation.passed);
        assert_eq!(resp.metrics.rejected, 1);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), body);
    }

    #[tokio::test]
    async fn test_cycle_response_message_summarizes_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty_dir_marker.rs"), "fn main() {}\n").unwrap();

        let svc = service(dir.path(), Arc::new(MockLlmClient::new()));
        let resp = svc.run_cycle(&CycleRequest::default()).await;

        assert!(resp.success);
        assert!(resp.message.contains("applied"));
    }
}
