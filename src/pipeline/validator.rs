//! 改进验证器：重打分对比基线，给出 pass/fail 与结构化报告
//!
//! 永远产出报告：质量差只会让 passed=false，不会抛错；
//! 只有输入缺失 / 损坏（空文件集、空改写内容）才算可报告的失败。
//! 通过条件：聚合分不低于基线减容差，且没有新引入 Blocking 级问题。

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::pipeline::types::{FileValidation, Severity, ValidationReport};
use crate::quality::QualityScorer;

/// 一个待验证的改写文件（原文 + 改写后）
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub file: PathBuf,
    pub original: String,
    pub improved: String,
}

pub struct ImprovementValidator {
    scorer: Arc<dyn QualityScorer>,
    /// 允许的聚合分回退容差
    tolerance: f64,
}

impl ImprovementValidator {
    pub fn new(scorer: Arc<dyn QualityScorer>) -> Self {
        Self {
            scorer,
            tolerance: 0.05,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// 验证一组改写文件；baseline 给出时作为聚合基线（扫描期分数），
    /// 否则取各文件改写前分数的均值
    pub fn validate(&self, files: &[GeneratedFile], baseline: Option<f64>) -> ValidationReport {
        if files.is_empty() {
            return Self::input_failure("empty generated file set");
        }
        if let Some(bad) = files.iter().find(|f| f.improved.trim().is_empty()) {
            return Self::input_failure(format!(
                "generated content for '{}' is empty",
                bad.file.display()
            ));
        }

        let mut file_reports = Vec::with_capacity(files.len());
        let mut resolved_all = Vec::new();
        let mut introduced_all = Vec::new();
        let mut warnings = Vec::new();
        let mut blocking_introduced = Vec::new();
        let mut before_sum = 0.0;
        let mut after_sum = 0.0;

        for gf in files {
            let before = self.scorer.score(&gf.file, &gf.original);
            let after = self.scorer.score(&gf.file, &gf.improved);

            let before_kinds: BTreeSet<&str> =
                before.issues.iter().map(|i| i.kind.as_str()).collect();
            let after_kinds: BTreeSet<&str> =
                after.issues.iter().map(|i| i.kind.as_str()).collect();

            let resolved: Vec<String> = before_kinds
                .difference(&after_kinds)
                .map(|k| k.to_string())
                .collect();
            let introduced: Vec<String> = after_kinds
                .difference(&before_kinds)
                .map(|k| k.to_string())
                .collect();

            for issue in &after.issues {
                if issue.severity == Severity::Blocking
                    && introduced.iter().any(|k| k == &issue.kind)
                {
                    blocking_introduced.push(format!("{} in {}", issue.kind, gf.file.display()));
                }
            }

            if after.score < before.score {
                warnings.push(format!(
                    "score for '{}' regressed {:.3} -> {:.3}",
                    gf.file.display(),
                    before.score,
                    after.score
                ));
            }
            for kind in &introduced {
                warnings.push(format!("introduced '{}' in {}", kind, gf.file.display()));
            }

            before_sum += before.score;
            after_sum += after.score;
            resolved_all.extend(resolved.iter().cloned());
            introduced_all.extend(introduced.iter().cloned());
            file_reports.push(FileValidation {
                file: gf.file.clone(),
                score_before: before.score,
                score_after: after.score,
                resolved_issues: resolved,
                introduced_issues: introduced,
            });
        }

        let n = files.len() as f64;
        let score_before = baseline.unwrap_or(before_sum / n);
        let score_after = after_sum / n;
        let improvement = score_after - score_before;

        let regressed = score_after < score_before - self.tolerance;
        let passed = !regressed && blocking_introduced.is_empty();

        let reason = if passed {
            "Improvement validated".to_string()
        } else if !blocking_introduced.is_empty() {
            format!("Blocking issue introduced: {}", blocking_introduced.join(", "))
        } else {
            format!(
                "Aggregate score regressed beyond tolerance ({:.3} -> {:.3})",
                score_before, score_after
            )
        };

        let recommendations = Self::recommendations(&introduced_all, &file_reports);

        ValidationReport {
            passed,
            score_before,
            score_after,
            improvement,
            resolved_issues: resolved_all,
            introduced_issues: introduced_all,
            warnings,
            recommendations,
            reason,
            files: file_reports,
        }
    }

    fn input_failure(reason: impl Into<String>) -> ValidationReport {
        let reason = reason.into();
        ValidationReport {
            passed: false,
            score_before: 0.0,
            score_after: 0.0,
            improvement: 0.0,
            resolved_issues: Vec::new(),
            introduced_issues: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
            reason,
            files: Vec::new(),
        }
    }

    fn recommendations(introduced: &[String], files: &[FileValidation]) -> Vec<String> {
        let mut recs = Vec::new();
        if !introduced.is_empty() {
            recs.push(format!(
                "Review {} newly introduced issue kind(s) before applying",
                introduced.len()
            ));
        }
        if files.iter().any(|f| f.resolved_issues.is_empty()) {
            recs.push("Rewrite resolved no issue kinds for at least one file; consider a stronger prompt".to_string());
        }
        recs
    }
}
