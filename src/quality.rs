//! 质量打分：Scorer 契约与默认启发式实现
//!
//! 流水线把打分器当作纯函数黑盒：score(path, content) -> { score: 0..1, issues }。
//! HeuristicScorer 是默认实现；接入外部打分服务时只需替换 trait 对象，
//! 缺失打分器属于构造期配置错误，不允许运行时静默回退。

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// 问题严重度；Blocking 级新引入的问题会让验证直接不通过
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocking,
    Warning,
    Info,
}

/// 优先级档位（high / medium / low）；打分器未给出时由扫描器默认 Medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// 单个质量问题
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// 稳定的问题类别标识（如 long-function、hardcoded-secret）
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub line: Option<usize>,
    /// 打分器可选给出的优先级档位
    pub priority: Option<Priority>,
}

/// 打分结果：标量分数 + 问题列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileQuality {
    /// 0.0（最差）~ 1.0（最好）
    pub score: f64,
    pub issues: Vec<Issue>,
}

/// 质量打分器契约（纯函数、无副作用）
pub trait QualityScorer: Send + Sync {
    fn score(&self, path: &Path, content: &str) -> FileQuality;
}

/// 默认启发式打分器
///
/// 检查项：超长函数、复杂条件、unwrap/expect、TODO/FIXME、重复代码块、
/// 注释覆盖率、硬编码密钥（Blocking）。
pub struct HeuristicScorer {
    /// 函数体超过该行数视为超长
    long_function_lines: usize,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            long_function_lines: 100,
        }
    }
}

impl HeuristicScorer {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_function_start(line: &str) -> bool {
        let t = line.trim_start();
        t.starts_with("fn ")
            || t.starts_with("pub fn ")
            || t.starts_with("async fn ")
            || t.starts_with("pub async fn ")
            || t.starts_with("function ")
            || t.starts_with("async function ")
    }

    fn check_long_functions(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        let starts: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| Self::is_function_start(l))
            .map(|(i, _)| i)
            .collect();

        for (idx, &start) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).copied().unwrap_or(lines.len());
            if end - start > self.long_function_lines {
                issues.push(Issue {
                    kind: "long-function".to_string(),
                    description: format!(
                        "Function spanning {} lines (limit {})",
                        end - start,
                        self.long_function_lines
                    ),
                    severity: Severity::Warning,
                    line: Some(start + 1),
                    priority: None,
                });
            }
        }
    }

    fn check_complex_conditionals(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        for (i, line) in lines.iter().enumerate() {
            let t = line.trim_start();
            if !(t.starts_with("if ") || t.starts_with("} else if ") || t.starts_with("while ")) {
                continue;
            }
            // 条件表达式超过 100 字符视为复杂条件
            let cond_len = t.len().saturating_sub(3);
            if cond_len > 100 {
                issues.push(Issue {
                    kind: "complex-conditional".to_string(),
                    description: "Conditional expression longer than 100 characters".to_string(),
                    severity: Severity::Warning,
                    line: Some(i + 1),
                    priority: None,
                });
            }
        }
    }

    fn check_panic_points(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        for (i, line) in lines.iter().enumerate() {
            if line.contains(".unwrap()") || line.contains(".expect(") {
                issues.push(Issue {
                    kind: "missing-error-handling".to_string(),
                    description: "Potential panic point; prefer Result propagation".to_string(),
                    severity: Severity::Warning,
                    line: Some(i + 1),
                    priority: None,
                });
            }
        }
    }

    fn check_todo_comments(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        for (i, line) in lines.iter().enumerate() {
            if line.contains("TODO") || line.contains("FIXME") {
                issues.push(Issue {
                    kind: "todo-comment".to_string(),
                    description: "TODO/FIXME comment found".to_string(),
                    severity: Severity::Info,
                    line: Some(i + 1),
                    priority: Some(Priority::Low),
                });
            }
        }
    }

    fn check_duplicate_blocks(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        const BLOCK: usize = 5;
        if lines.len() < BLOCK * 2 {
            return;
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        for window in lines.windows(BLOCK) {
            // 空白块不算重复
            if window.iter().all(|l| l.trim().is_empty()) {
                continue;
            }
            let key = window.join("\n");
            *seen.entry(key).or_insert(0) += 1;
        }

        if seen.values().any(|&c| c > 1) {
            issues.push(Issue {
                kind: "duplicate-block".to_string(),
                description: format!("Contains duplicated {}-line code blocks", BLOCK),
                severity: Severity::Warning,
                line: None,
                priority: None,
            });
        }
    }

    fn check_doc_coverage(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        if lines.len() < 20 {
            return;
        }
        let comments = lines
            .iter()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with("//") || t.starts_with("#") || t.starts_with("*")
            })
            .count();

        if (comments as f64) / (lines.len() as f64) < 0.1 {
            issues.push(Issue {
                kind: "missing-docs".to_string(),
                description: "Less than 10% of lines carry comments or docs".to_string(),
                severity: Severity::Info,
                line: None,
                priority: Some(Priority::Low),
            });
        }
    }

    fn check_hardcoded_secrets(&self, lines: &[&str], issues: &mut Vec<Issue>) {
        for (i, line) in lines.iter().enumerate() {
            let lower = line.to_lowercase();
            let has_assignment = lower.contains("password =")
                || lower.contains("password=")
                || lower.contains("api_key =")
                || lower.contains("api_key=")
                || lower.contains("apikey =");
            let has_literal = line.contains('"') || line.contains('\'');
            // 读环境变量的行不算硬编码
            if has_assignment && has_literal && !lower.contains("env") {
                issues.push(Issue {
                    kind: "hardcoded-secret".to_string(),
                    description: "Hardcoded credential-looking assignment".to_string(),
                    severity: Severity::Blocking,
                    line: Some(i + 1),
                    priority: Some(Priority::High),
                });
            }
        }
    }
}

impl QualityScorer for HeuristicScorer {
    fn score(&self, _path: &Path, content: &str) -> FileQuality {
        let lines: Vec<&str> = content.lines().collect();
        let mut issues = Vec::new();

        self.check_long_functions(&lines, &mut issues);
        self.check_complex_conditionals(&lines, &mut issues);
        self.check_panic_points(&lines, &mut issues);
        self.check_todo_comments(&lines, &mut issues);
        self.check_duplicate_blocks(&lines, &mut issues);
        self.check_doc_coverage(&lines, &mut issues);
        self.check_hardcoded_secrets(&lines, &mut issues);

        let mut score: f64 = 1.0;
        for issue in &issues {
            score *= match issue.severity {
                Severity::Blocking => 0.6,
                Severity::Warning => 0.9,
                Severity::Info => 0.95,
            };
        }

        FileQuality {
            score: score.clamp(0.0, 1.0),
            issues,
        }
    }
}
