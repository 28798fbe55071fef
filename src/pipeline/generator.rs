//! 改进生成器：构造提示词 → 调用生成模型 → 提取代码 → 临时收益估计
//!
//! 供应商失败（超时 / 不可用 / 响应畸形）一律折叠进 Improvement 的
//! success=false + error，不向上抛；编排器按跳过处理。本组件不碰文件系统。

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use uuid::Uuid;

use crate::llm::{LlmClient, Message};
use crate::pipeline::types::{Improvement, Opportunity};
use crate::quality::QualityScorer;

const SYSTEM_PROMPT: &str = "You are a code quality engineer. You rewrite a single file to \
resolve the listed issues while preserving its behavior. Reply with the full rewritten file \
in one fenced code block.";

pub struct ImprovementGenerator {
    llm: Arc<dyn LlmClient>,
    scorer: Arc<dyn QualityScorer>,
    call_timeout: Duration,
    fence_re: Regex,
}

impl ImprovementGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, scorer: Arc<dyn QualityScorer>) -> Self {
        Self {
            llm,
            scorer,
            call_timeout: Duration::from_secs(120),
            // 围栏语言标注可选；(?s) 让 . 匹配换行
            fence_re: Regex::new(r"(?s)```[a-zA-Z0-9_+\-]*\n(.*?)```")
                .expect("static fence pattern"),
        }
    }

    /// 设置单次生成调用超时（秒）
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.call_timeout = Duration::from_secs(secs);
        self
    }

    /// 为一个机会生成重写候选；永不返回 Err
    pub async fn generate(&self, opportunity: &Opportunity) -> Improvement {
        tracing::info!(file = %opportunity.file.display(), score = opportunity.score, "generating improvement");

        let prompt = self.build_prompt(opportunity);
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(prompt)];

        let response = match tokio::time::timeout(self.call_timeout, self.llm.complete(&messages))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(file = %opportunity.file.display(), error = %e, "provider call failed");
                return Improvement::failed(
                    opportunity.file.clone(),
                    opportunity.content.clone(),
                    e.to_string(),
                );
            }
            Err(_) => {
                tracing::warn!(file = %opportunity.file.display(), "provider call timed out");
                return Improvement::failed(
                    opportunity.file.clone(),
                    opportunity.content.clone(),
                    format!("generation timed out after {}s", self.call_timeout.as_secs()),
                );
            }
        };

        let improved = self.extract_code(&response);
        if improved.trim().is_empty() {
            return Improvement::failed(
                opportunity.file.clone(),
                opportunity.content.clone(),
                "provider returned no usable content",
            );
        }

        // 临时收益估计：重打分 - 基线；权威增量由验证器给出
        let regraded = self.scorer.score(&opportunity.file, &improved);
        let estimated_gain = regraded.score - opportunity.score;

        tracing::info!(
            file = %opportunity.file.display(),
            estimated_gain = format!("{:+.3}", estimated_gain),
            "improvement generated"
        );

        Improvement {
            id: Uuid::new_v4(),
            file: opportunity.file.clone(),
            original: opportunity.content.clone(),
            improved,
            estimated_gain,
            validation: None,
            success: true,
            error: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn build_prompt(&self, opportunity: &Opportunity) -> String {
        let issue_list = opportunity
            .issues
            .iter()
            .map(|i| match i.line {
                Some(line) => format!("- {} (line {}): {}", i.kind, line, i.description),
                None => format!("- {}: {}", i.kind, i.description),
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Improve this file by addressing the following issues:

{issues}

Current content of `{file}`:
```
{content}
```

Requirements:
1. Fix all identified issues
2. Maintain existing functionality
3. Improve code quality and maintainability
4. Add error handling where missing
5. Add documentation where missing

Generate the improved file:"#,
            issues = issue_list,
            file = opportunity.file.display(),
            content = opportunity.content,
        )
    }

    /// 提取首个围栏代码块；无围栏时退回原始响应
    fn extract_code(&self, response: &str) -> String {
        match self.fence_re.captures(response) {
            Some(caps) => caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            None => response.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::quality::HeuristicScorer;
    use std::path::PathBuf;

    fn opportunity() -> Opportunity {
        Opportunity {
            file: PathBuf::from("src/sample.rs"),
            content: "fn main() { let v = std::env::var(\"X\").unwrap(); }\n".to_string(),
            score: 0.5,
            priority: crate::quality::Priority::Medium,
            issues: Vec::new(),
            opportunities: Vec::new(),
        }
    }

    fn generator(llm: Arc<dyn LlmClient>) -> ImprovementGenerator {
        ImprovementGenerator::new(llm, Arc::new(HeuristicScorer::new()))
    }

    #[tokio::test]
    async fn test_generate_extracts_fenced_code() {
        let llm = Arc::new(MockLlmClient::with_response(
            "Here you go:\n```rust\nfn main() {}\n```\nDone.",
        ));
        let imp = generator(llm).generate(&opportunity()).await;

        assert!(imp.success);
        assert_eq!(imp.improved, "fn main() {}\n");
        assert!(imp.validation.is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_fatal() {
        let llm = Arc::new(MockLlmClient::failing());
        let imp = generator(llm).generate(&opportunity()).await;

        assert!(!imp.success);
        assert!(imp.error.as_deref().unwrap_or("").contains("unavailable"));
        assert!(imp.improved.is_empty());
    }

    #[tokio::test]
    async fn test_unfenced_response_used_verbatim() {
        let llm = Arc::new(MockLlmClient::with_response("fn main() {}\n"));
        let imp = generator(llm).generate(&opportunity()).await;

        assert!(imp.success);
        assert_eq!(imp.improved, "fn main() {}\n");
    }

    #[tokio::test]
    async fn test_estimated_gain_uses_rescoring() {
        // 原文件有 unwrap（0.9），改写后干净（1.0）
        let llm = Arc::new(MockLlmClient::with_response(
            "```rust\nfn main() -> Result<(), std::env::VarError> {\n    let _v = std::env::var(\"X\")?;\n    Ok(())\n}\n```",
        ));
        let imp = generator(llm).generate(&opportunity()).await;

        assert!(imp.success);
        assert!(imp.estimated_gain > 0.0, "gain {}", imp.estimated_gain);
    }
}
