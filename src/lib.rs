//! Mender - 自主代码质量改进流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: 日志初始化
//! - **pipeline**: 扫描 → 生成 → 验证 → 应用的改进流水线与编排
//! - **quality**: 启发式质量打分器与问题模型

pub mod config;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod quality;

pub use pipeline::{CycleOrchestrator, ImprovementService, ServiceMetrics};
