//! Mender - 自主代码质量改进流水线
//!
//! 入口：初始化日志、加载配置、构建改进服务，按子命令执行 scan / cycle / metrics。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mender::config::load_config;
use mender::llm::create_client_from_config;
use mender::pipeline::{
    CycleRequest, FileBackupStore, ImprovementService, ScanOptions, ScanRequest,
};
use mender::quality::HeuristicScorer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mender::observability::init();

    let config = load_config(None).context("Failed to load config")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("scan");

    let root = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .or_else(|| config.app.workspace_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let llm = create_client_from_config(&config.llm).context("Failed to create LLM client")?;
    let llm_usage = llm.clone();
    let backup = match &config.apply.backup_dir {
        Some(dir) => Arc::new(FileBackupStore::with_dir(dir)),
        None => Arc::new(FileBackupStore::new()),
    };
    let service =
        ImprovementService::from_config(&config, llm, Arc::new(HeuristicScorer::new()), backup, &root);

    let scan_options = ScanOptions {
        target_dir: None,
        file_patterns: config.scan.file_patterns.clone(),
        min_quality_threshold: config.scan.min_quality_threshold,
        max_files: config.scan.max_files,
    };

    match command {
        "scan" => {
            let response = service
                .scan(&ScanRequest {
                    options: scan_options,
                })
                .await
                .context("Scan failed")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "cycle" => {
            // --apply 才真正落盘，否则执行配置里的 dry_run（默认预览）
            let dry_run = if args.iter().any(|a| a == "--apply") {
                false
            } else {
                config.apply.dry_run
            };
            let response = service
                .run_cycle(&CycleRequest {
                    scan: scan_options,
                    dry_run: Some(dry_run),
                    max_improvements: Some(config.improve.max_improvements),
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                anyhow::bail!("improvement cycle failed: {}", response.message);
            }
        }
        "metrics" => {
            let (prompt_tokens, completion_tokens, total_tokens) = llm_usage.token_usage();
            let out = serde_json::json!({
                "pipeline": service.metrics(),
                "token_usage": {
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": total_tokens,
                },
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        other => {
            anyhow::bail!("unknown command '{}' (expected scan | cycle | metrics)", other);
        }
    }

    Ok(())
}
