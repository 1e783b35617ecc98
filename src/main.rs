// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Context;
use scrapevision::config::settings::Settings;
use scrapevision::domain::models::scrape_request::ScrapeRequest;
use scrapevision::engines::factory::build_providers;
use scrapevision::infrastructure::{metrics, storage};
use scrapevision::pipeline::orchestrator::PipelineOrchestrator;
use scrapevision::pipeline::policy::PipelinePolicy;
use scrapevision::pipeline::service::ScrapeService;
use scrapevision::pipeline::sink::ResultSink;
use scrapevision::utils::telemetry;
use tracing::{error, info, warn};

/// 主函数
///
/// 初始化日志、指标和配置，构建流水线后抓取命令行给出的每个 URL
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting scrapevision...");

    // 2. Load configuration and validate the policy before touching any provider
    let settings = Settings::new().context("failed to load configuration")?;
    metrics::init_metrics(&settings.metrics);

    let policy = PipelinePolicy::from_settings(&settings)?;
    info!(
        max_concurrent_requests = policy.max_concurrent_requests(),
        request_delay_ms = policy.request_delay().as_millis() as u64,
        "Pipeline policy loaded"
    );

    // 3. Build providers and storage
    let providers = build_providers(&settings)?;
    let storage = storage::create_storage_repository(&settings.storage)?;
    let sink = ResultSink::new(storage, policy.storage_retry().clone());
    let service = ScrapeService::new(PipelineOrchestrator::new(providers), sink, policy)?;

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        anyhow::bail!("usage: scrapevision <url>...");
    }

    // 4. Run every URL; Ctrl-C cancels whatever is still queued or running
    let handles: Vec<_> = urls
        .into_iter()
        .map(|url| service.spawn(ScrapeRequest::new(url)))
        .collect();

    let cancellers: Vec<_> = handles.iter().map(|h| h.canceller()).collect();
    let admissions = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight requests");
            admissions.shutdown();
            for canceller in &cancellers {
                canceller.cancel();
            }
        }
    });

    let mut failures = 0usize;
    for handle in handles {
        match handle.outcome().await {
            Ok(outcome) => {
                if outcome.storage_error().is_some() {
                    failures += 1;
                }
                println!("{}", serde_json::to_string(&summary(&outcome))?);
            }
            Err(e) => {
                failures += 1;
                error!("Scrape task aborted: {}", e);
            }
        }
    }

    info!("Finished, {} outcome(s) with errors", failures);
    Ok(())
}

fn summary(outcome: &scrapevision::pipeline::service::ScrapeOutcome) -> serde_json::Value {
    let record = &outcome.record;
    let stages: serde_json::Map<String, serde_json::Value> = record
        .stages()
        .map(|(kind, entry)| {
            (
                kind.to_string(),
                serde_json::json!({
                    "status": entry.result.label(),
                    "kind": entry.result.error_kind(),
                    "reason": entry.result.skip_reason(),
                    "attempts": entry.attempts,
                    "duration_ms": entry.duration_ms,
                }),
            )
        })
        .collect();

    serde_json::json!({
        "id": record.id(),
        "url": record.url(),
        "status": record.status(),
        "duration_ms": record.duration_ms(),
        "stages": stages,
        "persistence": outcome.persistence,
    })
}
