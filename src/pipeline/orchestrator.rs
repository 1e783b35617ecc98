// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tracing::{info, instrument, Span};

use crate::domain::models::scrape_record::{RecordBuilder, ScrapeRecord};
use crate::domain::models::scrape_request::{ScrapeRequest, StageKind};
use crate::domain::models::stage_result::{
    StageEntry, StagePayload, StageResult, SKIP_CANCELLED, SKIP_NO_NLP_PROVIDER,
    SKIP_NO_SCREENSHOT, SKIP_NO_TEXT, SKIP_NO_VISION_PROVIDER, SKIP_UPSTREAM_RENDER_FAILED,
};
use crate::engines::factory::Providers;
use crate::engines::traits::{RenderRequest, Screenshot};
use crate::pipeline::adapters::{self, RenderOutput, StageExecution};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::policy::{PipelinePolicy, StagePlan};
use crate::utils::errors::{ErrorKind, StageFailure};

/// 一次流水线运行的完整产出
///
/// 截图字节不进入记录，随记录一起交给结果落盘
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub record: ScrapeRecord,
    pub screenshot: Option<Screenshot>,
}

/// 流水线编排器
///
/// 按 渲染 → 视觉 → 文本处理 的固定顺序执行阶段。阶段失败全部在本地
/// 转为 `Failed` 结果，永远不会以错误形式返回给调用方
pub struct PipelineOrchestrator {
    providers: Providers,
}

impl PipelineOrchestrator {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    /// 执行一次抓取
    pub async fn run(&self, request: &ScrapeRequest, policy: &PipelinePolicy) -> ScrapeRecord {
        self.execute(request, policy, &CancelToken::never()).await.record
    }

    /// 执行一次可取消的抓取
    pub async fn run_cancellable(
        &self,
        request: &ScrapeRequest,
        policy: &PipelinePolicy,
        cancel: &CancelToken,
    ) -> ScrapeRecord {
        self.execute(request, policy, cancel).await.record
    }

    /// 执行一次抓取并保留截图字节
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    /// * `policy` - 流水线策略
    /// * `cancel` - 取消令牌
    ///
    /// # 返回值
    ///
    /// 抓取记录及截图；所有阶段结束后才计算整体状态
    #[instrument(skip_all, fields(url = %request.url(), record_id = tracing::field::Empty))]
    pub async fn execute(
        &self,
        request: &ScrapeRequest,
        policy: &PipelinePolicy,
        cancel: &CancelToken,
    ) -> PipelineRun {
        let plan = policy.plan_for(request);
        let mut builder = RecordBuilder::new(request.url(), policy.mandatory().clone());
        Span::current().record("record_id", builder.id().as_str());
        info!("Pipeline started with stages {:?}", plan.stages);

        let render = self.run_render(request, &plan, cancel).await;
        let render_failure = render.outcome.as_ref().err().cloned();
        let (render_output, render_entry) =
            into_entry(render, |o| StagePayload::Render(o.payload.clone()));
        record_stage(&mut builder, StageKind::Render, render_entry);

        let screenshot = render_output.as_ref().and_then(|o| o.screenshot.clone());

        match render_failure {
            Some(failure) => {
                let reason = if failure.is_cancelled() {
                    SKIP_CANCELLED
                } else {
                    SKIP_UPSTREAM_RENDER_FAILED
                };
                for stage in [StageKind::Vision, StageKind::Nlp] {
                    if plan.includes(stage) {
                        record_stage(&mut builder, stage, StageEntry::skipped(reason));
                    }
                }
            }
            None => {
                let mut cancelled = false;
                let mut ocr_text: Option<String> = None;

                if plan.includes(StageKind::Vision) {
                    let entry = self.run_vision(&plan, cancel, screenshot.as_ref()).await;
                    if let Some(StagePayload::Vision(vision)) = entry.result.payload() {
                        ocr_text = vision.text.clone();
                    }
                    cancelled = entry.result.error_kind() == Some(ErrorKind::Cancelled);
                    record_stage(&mut builder, StageKind::Vision, entry);
                }

                if plan.includes(StageKind::Nlp) {
                    let entry = if cancelled {
                        StageEntry::skipped(SKIP_CANCELLED)
                    } else {
                        let page_text = render_output.as_ref().map(|o| o.payload.text.as_str());
                        self.run_nlp(&plan, cancel, page_text, ocr_text.as_deref()).await
                    };
                    record_stage(&mut builder, StageKind::Nlp, entry);
                }
            }
        }

        let record = builder.finish();
        metrics::counter!("scrapevision_pipeline_runs_total", "status" => record.status().as_str())
            .increment(1);
        metrics::histogram!("scrapevision_pipeline_duration_seconds")
            .record(record.duration_ms() as f64 / 1000.0);
        info!(
            status = %record.status(),
            duration_ms = record.duration_ms(),
            "Pipeline finished"
        );

        PipelineRun { record, screenshot }
    }

    /// 排队期间被取消的请求对应的记录：渲染记为取消，其余阶段跳过
    pub fn cancelled_record(&self, request: &ScrapeRequest, policy: &PipelinePolicy) -> ScrapeRecord {
        let plan = policy.plan_for(request);
        let mut builder = RecordBuilder::new(request.url(), policy.mandatory().clone());

        for stage in plan.stages.iter().copied() {
            let entry = if stage == StageKind::Render {
                StageEntry::new(StageFailure::cancelled().into(), 0, 0)
            } else {
                StageEntry::skipped(SKIP_CANCELLED)
            };
            record_stage(&mut builder, stage, entry);
        }

        let record = builder.finish();
        metrics::counter!("scrapevision_pipeline_runs_total", "status" => record.status().as_str())
            .increment(1);
        info!(record_id = %record.id(), url = %record.url(), "Request cancelled before admission");
        record
    }

    async fn run_render(
        &self,
        request: &ScrapeRequest,
        plan: &StagePlan,
        cancel: &CancelToken,
    ) -> StageExecution<RenderOutput> {
        let render_request = RenderRequest {
            url: request.url().to_string(),
            timeout: plan.runner.timeout(),
            capture_screenshot: plan.capture_screenshot,
            screenshot: plan.screenshot.clone(),
        };
        let engine = self.providers.render.as_ref();
        let render_request = &render_request;

        plan.runner
            .execute(StageKind::Render, cancel, move || {
                adapters::render_page(engine, render_request)
            })
            .await
    }

    async fn run_vision(
        &self,
        plan: &StagePlan,
        cancel: &CancelToken,
        screenshot: Option<&Screenshot>,
    ) -> StageEntry {
        let Some(screenshot) = screenshot else {
            return StageEntry::skipped(SKIP_NO_SCREENSHOT);
        };
        if !self.providers.has_vision() {
            return StageEntry::skipped(SKIP_NO_VISION_PROVIDER);
        }

        let ocr = self.providers.ocr.as_deref();
        let detection = self.providers.detection.as_deref();
        let execution = plan
            .runner
            .execute(StageKind::Vision, cancel, move || {
                adapters::analyze_screenshot(ocr, detection, screenshot)
            })
            .await;

        into_entry(execution, |v| StagePayload::Vision(v.clone())).1
    }

    async fn run_nlp(
        &self,
        plan: &StagePlan,
        cancel: &CancelToken,
        page_text: Option<&str>,
        ocr_text: Option<&str>,
    ) -> StageEntry {
        let Some(engine) = self.providers.nlp.as_deref() else {
            return StageEntry::skipped(SKIP_NO_NLP_PROVIDER);
        };
        let has_text = |t: Option<&str>| t.is_some_and(|t| !t.trim().is_empty());
        if !has_text(page_text) && !has_text(ocr_text) {
            return StageEntry::skipped(SKIP_NO_TEXT);
        }

        let execution = plan
            .runner
            .execute(StageKind::Nlp, cancel, move || {
                adapters::analyze_text(engine, page_text, ocr_text)
            })
            .await;

        into_entry(execution, |n| StagePayload::Nlp(n.clone())).1
    }
}

/// 将执行结果转为记录条目，同时返回成功时的原始产出
fn into_entry<T>(
    execution: StageExecution<T>,
    to_payload: impl FnOnce(&T) -> StagePayload,
) -> (Option<T>, StageEntry) {
    let duration_ms = execution.elapsed.as_millis() as u64;
    match execution.outcome {
        Ok(output) => {
            let entry = StageEntry::new(
                StageResult::Success {
                    payload: to_payload(&output),
                },
                execution.attempts,
                duration_ms,
            );
            (Some(output), entry)
        }
        Err(failure) => (
            None,
            StageEntry::new(failure.into(), execution.attempts, duration_ms),
        ),
    }
}

fn record_stage(builder: &mut RecordBuilder, stage: StageKind, entry: StageEntry) {
    let outcome = entry.result.label();
    let kind = entry
        .result
        .error_kind()
        .map(|k| k.as_str())
        .unwrap_or("none");

    metrics::counter!(
        "scrapevision_stage_outcomes_total",
        "stage" => stage.as_str(),
        "outcome" => outcome,
        "kind" => kind
    )
    .increment(1);
    if !entry.result.is_skipped() {
        metrics::histogram!("scrapevision_stage_duration_seconds", "stage" => stage.as_str())
            .record(entry.duration_ms as f64 / 1000.0);
    }

    match &entry.result {
        StageResult::Success { .. } => {
            info!(stage = %stage, attempts = entry.attempts, duration_ms = entry.duration_ms, "Stage succeeded")
        }
        StageResult::Failed { kind, message } => tracing::warn!(
            stage = %stage,
            kind = %kind,
            attempts = entry.attempts,
            "Stage failed: {}",
            message
        ),
        StageResult::Skipped { reason } => {
            tracing::debug!(stage = %stage, "Stage skipped: {}", reason)
        }
    }

    builder.record(stage, entry);
}
