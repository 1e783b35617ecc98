// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::future::Future;
use std::io::Cursor;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::models::scrape_request::StageKind;
use crate::domain::models::stage_result::{
    NlpPayload, RenderPayload, ScreenshotRef, VisionPayload,
};
use crate::engines::html_parser::parse_page;
use crate::engines::traits::{
    DetectionEngine, EngineError, NlpEngine, OcrEngine, RenderEngine, RenderRequest, Screenshot,
};
use crate::pipeline::cancel::CancelToken;
use crate::utils::errors::{ErrorKind, StageFailure};
use crate::utils::retry_policy::RetryPolicy;

/// 一个阶段的执行结果
///
/// `attempts` 为实际发起的尝试次数，`elapsed` 含全部重试和退避时间
#[derive(Debug)]
pub struct StageExecution<T> {
    pub outcome: Result<T, StageFailure>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// 阶段执行器
///
/// 对每次提供方调用施加硬超时，按失败的瞬时性决定是否退避重试，
/// 并在每个挂起点响应取消
#[derive(Debug, Clone)]
pub struct StageRunner {
    retry: RetryPolicy,
    timeout: Duration,
}

impl StageRunner {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self { retry, timeout }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行一个阶段
    ///
    /// # 参数
    ///
    /// * `stage` - 阶段类型，用于归类超时错误
    /// * `cancel` - 取消令牌
    /// * `operation` - 每次尝试调用一次的操作
    ///
    /// # 返回值
    ///
    /// 最终结果、尝试次数和累计耗时；重试过程对调用方透明
    pub async fn execute<T, F, Fut>(
        &self,
        stage: StageKind,
        cancel: &CancelToken,
        mut operation: F,
    ) -> StageExecution<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageFailure>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(StageFailure::cancelled());
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StageFailure::cancelled()),
                result = tokio::time::timeout(self.timeout, operation()) => match result {
                    Ok(result) => result,
                    Err(_) => Err(StageFailure::transient(
                        ErrorKind::timeout_for(stage),
                        format!("{} timed out after {}ms", stage, self.timeout.as_millis()),
                    )),
                },
            };

            let failure = match result {
                Ok(value) => break Ok(value),
                Err(failure) => failure,
            };

            // attempts - 1 retries have been spent so far
            if failure.is_cancelled() || !self.retry.should_retry_failure(attempts - 1, &failure) {
                break Err(failure);
            }

            let delay = self.retry.calculate_backoff(attempts);
            warn!(
                stage = %stage,
                attempt = attempts,
                error = %failure,
                "Stage attempt failed, retrying in {:?}",
                delay
            );
            metrics::counter!("scrapevision_stage_retries_total", "stage" => stage.as_str())
                .increment(1);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(StageFailure::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        StageExecution {
            outcome,
            attempts,
            elapsed: start.elapsed(),
        }
    }
}

/// 将提供方错误归类到阶段错误类别
pub fn classify(stage: StageKind, error: &EngineError) -> StageFailure {
    if error.is_timeout() {
        return StageFailure::transient(ErrorKind::timeout_for(stage), error.to_string());
    }
    let kind = ErrorKind::provider_failure_for(stage);
    if error.is_retryable() {
        StageFailure::transient(kind, error.to_string())
    } else {
        StageFailure::permanent(kind, error.to_string())
    }
}

/// 渲染阶段产出，截图字节单独保留给视觉阶段和结果落盘
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub payload: RenderPayload,
    pub screenshot: Option<Screenshot>,
}

/// 渲染适配器
///
/// 调用渲染提供方，拒绝空 HTML，并解析标题、可见文本和链接
pub async fn render_page(
    engine: &dyn RenderEngine,
    request: &RenderRequest,
) -> Result<RenderOutput, StageFailure> {
    let page = engine
        .render(request)
        .await
        .map_err(|e| classify(StageKind::Render, &e))?;

    if page.html.trim().is_empty() {
        return Err(StageFailure::permanent(
            ErrorKind::RenderError,
            format!("{} returned empty html", engine.name()),
        ));
    }

    let screenshot = match page.screenshot {
        Some(shot) if shot.bytes.is_empty() => {
            warn!("Render provider {} returned an empty screenshot, ignoring it", engine.name());
            None
        }
        other => other,
    };

    // Parsing large documents is CPU-bound; keep it off the async workers
    let html = page.html;
    let (parsed, html) = tokio::task::spawn_blocking(move || (parse_page(&html), html))
        .await
        .map_err(|e| {
            StageFailure::permanent(ErrorKind::RenderError, format!("html parsing aborted: {}", e))
        })?;
    debug!(
        "Rendered {} ({} bytes html, {} links)",
        request.url,
        html.len(),
        parsed.links.len()
    );

    Ok(RenderOutput {
        payload: RenderPayload {
            status_code: page.status_code,
            content_type: page.content_type,
            title: parsed.title,
            text: parsed.text,
            links: parsed.links,
            html,
            screenshot: screenshot.as_ref().map(|s| ScreenshotRef {
                format: s.format.as_str().to_string(),
                byte_len: s.bytes.len(),
            }),
            response_time_ms: page.response_time_ms,
        },
        screenshot,
    })
}

/// 视觉适配器
///
/// 先读取截图头部校验格式并取得尺寸，再对整张图执行 OCR 和/或目标检测
pub async fn analyze_screenshot(
    ocr: Option<&dyn OcrEngine>,
    detection: Option<&dyn DetectionEngine>,
    screenshot: &Screenshot,
) -> Result<VisionPayload, StageFailure> {
    let bytes = screenshot.bytes.clone();
    let (width, height) = tokio::task::spawn_blocking(move || image_dimensions(&bytes))
        .await
        .map_err(|e| {
            StageFailure::permanent(
                ErrorKind::VisionError,
                format!("screenshot decoding aborted: {}", e),
            )
        })?
        .map_err(|e| {
            StageFailure::permanent(
                ErrorKind::VisionError,
                format!("undecodable {} screenshot: {}", screenshot.format, e),
            )
        })?;
    if width == 0 || height == 0 {
        return Err(StageFailure::permanent(
            ErrorKind::VisionError,
            "screenshot has no pixels",
        ));
    }

    let text = match ocr {
        Some(engine) => Some(
            engine
                .recognize(&screenshot.bytes)
                .await
                .map_err(|e| classify(StageKind::Vision, &e))?,
        ),
        None => None,
    };

    let detections = match detection {
        Some(engine) => engine
            .detect(&screenshot.bytes)
            .await
            .map_err(|e| classify(StageKind::Vision, &e))?,
        None => Vec::new(),
    };

    Ok(VisionPayload {
        width,
        height,
        text,
        detections,
    })
}

// Only the header is read; OCR and detection take the encoded bytes
fn image_dimensions(bytes: &[u8]) -> image::ImageResult<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
}

/// 文本处理适配器
///
/// 页面文本和 OCR 文本分别处理；空文本不调用提供方
pub async fn analyze_text(
    engine: &dyn NlpEngine,
    page_text: Option<&str>,
    ocr_text: Option<&str>,
) -> Result<NlpPayload, StageFailure> {
    let mut payload = NlpPayload {
        page: None,
        ocr: None,
    };

    if let Some(text) = page_text.filter(|t| !t.trim().is_empty()) {
        payload.page = Some(
            engine
                .analyze(text)
                .await
                .map_err(|e| classify(StageKind::Nlp, &e))?,
        );
    }
    if let Some(text) = ocr_text.filter(|t| !t.trim().is_empty()) {
        payload.ocr = Some(
            engine
                .analyze(text)
                .await
                .map_err(|e| classify(StageKind::Nlp, &e))?,
        );
    }

    Ok(payload)
}
