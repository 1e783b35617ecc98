// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::settings::Settings;
use crate::domain::models::scrape_request::{ScrapeRequest, StageKind};
use crate::engines::traits::{ScreenshotConfig, ScreenshotFormat};
use crate::pipeline::adapters::StageRunner;
use crate::utils::errors::ConfigurationError;
use crate::utils::retry_policy::RetryPolicy;

/// 流水线策略
///
/// 进程启动时加载并校验一次，之后只读。只能通过 [`PipelinePolicyBuilder`]
/// 或 [`PipelinePolicy::from_settings`] 构造，因此运行期不存在非法策略
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePolicy {
    max_concurrent_requests: usize,
    request_delay: Duration,
    stage_timeout: Duration,
    retry: RetryPolicy,
    mandatory: BTreeSet<StageKind>,
    default_stages: BTreeSet<StageKind>,
    capture_screenshot: bool,
    screenshot: ScreenshotConfig,
    storage_retry: RetryPolicy,
}

/// 单次请求的执行计划
///
/// 由策略和请求覆盖项合并而来
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stages: BTreeSet<StageKind>,
    pub runner: StageRunner,
    pub capture_screenshot: bool,
    pub screenshot: ScreenshotConfig,
}

impl StagePlan {
    pub fn includes(&self, stage: StageKind) -> bool {
        self.stages.contains(&stage)
    }
}

impl PipelinePolicy {
    pub fn builder() -> PipelinePolicyBuilder {
        PipelinePolicyBuilder::default()
    }

    /// 从配置构建并校验策略
    ///
    /// # 参数
    ///
    /// * `settings` - 应用配置
    ///
    /// # 返回值
    ///
    /// * `Ok(PipelinePolicy)` - 校验通过的策略
    /// * `Err(ConfigurationError)` - 配置非法
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigurationError> {
        let pipeline = &settings.pipeline;

        let format = ScreenshotFormat::parse(&settings.render.screenshot_format).ok_or_else(|| {
            ConfigurationError::InvalidPolicy(format!(
                "unsupported screenshot format: {}",
                settings.render.screenshot_format
            ))
        })?;

        Self::builder()
            .max_concurrent_requests(pipeline.max_concurrent_requests)
            .request_delay(Duration::from_millis(pipeline.request_delay_ms))
            .stage_timeout(Duration::from_millis(pipeline.stage_timeout_ms))
            .retry_attempts(pipeline.retry_attempts)
            .backoff(
                Duration::from_millis(pipeline.backoff_base_ms),
                Duration::from_millis(pipeline.backoff_max_ms),
            )
            .mandatory_stages(pipeline.mandatory_stages.iter().copied())
            .default_stages(pipeline.default_stages.iter().copied())
            .capture_screenshot(pipeline.capture_screenshot)
            .screenshot(ScreenshotConfig {
                full_page: settings.render.full_page,
                quality: settings.render.screenshot_quality,
                format,
            })
            .storage_retry(
                RetryPolicy::fast()
                    .with_max_retries(settings.storage.write_retries)
                    .with_backoff(
                        Duration::from_millis(settings.storage.retry_backoff_ms),
                        Duration::from_secs(5),
                    ),
            )
            .build()
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn mandatory(&self) -> &BTreeSet<StageKind> {
        &self.mandatory
    }

    pub fn is_mandatory(&self, stage: StageKind) -> bool {
        self.mandatory.contains(&stage)
    }

    pub fn default_stages(&self) -> &BTreeSet<StageKind> {
        &self.default_stages
    }

    pub fn storage_retry(&self) -> &RetryPolicy {
        &self.storage_retry
    }

    /// 合并请求覆盖项，生成执行计划
    ///
    /// 渲染阶段总会被调度；零超时的覆盖项被忽略
    pub fn plan_for(&self, request: &ScrapeRequest) -> StagePlan {
        let options = request.options();

        let mut stages: BTreeSet<StageKind> = match &options.stages {
            Some(selected) => selected.iter().copied().collect(),
            None => self.default_stages.clone(),
        };
        stages.insert(StageKind::Render);

        let timeout = options
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.stage_timeout);

        let retry = match options.retries {
            Some(retries) => self.retry.clone().with_max_retries(retries),
            None => self.retry.clone(),
        };

        StagePlan {
            stages,
            runner: StageRunner::new(retry, timeout),
            capture_screenshot: options.screenshot.unwrap_or(self.capture_screenshot),
            screenshot: self.screenshot.clone(),
        }
    }
}

/// 策略构建器
#[derive(Debug, Clone)]
pub struct PipelinePolicyBuilder {
    max_concurrent_requests: usize,
    request_delay: Duration,
    stage_timeout: Duration,
    retry_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    mandatory: BTreeSet<StageKind>,
    default_stages: BTreeSet<StageKind>,
    capture_screenshot: bool,
    screenshot: ScreenshotConfig,
    storage_retry: RetryPolicy,
}

impl Default for PipelinePolicyBuilder {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            request_delay: Duration::from_secs(1),
            stage_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            mandatory: BTreeSet::from([StageKind::Render]),
            default_stages: StageKind::ALL.into_iter().collect(),
            capture_screenshot: true,
            screenshot: ScreenshotConfig::default(),
            storage_retry: RetryPolicy::fast(),
        }
    }
}

impl PipelinePolicyBuilder {
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn mandatory_stages(mut self, stages: impl IntoIterator<Item = StageKind>) -> Self {
        self.mandatory = stages.into_iter().collect();
        self
    }

    pub fn default_stages(mut self, stages: impl IntoIterator<Item = StageKind>) -> Self {
        self.default_stages = stages.into_iter().collect();
        self
    }

    pub fn capture_screenshot(mut self, capture: bool) -> Self {
        self.capture_screenshot = capture;
        self
    }

    pub fn screenshot(mut self, config: ScreenshotConfig) -> Self {
        self.screenshot = config;
        self
    }

    pub fn storage_retry(mut self, retry: RetryPolicy) -> Self {
        self.storage_retry = retry;
        self
    }

    /// 校验并生成策略
    pub fn build(self) -> Result<PipelinePolicy, ConfigurationError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigurationError::InvalidPolicy(
                "max_concurrent_requests must be greater than zero".to_string(),
            ));
        }
        if self.stage_timeout.is_zero() {
            return Err(ConfigurationError::InvalidPolicy(
                "stage timeout must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigurationError::InvalidPolicy(format!(
                "backoff base {:?} exceeds backoff cap {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if let Some(quality) = self.screenshot.quality {
            if !(1..=100).contains(&quality) {
                return Err(ConfigurationError::InvalidPolicy(format!(
                    "screenshot quality must be within 1..=100, got {}",
                    quality
                )));
            }
        }

        let mut mandatory = self.mandatory;
        mandatory.insert(StageKind::Render);
        let mut default_stages = self.default_stages;
        default_stages.insert(StageKind::Render);

        Ok(PipelinePolicy {
            max_concurrent_requests: self.max_concurrent_requests,
            request_delay: self.request_delay,
            stage_timeout: self.stage_timeout,
            retry: RetryPolicy::standard()
                .with_max_retries(self.retry_attempts)
                .with_backoff(self.backoff_base, self.backoff_max),
            mandatory,
            default_stages,
            capture_screenshot: self.capture_screenshot,
            screenshot: self.screenshot,
            storage_retry: self.storage_retry,
        })
    }
}
