// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::domain::models::stage_result::{Detection, TextAnalysis};

/// 引擎错误类型
///
/// 能力提供方的原生错误，由阶段适配器归类到统一的错误类别
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 网络或导航错误
    #[error("Network error: {0}")]
    Network(String),
    /// 上游返回非成功状态码
    #[error("Upstream returned HTTP {0}")]
    HttpStatus(u16),
    /// 输入不合法（URL 格式错误、图片为空等）
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// 提供方配置错误
    #[error("Provider misconfigured: {0}")]
    Misconfigured(String),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 超时、连接失败、5xx 和 429 返回 true，其余返回 false
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            EngineError::Timeout | EngineError::Network(_) => true,
            EngineError::HttpStatus(code) => *code >= 500 || *code == 429,
            EngineError::InvalidInput(_) | EngineError::Misconfigured(_) => false,
            EngineError::Other(_) => false,
        }
    }

    /// 是否为超时类错误
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::Timeout => true,
            EngineError::RequestFailed(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// 截图格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
}

impl ScreenshotFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpeg",
        }
    }

    /// 从配置值解析，未知格式返回 `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Some(ScreenshotFormat::Png),
            "jpeg" | "jpg" => Some(ScreenshotFormat::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for ScreenshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 截图配置
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotConfig {
    /// 是否全屏
    pub full_page: bool,
    /// 质量 (1-100)，仅 JPEG 有效
    pub quality: Option<i64>,
    /// 格式
    pub format: ScreenshotFormat,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            full_page: true,
            quality: None,
            format: ScreenshotFormat::Png,
        }
    }
}

/// 渲染请求
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// 目标URL
    pub url: String,
    /// 超时时间
    pub timeout: Duration,
    /// 是否需要截图
    pub capture_screenshot: bool,
    /// 截图配置
    pub screenshot: ScreenshotConfig,
}

/// 截图数据
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub format: ScreenshotFormat,
    pub bytes: Vec<u8>,
}

/// 渲染结果
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// HTTP状态码
    pub status_code: u16,
    /// 页面 HTML
    pub html: String,
    /// 内容类型
    pub content_type: String,
    /// 截图（仅在请求截图且提供方支持时存在）
    pub screenshot: Option<Screenshot>,
    /// 响应时间（毫秒）
    pub response_time_ms: u64,
}

/// 渲染引擎特质
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// 加载页面并返回 HTML 及可选截图
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, EngineError>;

    /// 引擎是否能产出截图
    fn supports_screenshots(&self) -> bool;

    /// 引擎名称
    fn name(&self) -> &'static str;
}

/// 文字识别引擎特质
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 识别整张图片中的文字
    async fn recognize(&self, image: &[u8]) -> Result<String, EngineError>;

    fn name(&self) -> &'static str;
}

/// 目标检测引擎特质
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    /// 检测图片中的目标
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, EngineError>;

    fn name(&self) -> &'static str;
}

/// 文本处理引擎特质
#[async_trait]
pub trait NlpEngine: Send + Sync {
    /// 清洗文本并抽取命名实体
    async fn analyze(&self, text: &str) -> Result<TextAnalysis, EngineError>;

    fn name(&self) -> &'static str;
}

/// 校验目标 URL：必须能解析且为 http/https
pub fn parse_target_url(url: &str) -> Result<Url, EngineError> {
    let parsed =
        Url::parse(url).map_err(|e| EngineError::InvalidInput(format!("malformed url {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(EngineError::InvalidInput(format!(
            "unsupported url scheme: {}",
            other
        ))),
    }
}
