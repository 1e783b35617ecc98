// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{parse_target_url, EngineError, RenderEngine, RenderRequest, RenderedPage};
use async_trait::async_trait;
use std::time::Instant;

/// HTTP 渲染引擎
///
/// 基于reqwest实现，只获取 HTML，不执行 JavaScript，也不产出截图
pub struct ReqwestEngine {
    client: reqwest::Client,
}

impl ReqwestEngine {
    /// 创建引擎
    ///
    /// # 参数
    ///
    /// * `user_agent` - 请求使用的 User-Agent
    pub fn new(user_agent: &str) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| EngineError::Misconfigured(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RenderEngine for ReqwestEngine {
    /// 执行HTTP抓取
    ///
    /// # 参数
    ///
    /// * `request` - 渲染请求
    ///
    /// # 返回值
    ///
    /// * `Ok(RenderedPage)` - 页面内容
    /// * `Err(EngineError)` - 非 2xx 状态码返回 `HttpStatus`
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, EngineError> {
        let url = parse_target_url(&request.url)?;

        if request.capture_screenshot {
            tracing::debug!("Screenshot requested for {} but the http engine cannot capture one", url);
        }

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(request.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "text/html".to_string());

        let html = response.text().await?;

        Ok(RenderedPage {
            status_code: status.as_u16(),
            html,
            content_type,
            screenshot: None,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn supports_screenshots(&self) -> bool {
        false
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
#[path = "reqwest_engine_test.rs"]
mod tests;
