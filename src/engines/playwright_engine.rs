// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{
    parse_target_url, EngineError, RenderEngine, RenderRequest, RenderedPage, Screenshot,
    ScreenshotFormat,
};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// 可关闭的浏览器页面
#[async_trait]
trait PageHandle: Send + 'static {
    async fn close_page(self) -> Result<(), EngineError>;
}

#[async_trait]
impl PageHandle for Page {
    async fn close_page(self) -> Result<(), EngineError> {
        self.close().await.map_err(cdp_error)
    }
}

/// 页面守卫
///
/// 正常结束时显式关闭；若渲染 future 因超时或取消被丢弃，则在后台关闭页面
struct PageGuard<P: PageHandle> {
    page: Option<P>,
    url: String,
}

impl<P: PageHandle> PageGuard<P> {
    fn new(page: P, url: &str) -> Self {
        Self {
            page: Some(page),
            url: url.to_string(),
        }
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close_page().await {
                debug!("Failed to close page for {}: {}", self.url, e);
            }
        }
    }
}

impl<P: PageHandle> Drop for PageGuard<P> {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let url = std::mem::take(&mut self.url);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close_page().await {
                        debug!("Failed to close abandoned page for {}: {}", url, e);
                    }
                });
            }
            Err(_) => warn!("No runtime available to close abandoned page for {}", url),
        }
    }
}

/// Playwright引擎
///
/// 基于chromiumoxide实现的无头浏览器渲染引擎，支持截图。
/// 浏览器实例在首次使用时启动（或连接远程实例），之后被所有请求复用
pub struct PlaywrightEngine {
    remote_debugging_url: Option<String>,
    user_agent: String,
    browser: OnceCell<Browser>,
}

impl PlaywrightEngine {
    /// 创建引擎
    ///
    /// # 参数
    ///
    /// * `remote_debugging_url` - 远程 Chrome 调试地址，未设置时本地启动浏览器
    /// * `user_agent` - 页面使用的 User-Agent
    pub fn new(remote_debugging_url: Option<String>, user_agent: impl Into<String>) -> Self {
        Self {
            remote_debugging_url,
            user_agent: user_agent.into(),
            browser: OnceCell::new(),
        }
    }

    // Launching Chrome is expensive, so the browser is created once and reused
    async fn get_browser(&self) -> Result<&Browser, EngineError> {
        self.browser
            .get_or_try_init(|| async {
                let (browser, mut handler) = if let Some(url) = &self.remote_debugging_url {
                    tracing::info!("Connecting to remote Chrome instance at: {}", url);
                    Browser::connect(url.as_str()).await.map_err(|e| {
                        EngineError::Misconfigured(format!("Failed to connect to remote Chrome: {}", e))
                    })?
                } else {
                    let config = BrowserConfig::builder()
                        .no_sandbox()
                        .request_timeout(Duration::from_secs(30))
                        .arg("--disable-gpu")
                        .arg("--disable-dev-shm-usage")
                        .build()
                        .map_err(EngineError::Misconfigured)?;

                    Browser::launch(config).await.map_err(|e| {
                        EngineError::Misconfigured(format!("Failed to launch Chrome: {}", e))
                    })?
                };

                // Spawn a handler to process browser events
                tokio::spawn(async move {
                    while let Some(h) = handler.next().await {
                        if h.is_err() {
                            break;
                        }
                    }
                });

                Ok(browser)
            })
            .await
    }

    async fn load(&self, page: &Page, request: &RenderRequest) -> Result<RenderedPage, EngineError> {
        let start = Instant::now();

        page.set_user_agent(self.user_agent.as_str())
            .await
            .map_err(cdp_error)?;

        // goto waits for the load event
        page.goto(request.url.as_str()).await.map_err(cdp_error)?;

        let html = page.content().await.map_err(cdp_error)?;

        let content_type = match page.evaluate("document.contentType").await {
            Ok(value) => value
                .into_value::<String>()
                .unwrap_or_else(|_| "text/html".to_string()),
            Err(_) => "text/html".to_string(),
        };

        let screenshot = if request.capture_screenshot {
            let config = &request.screenshot;
            let format = match config.format {
                ScreenshotFormat::Png => CaptureScreenshotFormat::Png,
                ScreenshotFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            };

            let mut builder = ScreenshotParams::builder()
                .format(format)
                .full_page(config.full_page);
            if config.format == ScreenshotFormat::Jpeg {
                builder = builder.quality(config.quality.unwrap_or(80));
            }

            screenshot_or_skip(
                page.screenshot(builder.build()).await,
                config.format,
                &request.url,
            )
        } else {
            None
        };

        Ok(RenderedPage {
            // goto resolves to the page, not the navigation response
            status_code: 200,
            html,
            content_type,
            screenshot,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

// The HTML is already loaded; a failed capture only loses the screenshot
fn screenshot_or_skip(
    result: Result<Vec<u8>, CdpError>,
    format: ScreenshotFormat,
    url: &str,
) -> Option<Screenshot> {
    match result {
        Ok(bytes) => Some(Screenshot { format, bytes }),
        Err(e) => {
            warn!("Screenshot failed for {}, keeping the HTML: {}", url, e);
            None
        }
    }
}

fn cdp_error(e: CdpError) -> EngineError {
    match e {
        CdpError::Timeout => EngineError::Timeout,
        other => EngineError::Network(other.to_string()),
    }
}

#[async_trait]
impl RenderEngine for PlaywrightEngine {
    /// 执行浏览器渲染
    ///
    /// # 参数
    ///
    /// * `request` - 渲染请求
    ///
    /// # 返回值
    ///
    /// * `Ok(RenderedPage)` - 页面 HTML 及可选截图
    /// * `Err(EngineError)` - 渲染过程中出现的错误
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, EngineError> {
        parse_target_url(&request.url)?;

        let browser = self.get_browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Other(format!("Failed to open page: {}", e)))?;

        // Pages are per request; the browser stays up for reuse
        let guard = PageGuard::new(page.clone(), &request.url);

        let result = tokio::time::timeout(request.timeout, self.load(&page, request))
            .await
            .unwrap_or(Err(EngineError::Timeout));

        guard.close().await;
        result
    }

    fn supports_screenshots(&self) -> bool {
        true
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "chromium"
    }
}
