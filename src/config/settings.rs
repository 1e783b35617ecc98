// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::models::scrape_request::StageKind;

/// 应用程序配置设置
///
/// 包含流水线策略、各能力提供方、存储和指标导出等配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 流水线配置
    pub pipeline: PipelineSettings,
    /// 渲染配置
    pub render: RenderSettings,
    /// 视觉配置
    pub vision: VisionSettings,
    /// 文本处理配置
    pub nlp: NlpSettings,
    /// 存储配置
    pub storage: StorageSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
}

/// 流水线配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// 最大并发流水线数
    pub max_concurrent_requests: usize,
    /// 相邻两次准入之间的最小间隔（毫秒）
    pub request_delay_ms: u64,
    /// 单个阶段的超时时间（毫秒）
    pub stage_timeout_ms: u64,
    /// 每个阶段的重试次数（不含首次尝试）
    pub retry_attempts: u32,
    /// 退避基准时间（毫秒）
    pub backoff_base_ms: u64,
    /// 退避上限（毫秒）
    pub backoff_max_ms: u64,
    /// 必需阶段
    pub mandatory_stages: Vec<StageKind>,
    /// 默认执行的阶段
    pub default_stages: Vec<StageKind>,
    /// 默认是否截图
    pub capture_screenshot: bool,
}

/// 渲染配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RenderSettings {
    /// 渲染提供方 (chromium, http)
    pub provider: String,
    /// 请求使用的 User-Agent
    pub user_agent: String,
    /// 远程浏览器调试地址 (可选，未设置时本地启动浏览器)
    pub remote_debugging_url: Option<String>,
    /// 截图格式 (png, jpeg)
    pub screenshot_format: String,
    /// JPEG 截图质量
    pub screenshot_quality: Option<i64>,
    /// 是否整页截图
    pub full_page: bool,
}

/// 视觉配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct VisionSettings {
    /// 视觉提供方 (http, none)
    pub provider: String,
    /// 远程视觉服务地址
    pub endpoint: Option<String>,
    /// 远程服务 API 密钥
    pub api_key: Option<String>,
    /// 是否启用目标检测
    pub detection_enabled: bool,
}

/// 文本处理配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct NlpSettings {
    /// 文本处理提供方 (rules, http, none)
    pub provider: String,
    /// 远程 NLP 服务地址
    pub endpoint: Option<String>,
    /// 远程服务 API 密钥
    pub api_key: Option<String>,
}

/// 存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// 存储类型 (local, s3, memory)
    pub storage_type: String,
    /// 本地存储路径 (当 type=local 时使用)
    pub local_path: Option<String>,
    /// S3 区域
    pub s3_region: Option<String>,
    /// S3 存储桶名称
    pub s3_bucket: Option<String>,
    /// S3 访问密钥
    pub s3_access_key: Option<String>,
    /// S3 密钥
    pub s3_secret_key: Option<String>,
    /// S3 端点 (可选，用于 MinIO 等兼容服务)
    pub s3_endpoint: Option<String>,
    /// 写入失败后的重试次数
    pub write_retries: u32,
    /// 写入重试的退避基准时间（毫秒）
    pub retry_backoff_ms: u64,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 导出监听地址
    pub listen_address: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加内置默认值、`config/default.toml`、`config/{APP_ENVIRONMENT}.toml`
    /// 和 `SCRAPEVISION__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::with_defaults(Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("SCRAPEVISION")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pipeline.mandatory_stages")
                    .with_list_parse_key("pipeline.default_stages")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// 仅使用内置默认值构建配置
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::with_defaults(Config::builder())?
            .build()?
            .try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Default pipeline settings
            .set_default("pipeline.max_concurrent_requests", 5)?
            .set_default("pipeline.request_delay_ms", 1000)?
            .set_default("pipeline.stage_timeout_ms", 30000)?
            .set_default("pipeline.retry_attempts", 3)?
            .set_default("pipeline.backoff_base_ms", 1000)?
            .set_default("pipeline.backoff_max_ms", 30000)?
            .set_default("pipeline.mandatory_stages", vec!["render"])?
            .set_default("pipeline.default_stages", vec!["render", "vision", "nlp"])?
            .set_default("pipeline.capture_screenshot", true)?
            // Default render settings
            .set_default("render.provider", "chromium")?
            .set_default("render.user_agent", "Mozilla/5.0 (compatible; scrapevision/0.1)")?
            .set_default("render.screenshot_format", "png")?
            .set_default("render.full_page", true)?
            // Default vision / nlp settings
            .set_default("vision.provider", "none")?
            .set_default("vision.detection_enabled", false)?
            .set_default("nlp.provider", "rules")?
            // Default Storage settings
            .set_default("storage.storage_type", "local")?
            .set_default("storage.local_path", "./storage")?
            .set_default("storage.write_retries", 3)?
            .set_default("storage.retry_backoff_ms", 200)?
            // Default metrics settings
            .set_default("metrics.enabled", false)?
            .set_default("metrics.listen_address", "0.0.0.0:9000")
    }
}
