// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 流水线阶段
///
/// 声明顺序即执行顺序：渲染 → 视觉 → 文本处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Render,
    Vision,
    Nlp,
}

impl StageKind {
    /// 按执行顺序排列的全部阶段
    pub const ALL: [StageKind; 3] = [StageKind::Render, StageKind::Vision, StageKind::Nlp];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Render => "render",
            StageKind::Vision => "vision",
            StageKind::Nlp => "nlp",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "render" => Ok(StageKind::Render),
            "vision" | "ocr" => Ok(StageKind::Vision),
            "nlp" => Ok(StageKind::Nlp),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// 单次请求的可选覆盖项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOptions {
    /// 每个阶段的超时时间
    #[serde(default, with = "duration_ms_opt")]
    pub timeout: Option<Duration>,
    /// 每个阶段的重试次数
    #[serde(default)]
    pub retries: Option<u32>,
    /// 需要执行的阶段（渲染总会执行）
    #[serde(default)]
    pub stages: Option<Vec<StageKind>>,
    /// 是否截图
    #[serde(default)]
    pub screenshot: Option<bool>,
}

/// 抓取请求
///
/// 提交后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    url: String,
    #[serde(default)]
    options: ScrapeOptions,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: ScrapeOptions::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.options.retries = Some(retries);
        self
    }

    pub fn with_stages(mut self, stages: impl IntoIterator<Item = StageKind>) -> Self {
        self.options.stages = Some(stages.into_iter().collect());
        self
    }

    pub fn with_screenshot(mut self, screenshot: bool) -> Self {
        self.options.screenshot = Some(screenshot);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &ScrapeOptions {
        &self.options
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
