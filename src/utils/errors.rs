// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::models::scrape_request::StageKind;

/// 错误类别
///
/// 所有阶段失败最终都会归类为以下类别之一，并写入抓取记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 渲染超时
    RenderTimeout,
    /// 渲染失败（导航/网络错误）
    RenderError,
    /// OCR 或目标检测失败
    VisionError,
    /// 文本处理失败
    NlpError,
    /// 存储写入失败
    StorageError,
    /// 调用方取消
    Cancelled,
    /// 配置错误（启动时致命）
    ConfigurationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RenderTimeout => "render_timeout",
            ErrorKind::RenderError => "render_error",
            ErrorKind::VisionError => "vision_error",
            ErrorKind::NlpError => "nlp_error",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ConfigurationError => "configuration_error",
        }
    }

    /// 阶段在超时时对应的错误类别
    pub fn timeout_for(stage: StageKind) -> Self {
        match stage {
            StageKind::Render => ErrorKind::RenderTimeout,
            StageKind::Vision => ErrorKind::VisionError,
            StageKind::Nlp => ErrorKind::NlpError,
        }
    }

    /// 阶段在提供方报错时对应的错误类别
    pub fn provider_failure_for(stage: StageKind) -> Self {
        match stage {
            StageKind::Render => ErrorKind::RenderError,
            StageKind::Vision => ErrorKind::VisionError,
            StageKind::Nlp => ErrorKind::NlpError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阶段失败
///
/// 由阶段适配器产生，`transient` 决定是否允许重试
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub transient: bool,
}

impl StageFailure {
    /// 可重试的失败（超时、网络错误）
    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: true,
        }
    }

    /// 不可重试的失败（输入错误、提供方配置错误）
    pub fn permanent(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: false,
        }
    }

    pub fn cancelled() -> Self {
        Self::permanent(ErrorKind::Cancelled, "request cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// 配置错误
///
/// 仅在启动校验阶段出现，不会在流水线运行过程中抛出
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("invalid pipeline policy: {0}")]
    InvalidPolicy(String),

    #[error("unsupported {component} provider: {value}")]
    UnsupportedProvider {
        component: &'static str,
        value: String,
    },

    #[error("missing setting: {0}")]
    MissingSetting(String),

    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to initialise provider: {0}")]
    Provider(String),
}

impl ConfigurationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigurationError
    }
}
