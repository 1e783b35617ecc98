// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

use crate::utils::errors::{ErrorKind, StageFailure};

/// 下游阶段因渲染失败被跳过
pub const SKIP_UPSTREAM_RENDER_FAILED: &str = "upstream render failed";
/// 没有截图可供视觉阶段处理
pub const SKIP_NO_SCREENSHOT: &str = "no screenshot";
/// 渲染和 OCR 都没有产生文本
pub const SKIP_NO_TEXT: &str = "no text available";
/// 请求已被取消
pub const SKIP_CANCELLED: &str = "request cancelled";
pub const SKIP_NO_VISION_PROVIDER: &str = "no vision provider configured";
pub const SKIP_NO_NLP_PROVIDER: &str = "no nlp provider configured";

/// 页面链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// 截图引用
///
/// 截图字节不进入记录本身，由结果落盘单独保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotRef {
    /// png / jpeg
    pub format: String,
    pub byte_len: usize,
}

/// 渲染阶段产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPayload {
    pub status_code: u16,
    pub content_type: String,
    pub title: Option<String>,
    /// 可见文本，供文本处理阶段使用
    pub text: String,
    pub links: Vec<Link>,
    pub html: String,
    pub screenshot: Option<ScreenshotRef>,
    pub response_time_ms: u64,
}

/// 检测框，坐标为像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// 目标检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// 视觉阶段产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPayload {
    pub width: u32,
    pub height: u32,
    /// OCR 文本；未配置 OCR 时为空
    pub text: Option<String>,
    pub detections: Vec<Detection>,
}

/// 命名实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
}

/// 单段文本的处理结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextAnalysis {
    pub cleaned_text: String,
    pub entities: Vec<Entity>,
}

/// 文本处理阶段产出
///
/// 页面文本与 OCR 文本分别处理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpPayload {
    pub page: Option<TextAnalysis>,
    pub ocr: Option<TextAnalysis>,
}

/// 阶段产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePayload {
    Render(RenderPayload),
    Vision(VisionPayload),
    Nlp(NlpPayload),
}

/// 阶段结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success { payload: StagePayload },
    Failed { kind: ErrorKind, message: String },
    Skipped { reason: String },
}

impl StageResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageResult::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageResult::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageResult::Skipped { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            StageResult::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            StageResult::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&StagePayload> {
        match self {
            StageResult::Success { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageResult::Success { .. } => "success",
            StageResult::Failed { .. } => "failed",
            StageResult::Skipped { .. } => "skipped",
        }
    }
}

impl From<StageFailure> for StageResult {
    fn from(failure: StageFailure) -> Self {
        StageResult::Failed {
            kind: failure.kind,
            message: failure.message,
        }
    }
}

/// 记录中的单个阶段条目
///
/// 重试对外透明：只保留最终结果，`attempts` 和 `duration_ms` 反映累计值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    #[serde(flatten)]
    pub result: StageResult,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl StageEntry {
    pub fn new(result: StageResult, attempts: u32, duration_ms: u64) -> Self {
        Self {
            result,
            attempts,
            duration_ms,
        }
    }

    /// 未执行的阶段
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(StageResult::skipped(reason), 0, 0)
    }
}
