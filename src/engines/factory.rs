// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use tracing::info;

use crate::config::settings::{NlpSettings, RenderSettings, Settings, VisionSettings};
use crate::engines::nlp_engine::{HttpNlpEngine, RuleBasedNlpEngine};
use crate::engines::playwright_engine::PlaywrightEngine;
use crate::engines::remote_vision_engine::RemoteVisionEngine;
use crate::engines::reqwest_engine::ReqwestEngine;
use crate::engines::traits::{DetectionEngine, NlpEngine, OcrEngine, RenderEngine};
use crate::utils::errors::ConfigurationError;

/// 流水线使用的能力提供方集合
///
/// 渲染是必需的；视觉和文本处理为空时对应阶段记录为跳过
#[derive(Clone)]
pub struct Providers {
    pub render: Arc<dyn RenderEngine>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub detection: Option<Arc<dyn DetectionEngine>>,
    pub nlp: Option<Arc<dyn NlpEngine>>,
}

impl Providers {
    pub fn new(render: Arc<dyn RenderEngine>) -> Self {
        Self {
            render,
            ocr: None,
            detection: None,
            nlp: None,
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_detection(mut self, detection: Arc<dyn DetectionEngine>) -> Self {
        self.detection = Some(detection);
        self
    }

    pub fn with_nlp(mut self, nlp: Arc<dyn NlpEngine>) -> Self {
        self.nlp = Some(nlp);
        self
    }

    pub fn has_vision(&self) -> bool {
        self.ocr.is_some() || self.detection.is_some()
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("render", &self.render.name())
            .field("ocr", &self.ocr.as_ref().map(|e| e.name()))
            .field("detection", &self.detection.as_ref().map(|e| e.name()))
            .field("nlp", &self.nlp.as_ref().map(|e| e.name()))
            .finish()
    }
}

/// 根据配置构建全部能力提供方
///
/// # 参数
///
/// * `settings` - 应用配置
///
/// # 返回值
///
/// * `Ok(Providers)` - 构建好的提供方
/// * `Err(ConfigurationError)` - 未知的提供方名称或缺少必需配置
pub fn build_providers(settings: &Settings) -> Result<Providers, ConfigurationError> {
    let mut providers = Providers::new(build_render_engine(&settings.render)?);

    let (ocr, detection) = build_vision_engines(&settings.vision)?;
    providers.ocr = ocr;
    providers.detection = detection;
    providers.nlp = build_nlp_engine(&settings.nlp)?;

    info!("Providers configured: {:?}", providers);
    Ok(providers)
}

pub fn build_render_engine(
    settings: &RenderSettings,
) -> Result<Arc<dyn RenderEngine>, ConfigurationError> {
    match settings.provider.as_str() {
        "chromium" => Ok(Arc::new(PlaywrightEngine::new(
            settings.remote_debugging_url.clone(),
            settings.user_agent.clone(),
        ))),
        "http" => {
            let engine = ReqwestEngine::new(&settings.user_agent)
                .map_err(|e| ConfigurationError::Provider(e.to_string()))?;
            Ok(Arc::new(engine))
        }
        other => Err(ConfigurationError::UnsupportedProvider {
            component: "render",
            value: other.to_string(),
        }),
    }
}

type VisionEngines = (Option<Arc<dyn OcrEngine>>, Option<Arc<dyn DetectionEngine>>);

pub fn build_vision_engines(settings: &VisionSettings) -> Result<VisionEngines, ConfigurationError> {
    match settings.provider.as_str() {
        "none" => Ok((None, None)),
        "http" => {
            let endpoint = settings
                .endpoint
                .as_deref()
                .ok_or_else(|| ConfigurationError::MissingSetting("vision.endpoint".to_string()))?;
            let engine = Arc::new(
                RemoteVisionEngine::new(endpoint, settings.api_key.clone())
                    .map_err(|e| ConfigurationError::Provider(e.to_string()))?,
            );
            let ocr: Arc<dyn OcrEngine> = engine.clone();
            let detection: Option<Arc<dyn DetectionEngine>> = if settings.detection_enabled {
                Some(engine)
            } else {
                None
            };
            Ok((Some(ocr), detection))
        }
        other => Err(ConfigurationError::UnsupportedProvider {
            component: "vision",
            value: other.to_string(),
        }),
    }
}

pub fn build_nlp_engine(
    settings: &NlpSettings,
) -> Result<Option<Arc<dyn NlpEngine>>, ConfigurationError> {
    match settings.provider.as_str() {
        "none" => Ok(None),
        "rules" => Ok(Some(Arc::new(RuleBasedNlpEngine::new()))),
        "http" => {
            let endpoint = settings
                .endpoint
                .as_deref()
                .ok_or_else(|| ConfigurationError::MissingSetting("nlp.endpoint".to_string()))?;
            let engine = HttpNlpEngine::new(endpoint, settings.api_key.clone())
                .map_err(|e| ConfigurationError::Provider(e.to_string()))?;
            Ok(Some(Arc::new(engine)))
        }
        other => Err(ConfigurationError::UnsupportedProvider {
            component: "nlp",
            value: other.to_string(),
        }),
    }
}
