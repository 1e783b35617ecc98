// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use url::Url;

use crate::domain::models::stage_result::{Entity, TextAnalysis};
use crate::engines::html_parser::collapse_whitespace;
use crate::engines::remote_vision_engine::post_json;
use crate::engines::traits::{EngineError, NlpEngine};

// Earlier patterns win when spans overlap
static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("URL", r#"https?://[^\s<>"']+[^\s<>"'.,;:!?)]"#),
        ("EMAIL", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        (
            "MONEY",
            r"(?:[$€£¥]\s?\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s?(?:USD|EUR|GBP|dollars)\b)",
        ),
        ("PERCENT", r"\b\d+(?:\.\d+)?\s?%"),
        (
            "DATE",
            r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s\d{1,2},?\s\d{4})\b",
        ),
        ("NAME", r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("static pattern")))
    .collect()
});

/// 基于规则的文本处理引擎
///
/// 清洗文本（折叠空白）并用正则识别 EMAIL、URL、MONEY、PERCENT、DATE 和
/// 首字母大写的多词 NAME
#[derive(Debug, Default, Clone)]
pub struct RuleBasedNlpEngine;

impl RuleBasedNlpEngine {
    pub fn new() -> Self {
        Self
    }

    /// 同步执行分析
    pub fn analyze_text(&self, text: &str) -> TextAnalysis {
        let cleaned_text = collapse_whitespace(text);
        let mut claimed: Vec<(Range<usize>, &'static str)> = Vec::new();

        for (label, regex) in PATTERNS.iter() {
            for m in regex.find_iter(&cleaned_text) {
                let span = m.range();
                let overlaps = claimed
                    .iter()
                    .any(|(taken, _)| span.start < taken.end && taken.start < span.end);
                if !overlaps {
                    claimed.push((span, label));
                }
            }
        }

        claimed.sort_by_key(|(span, _)| span.start);
        let entities = claimed
            .into_iter()
            .map(|(span, label)| Entity {
                text: cleaned_text[span].to_string(),
                label: label.to_string(),
            })
            .collect();

        TextAnalysis {
            cleaned_text,
            entities,
        }
    }
}

#[async_trait]
impl NlpEngine for RuleBasedNlpEngine {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis, EngineError> {
        Ok(self.analyze_text(text))
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    text: &'a str,
}

/// 远程文本处理引擎
///
/// `POST {endpoint}` 发送 `{text}`，返回 `{cleaned_text, entities[]}`
pub struct HttpNlpEngine {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpNlpEngine {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, EngineError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| EngineError::Misconfigured(format!("invalid nlp endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl NlpEngine for HttpNlpEngine {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis, EngineError> {
        post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &AnalyzeBody { text },
        )
        .await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
