// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::domain::models::scrape_request::StageKind;
use crate::domain::models::stage_result::{StageEntry, StageResult};

/// 整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Completed,
    PartiallyCompleted,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::PartiallyCompleted => "partially_completed",
            ScrapeStatus::Failed => "failed",
        }
    }

    /// 根据已调度阶段的结果计算整体状态
    ///
    /// * 所有必需阶段成功且没有任何阶段失败 → `Completed`
    /// * 没有任何必需阶段成功 → `Failed`
    /// * 其余情况 → `PartiallyCompleted`
    ///
    /// 被跳过的必需阶段视为未成功；未调度的必需阶段不参与计算
    pub fn evaluate<'a, I>(stages: I, mandatory: &BTreeSet<StageKind>) -> Self
    where
        I: IntoIterator<Item = (StageKind, &'a StageResult)>,
    {
        let mut mandatory_total = 0usize;
        let mut mandatory_succeeded = 0usize;
        let mut any_failed = false;

        for (kind, result) in stages {
            any_failed |= result.is_failed();
            if mandatory.contains(&kind) {
                mandatory_total += 1;
                if result.is_success() {
                    mandatory_succeeded += 1;
                }
            }
        }

        if mandatory_total > 0 && mandatory_succeeded == 0 {
            ScrapeStatus::Failed
        } else if mandatory_succeeded == mandatory_total && !any_failed {
            ScrapeStatus::Completed
        } else {
            ScrapeStatus::PartiallyCompleted
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录标识符
///
/// 由 URL 域名、时间戳和随机后缀组成，同时用作存储文件名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn generate(url: &str, at: DateTime<Utc>) -> Self {
        let slug = domain_slug(&domain_of(url));
        let suffix = Uuid::new_v4().simple().to_string();
        RecordId(format!(
            "{}_{}_{}",
            slug,
            at.format("%Y%m%dT%H%M%S%6f"),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 提取 URL 的主机名，无法解析时返回 `unknown`
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn domain_slug(domain: &str) -> String {
    domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// 抓取记录
///
/// 一次请求所有阶段结果的汇总。落盘后即为只读归档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRecord {
    id: RecordId,
    url: String,
    domain: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
    status: ScrapeStatus,
    stages: BTreeMap<StageKind, StageEntry>,
}

impl ScrapeRecord {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn status(&self) -> ScrapeStatus {
        self.status
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageEntry> {
        self.stages.get(&kind)
    }

    pub fn result(&self, kind: StageKind) -> Option<&StageResult> {
        self.stages.get(&kind).map(|entry| &entry.result)
    }

    /// 按执行顺序遍历已记录的阶段
    pub fn stages(&self) -> impl Iterator<Item = (StageKind, &StageEntry)> {
        self.stages.iter().map(|(kind, entry)| (*kind, entry))
    }
}

/// 记录构建器
///
/// 由编排器独占；阶段结果只追加，已记录的阶段不会被覆盖
#[derive(Debug)]
pub struct RecordBuilder {
    id: RecordId,
    url: String,
    domain: String,
    started_at: DateTime<Utc>,
    mandatory: BTreeSet<StageKind>,
    stages: BTreeMap<StageKind, StageEntry>,
}

impl RecordBuilder {
    pub fn new(url: &str, mandatory: BTreeSet<StageKind>) -> Self {
        let started_at = Utc::now();
        Self {
            id: RecordId::generate(url, started_at),
            url: url.to_string(),
            domain: domain_of(url),
            started_at,
            mandatory,
            stages: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// 追加阶段结果，返回是否写入成功
    pub fn record(&mut self, kind: StageKind, entry: StageEntry) -> bool {
        if self.stages.contains_key(&kind) {
            warn!(record_id = %self.id, stage = %kind, "Stage already recorded, ignoring new result");
            return false;
        }
        self.stages.insert(kind, entry);
        true
    }

    /// 所有阶段结束后计算整体状态并生成记录
    pub fn finish(self) -> ScrapeRecord {
        let finished_at = Utc::now();
        let status = ScrapeStatus::evaluate(
            self.stages.iter().map(|(kind, entry)| (*kind, &entry.result)),
            &self.mandatory,
        );
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        ScrapeRecord {
            id: self.id,
            url: self.url,
            domain: self.domain,
            started_at: self.started_at,
            finished_at,
            duration_ms,
            status,
            stages: self.stages,
        }
    }
}
