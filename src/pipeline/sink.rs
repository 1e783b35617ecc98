// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::models::scrape_record::ScrapeRecord;
use crate::domain::repositories::storage_repository::{StorageError, StorageRepository};
use crate::engines::traits::Screenshot;
use crate::utils::errors::ErrorKind;
use crate::utils::retry_policy::RetryPolicy;

/// 落盘位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub record: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// 落盘错误
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage write for {key} failed after {attempts} attempts: {source}")]
    Write {
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::StorageError
    }
}

#[derive(Serialize)]
struct PersistedRecord<'a> {
    #[serde(flatten)]
    record: &'a ScrapeRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot_location: Option<&'a str>,
}

/// 结果落盘
///
/// 记录序列化为 JSON，键为 `{domain}/{id}.json`；截图存为 `{domain}/{id}.{png|jpeg}`。
/// 写入失败按重试策略退避重试
pub struct ResultSink {
    storage: Arc<dyn StorageRepository>,
    retry: RetryPolicy,
}

impl ResultSink {
    pub fn new(storage: Arc<dyn StorageRepository>, retry: RetryPolicy) -> Self {
        Self { storage, retry }
    }

    /// 记录的存储键
    pub fn record_key(record: &ScrapeRecord) -> String {
        format!("{}/{}.json", record.domain(), record.id())
    }

    /// 截图的存储键
    pub fn screenshot_key(record: &ScrapeRecord, screenshot: &Screenshot) -> String {
        format!("{}/{}.{}", record.domain(), record.id(), screenshot.format.as_str())
    }

    /// 持久化记录
    ///
    /// # 参数
    ///
    /// * `record` - 抓取记录
    /// * `screenshot` - 渲染阶段捕获的截图
    ///
    /// # 返回值
    ///
    /// * `Ok(StorageLocation)` - 记录（及截图）的位置
    /// * `Err(SinkError)` - 记录在重试后仍无法写入；截图写入失败只记录警告
    pub async fn persist(
        &self,
        record: &ScrapeRecord,
        screenshot: Option<&Screenshot>,
    ) -> Result<StorageLocation, SinkError> {
        let screenshot_location = match screenshot {
            Some(shot) => {
                let key = Self::screenshot_key(record, shot);
                match self.write_with_retry(&key, &shot.bytes).await {
                    Ok(location) => Some(location),
                    Err(e) => {
                        warn!(record_id = %record.id(), "Screenshot not persisted: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let document = serde_json::to_vec_pretty(&PersistedRecord {
            record,
            screenshot_location: screenshot_location.as_deref(),
        })?;

        let key = Self::record_key(record);
        let location = self.write_with_retry(&key, &document).await?;
        info!(record_id = %record.id(), "Record persisted to {}", location);

        Ok(StorageLocation {
            record: location,
            screenshot: screenshot_location,
        })
    }

    async fn write_with_retry(&self, key: &str, data: &[u8]) -> Result<String, SinkError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.storage.save(key, data).await {
                Ok(location) => return Ok(location),
                Err(e) => {
                    let retries_done = attempt - 1;
                    if !e.is_retryable() || !self.retry.should_retry(retries_done) {
                        metrics::counter!(
                            "scrapevision_storage_write_failures_total",
                            "storage" => self.storage.name()
                        )
                        .increment(1);
                        return Err(SinkError::Write {
                            key: key.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let delay = self.retry.calculate_backoff(attempt);
                    warn!(
                        "Storage write for {} failed (attempt {}): {}, retrying in {:?}",
                        key, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
