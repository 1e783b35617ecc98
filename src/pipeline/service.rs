// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use crate::domain::models::scrape_record::{ScrapeRecord, ScrapeStatus};
use crate::domain::models::scrape_request::ScrapeRequest;
use crate::pipeline::cancel::{CancelHandle, CancelToken};
use crate::pipeline::governor::ConcurrencyGovernor;
use crate::pipeline::orchestrator::{PipelineOrchestrator, PipelineRun};
use crate::pipeline::policy::PipelinePolicy;
use crate::pipeline::sink::{ResultSink, StorageLocation};
use crate::utils::errors::{ConfigurationError, ErrorKind};

/// 落盘结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Persistence {
    Stored(StorageLocation),
    Failed { kind: ErrorKind, message: String },
}

/// 调用方拿到的最终结果
///
/// 即使落盘失败，记录本身仍然完整可用
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub record: ScrapeRecord,
    pub persistence: Persistence,
}

impl ScrapeOutcome {
    pub fn status(&self) -> ScrapeStatus {
        self.record.status()
    }

    pub fn location(&self) -> Option<&StorageLocation> {
        match &self.persistence {
            Persistence::Stored(location) => Some(location),
            Persistence::Failed { .. } => None,
        }
    }

    /// 落盘失败时的错误信息
    pub fn storage_error(&self) -> Option<&str> {
        match &self.persistence {
            Persistence::Stored(_) => None,
            Persistence::Failed { message, .. } => Some(message),
        }
    }
}

/// 后台运行的抓取请求句柄
pub struct ScrapeHandle {
    cancel: CancelHandle,
    task: JoinHandle<ScrapeOutcome>,
}

impl ScrapeHandle {
    /// 取消请求：排队中则不再执行，运行中则中止当前阶段
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// 等待最终结果
    pub async fn outcome(self) -> Result<ScrapeOutcome, JoinError> {
        self.task.await
    }
}

struct ServiceInner {
    orchestrator: PipelineOrchestrator,
    governor: ConcurrencyGovernor,
    sink: ResultSink,
    policy: PipelinePolicy,
}

/// 抓取服务
///
/// 串联 并发调控 → 流水线编排 → 结果落盘
#[derive(Clone)]
pub struct ScrapeService {
    inner: Arc<ServiceInner>,
}

impl ScrapeService {
    pub fn new(
        orchestrator: PipelineOrchestrator,
        sink: ResultSink,
        policy: PipelinePolicy,
    ) -> Result<Self, ConfigurationError> {
        let governor = ConcurrencyGovernor::from_policy(&policy)?;
        Ok(Self {
            inner: Arc::new(ServiceInner {
                orchestrator,
                governor,
                sink,
                policy,
            }),
        })
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.inner.governor
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.inner.policy
    }

    /// 停止接受新请求：排队中的请求按取消处理，运行中的请求照常完成
    pub fn shutdown(&self) {
        self.inner.governor.close();
    }

    /// 提交请求并等待结果，永不失败
    pub async fn submit(&self, request: ScrapeRequest) -> ScrapeOutcome {
        self.submit_cancellable(request, CancelToken::never()).await
    }

    /// 提交可取消的请求
    pub async fn submit_cancellable(
        &self,
        request: ScrapeRequest,
        cancel: CancelToken,
    ) -> ScrapeOutcome {
        let inner = &self.inner;

        let run = match inner.governor.admit_cancellable(&cancel).await {
            Ok(permit) => {
                let run = inner
                    .orchestrator
                    .execute(&request, &inner.policy, &cancel)
                    .await;
                inner.governor.release(permit);
                run
            }
            Err(reason) => {
                debug!(url = %request.url(), "Request not admitted: {}", reason);
                PipelineRun {
                    record: inner.orchestrator.cancelled_record(&request, &inner.policy),
                    screenshot: None,
                }
            }
        };

        let persistence = match inner.sink.persist(&run.record, run.screenshot.as_ref()).await {
            Ok(location) => Persistence::Stored(location),
            Err(e) => {
                error!(record_id = %run.record.id(), "Failed to persist record: {}", e);
                Persistence::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };

        ScrapeOutcome {
            record: run.record,
            persistence,
        }
    }

    /// 在后台运行请求，返回可取消的句柄
    pub fn spawn(&self, request: ScrapeRequest) -> ScrapeHandle {
        let cancel = CancelHandle::new();
        let token = cancel.token();
        let service = self.clone();
        let task = tokio::spawn(async move { service.submit_cancellable(request, token).await });
        ScrapeHandle { cancel, task }
    }

    /// 批量提交，结果顺序与请求顺序一致
    pub async fn submit_batch(&self, requests: Vec<ScrapeRequest>) -> Vec<ScrapeOutcome> {
        join_all(requests.into_iter().map(|request| self.submit(request))).await
    }
}
