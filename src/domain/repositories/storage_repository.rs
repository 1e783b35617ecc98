// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 目标键已存在，记录不会被覆盖
    #[error("Key already exists: {0}")]
    AlreadyExists(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// 存储错误
    #[error("Storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// 判断错误是否可重试
    ///
    /// 键冲突和序列化错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput
            ),
            StorageError::AlreadyExists(_) | StorageError::Serialization(_) => false,
            StorageError::Other(_) => true,
        }
    }
}

/// 存储仓库特质
///
/// 定义结果落盘的数据访问接口
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// 使用指定键保存数据，返回可读的存储位置；键已存在时返回 `AlreadyExists`
    async fn save(&self, key: &str, data: &[u8]) -> Result<String, StorageError>;

    /// 存储类型名称
    fn name(&self) -> &'static str;
}
