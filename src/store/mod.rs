//! 参与者进度存储：统一接口 + 内存 / JSON 文件两种实现
//!
//! 接口面向 JSON 文档：整体读取、整体插入、点号路径的部分更新与
//! conversation_log 追加。字段级 last-writer-wins，不做跨会话加锁。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ParticipantRecord;

pub mod file;
pub mod memory;
pub mod path;

pub use file::JsonFileStore;
pub use memory::MemoryParticipantStore;
pub use path::{apply_update, BatchField, StoreUpdate, UnitField, UnitPath};

/// 存储层错误；任何写失败都会阻断触发它的阶段转移
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("participant record not found: {0}")]
    Missing(String),

    #[error("path not addressable: {0}")]
    BadPath(String),
}

/// 进度文档存储接口
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// 读取整份记录；不存在返回 None
    async fn load(&self, participant_id: &str) -> Result<Option<ParticipantRecord>, StoreError>;

    /// 插入新记录（登记时一次性写入）
    async fn insert(&self, record: &ParticipantRecord) -> Result<(), StoreError>;

    /// 应用一次部分更新；记录不存在返回 Missing
    async fn apply(&self, participant_id: &str, update: StoreUpdate) -> Result<(), StoreError>;
}

/// 创建进度存储：给定目录则为每位参与者一个 JSON 文件，否则退回内存实现
pub fn create_participant_store(root: Option<&Path>) -> Arc<dyn ParticipantStore> {
    match root {
        Some(path) => {
            tracing::info!("Using JSON file participant store: {:?}", path);
            Arc::new(JsonFileStore::new(path))
        }
        None => {
            tracing::info!("Using in-memory participant store");
            Arc::new(MemoryParticipantStore::new())
        }
    }
}
