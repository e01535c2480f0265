//! JSON 文件存储：每位参与者一个文件，读-改-写走同一条部分更新路径
//!
//! 文件不存在视为无记录；父目录不存在时自动创建。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::model::ParticipantRecord;
use crate::store::{apply_update, ParticipantStore, StoreError, StoreUpdate};

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn record_path(&self, participant_id: &str) -> PathBuf {
        self.root.join(format!("{participant_id}.json"))
    }

    fn read_doc(&self, participant_id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.record_path(participant_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn write_doc(&self, participant_id: &str, doc: &Value) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(
            self.record_path(participant_id),
            serde_json::to_string_pretty(doc)?,
        )?;
        Ok(())
    }
}

#[async_trait]
impl ParticipantStore for JsonFileStore {
    async fn load(&self, participant_id: &str) -> Result<Option<ParticipantRecord>, StoreError> {
        match self.read_doc(participant_id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_value(record)?;
        self.write_doc(&record.participant_id, &doc)
    }

    async fn apply(&self, participant_id: &str, update: StoreUpdate) -> Result<(), StoreError> {
        let mut doc = self
            .read_doc(participant_id)?
            .ok_or_else(|| StoreError::Missing(participant_id.to_string()))?;
        tracing::debug!(path = %update.dotted_path(), participant_id, "store apply");
        apply_update(&mut doc, &update)?;
        self.write_doc(participant_id, &doc)
    }
}
