//! 内存存储：以 JSON 文档形式保存，测试与无盘运行用
//!
//! 与文件实现共用 path::apply_update，保证两边的部分更新语义一致。

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::ParticipantRecord;
use crate::store::{apply_update, ParticipantStore, StoreError, StoreUpdate};

/// participant_id → JSON 文档
#[derive(Default)]
pub struct MemoryParticipantStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantStore for MemoryParticipantStore {
    async fn load(&self, participant_id: &str) -> Result<Option<ParticipantRecord>, StoreError> {
        let docs = self.docs.read().await;
        match docs.get(participant_id) {
            Some(doc) => Ok(Some(serde_json::from_value(doc.clone())?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_value(record)?;
        self.docs
            .write()
            .await
            .insert(record.participant_id.clone(), doc);
        Ok(())
    }

    async fn apply(&self, participant_id: &str, update: StoreUpdate) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(participant_id)
            .ok_or_else(|| StoreError::Missing(participant_id.to_string()))?;
        tracing::debug!(path = %update.dotted_path(), participant_id, "store apply");
        apply_update(doc, &update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParticipantRecord, PhaseName, TermEntry, Unit};
    use crate::store::{UnitField, UnitPath};

    fn seeded_record() -> ParticipantRecord {
        let mut record = ParticipantRecord::new("p1");
        let batch = record
            .phases
            .entry(PhaseName::Static)
            .or_default()
            .batches
            .entry(1)
            .or_default();
        let mut unit = Unit::new("Title", "Abstract text");
        unit.term_familiarity = vec![
            TermEntry::new("genome"),
            TermEntry::new("phenotype"),
            TermEntry::new("allele"),
        ];
        batch.abstracts.insert("12".into(), unit);
        record
    }

    #[tokio::test]
    async fn term_list_round_trips_in_order() {
        let store = MemoryParticipantStore::new();
        store.insert(&seeded_record()).await.unwrap();

        let mut terms = vec![
            TermEntry::new("genome"),
            TermEntry::new("phenotype"),
            TermEntry::new("allele"),
        ];
        for t in &mut terms {
            t.familiarity_score = Some(3);
        }
        store
            .apply(
                "p1",
                StoreUpdate::SetUnitField {
                    path: UnitPath::new(PhaseName::Static, 1, "12"),
                    field: UnitField::TermFamiliarity(terms.clone()),
                },
            )
            .await
            .unwrap();

        let record = store.load("p1").await.unwrap().unwrap();
        let unit = record.unit(PhaseName::Static, 1, "12").unwrap();
        assert_eq!(unit.term_familiarity, terms);
    }

    #[tokio::test]
    async fn apply_on_missing_record_fails() {
        let store = MemoryParticipantStore::new();
        let err = store
            .apply(
                "ghost",
                StoreUpdate::SetUnitField {
                    path: UnitPath::new(PhaseName::Static, 1, "12"),
                    field: UnitField::Completed(true),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }
}
