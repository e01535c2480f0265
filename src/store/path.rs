//! 文档路径适配：类型化更新词汇 → 点号路径的部分写入
//!
//! 引擎内部只使用强类型记录；仅在持久化边界把更新渲染为
//! `phases.<phase>.batches.<id>.abstracts.<uid>.<field>` 形式的叶子 set
//! 与 conversation_log 的追加，两种存储实现共用同一条应用路径。

use serde_json::Value;

use crate::model::{
    BatchTimeReport, ConversationTurn, LikertReport, PhaseName, SataAnswers, ShortAnswers,
    TermEntry,
};
use crate::pipeline::UnitStage;
use crate::store::StoreError;

/// 定位一个单元：阶段 + 批次 + 单元 id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitPath {
    pub phase: PhaseName,
    pub batch_id: u32,
    pub unit_id: String,
}

impl UnitPath {
    pub fn new(phase: PhaseName, batch_id: u32, unit_id: impl Into<String>) -> Self {
        Self {
            phase,
            batch_id,
            unit_id: unit_id.into(),
        }
    }

    pub fn full_type(&self) -> String {
        crate::model::full_type(self.phase, self.batch_id)
    }

    fn prefix(&self) -> String {
        format!(
            "phases.{}.batches.{}.abstracts.{}",
            self.phase.as_str(),
            self.batch_id,
            self.unit_id
        )
    }
}

/// 单元级叶子字段
#[derive(Clone, Debug)]
pub enum UnitField {
    TermFamiliarity(Vec<TermEntry>),
    TimeFamiliarity(f64),
    TimeExtraInfo(f64),
    GeneratedSummary(String),
    ShortAnswers(ShortAnswers),
    SataAnswers(SataAnswers),
    Likert(LikertReport),
    Completed(bool),
}

impl UnitField {
    fn key(&self) -> &'static str {
        match self {
            UnitField::TermFamiliarity(_) => "term_familiarity",
            UnitField::TimeFamiliarity(_) => "time_familiarity",
            UnitField::TimeExtraInfo(_) => "time_extra_info",
            UnitField::GeneratedSummary(_) => "generated_summary",
            UnitField::ShortAnswers(_) => "short_answers",
            UnitField::SataAnswers(_) => "sata_answers",
            UnitField::Likert(_) => "likert",
            UnitField::Completed(_) => "completed",
        }
    }

    fn value(&self) -> Result<Value, StoreError> {
        let v = match self {
            UnitField::TermFamiliarity(terms) => serde_json::to_value(terms)?,
            UnitField::TimeFamiliarity(secs) => serde_json::to_value(secs)?,
            UnitField::TimeExtraInfo(secs) => serde_json::to_value(secs)?,
            UnitField::GeneratedSummary(text) => serde_json::to_value(text)?,
            UnitField::ShortAnswers(answers) => serde_json::to_value(answers)?,
            UnitField::SataAnswers(answers) => serde_json::to_value(answers)?,
            UnitField::Likert(report) => serde_json::to_value(report)?,
            UnitField::Completed(done) => serde_json::to_value(done)?,
        };
        Ok(v)
    }
}

/// 批次级叶子字段
#[derive(Clone, Debug)]
pub enum BatchField {
    Unlocked(bool),
    Completed(bool),
    SeenInstructions(bool),
    TimeCompletion(BatchTimeReport),
    ConfirmedCompletion(bool),
}

impl BatchField {
    fn key(&self) -> &'static str {
        match self {
            BatchField::Unlocked(_) => "unlocked",
            BatchField::Completed(_) => "completed",
            BatchField::SeenInstructions(_) => "seen_instructions",
            BatchField::TimeCompletion(_) => "time_completion",
            BatchField::ConfirmedCompletion(_) => "confirmed_completion",
        }
    }

    fn value(&self) -> Result<Value, StoreError> {
        let v = match self {
            BatchField::Unlocked(b) => serde_json::to_value(b)?,
            BatchField::Completed(b) => serde_json::to_value(b)?,
            BatchField::SeenInstructions(b) => serde_json::to_value(b)?,
            BatchField::TimeCompletion(report) => serde_json::to_value(report)?,
            BatchField::ConfirmedCompletion(b) => serde_json::to_value(b)?,
        };
        Ok(v)
    }
}

/// 一次部分更新；字段级 last-writer-wins
#[derive(Clone, Debug)]
pub enum StoreUpdate {
    SetUnitField {
        path: UnitPath,
        field: UnitField,
    },
    SetBatchField {
        phase: PhaseName,
        batch_id: u32,
        field: BatchField,
    },
    /// conversation_log 追加（append-only）
    PushTurn {
        path: UnitPath,
        turn: ConversationTurn,
    },
    /// 恢复指针三元组整体覆盖
    SetResumePointer {
        page: Option<UnitStage>,
        batch_id: Option<u32>,
        unit_id: Option<String>,
    },
}

impl StoreUpdate {
    /// 渲染为点号路径（日志与排障用；PushTurn / 指针给出代表路径）
    pub fn dotted_path(&self) -> String {
        match self {
            StoreUpdate::SetUnitField { path, field } => {
                format!("{}.{}", path.prefix(), field.key())
            }
            StoreUpdate::SetBatchField {
                phase,
                batch_id,
                field,
            } => format!(
                "phases.{}.batches.{}.{}",
                phase.as_str(),
                batch_id,
                field.key()
            ),
            StoreUpdate::PushTurn { path, .. } => {
                format!("{}.conversation_log", path.prefix())
            }
            StoreUpdate::SetResumePointer { .. } => "last_page".to_string(),
        }
    }
}

/// 把一次更新应用到 JSON 文档上
pub fn apply_update(doc: &mut Value, update: &StoreUpdate) -> Result<(), StoreError> {
    match update {
        StoreUpdate::SetUnitField { path, field } => set_leaf(
            doc,
            &format!("{}.{}", path.prefix(), field.key()),
            field.value()?,
        ),
        StoreUpdate::SetBatchField {
            phase,
            batch_id,
            field,
        } => set_leaf(
            doc,
            &format!(
                "phases.{}.batches.{}.{}",
                phase.as_str(),
                batch_id,
                field.key()
            ),
            field.value()?,
        ),
        StoreUpdate::PushTurn { path, turn } => push_leaf(
            doc,
            &format!("{}.conversation_log", path.prefix()),
            serde_json::to_value(turn)?,
        ),
        StoreUpdate::SetResumePointer {
            page,
            batch_id,
            unit_id,
        } => {
            set_leaf(doc, "last_page", serde_json::to_value(page)?)?;
            set_leaf(doc, "last_batch", serde_json::to_value(batch_id)?)?;
            set_leaf(doc, "last_unit_id", serde_json::to_value(unit_id)?)
        }
    }
}

/// 设置叶子值；中间对象不存在时创建，路径穿过非对象值则报错
fn set_leaf(doc: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, init) = segments
        .split_last()
        .ok_or_else(|| StoreError::BadPath(path.to_string()))?;
    let mut cur = doc;
    for seg in init {
        let obj = cur
            .as_object_mut()
            .ok_or_else(|| StoreError::BadPath(path.to_string()))?;
        cur = obj
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let obj = cur
        .as_object_mut()
        .ok_or_else(|| StoreError::BadPath(path.to_string()))?;
    obj.insert(last.to_string(), value);
    Ok(())
}

/// 向叶子数组追加；数组不存在或为 null 时创建
fn push_leaf(doc: &mut Value, path: &str, value: Value) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, init) = segments
        .split_last()
        .ok_or_else(|| StoreError::BadPath(path.to_string()))?;
    let mut cur = doc;
    for seg in init {
        let obj = cur
            .as_object_mut()
            .ok_or_else(|| StoreError::BadPath(path.to_string()))?;
        cur = obj
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let obj = cur
        .as_object_mut()
        .ok_or_else(|| StoreError::BadPath(path.to_string()))?;
    let slot = obj
        .entry(last.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| StoreError::BadPath(path.to_string()))?
        .push(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParticipantRecord, PhaseName};

    fn doc_with_unit() -> Value {
        let mut record = ParticipantRecord::new("p1");
        let phase = record.phases.entry(PhaseName::Static).or_default();
        let batch = phase.batches.entry(1).or_default();
        batch
            .abstracts
            .insert("12".into(), crate::model::Unit::new("t", "a"));
        serde_json::to_value(&record).unwrap()
    }

    #[test]
    fn set_unit_leaf_touches_only_that_field() {
        let mut doc = doc_with_unit();
        let title_before = doc["phases"]["static"]["batches"]["1"]["abstracts"]["12"]
            ["abstract_title"]
            .clone();
        let update = StoreUpdate::SetUnitField {
            path: UnitPath::new(PhaseName::Static, 1, "12"),
            field: UnitField::GeneratedSummary("rewritten".into()),
        };
        assert_eq!(
            update.dotted_path(),
            "phases.static.batches.1.abstracts.12.generated_summary"
        );
        apply_update(&mut doc, &update).unwrap();
        let unit = &doc["phases"]["static"]["batches"]["1"]["abstracts"]["12"];
        assert_eq!(unit["generated_summary"], "rewritten");
        assert_eq!(unit["abstract_title"], title_before);
    }

    #[test]
    fn push_turn_appends_in_order() {
        let mut doc = doc_with_unit();
        let path = UnitPath::new(PhaseName::Static, 1, "12");
        for content in ["first", "second"] {
            apply_update(
                &mut doc,
                &StoreUpdate::PushTurn {
                    path: path.clone(),
                    turn: ConversationTurn::user(content),
                },
            )
            .unwrap();
        }
        let log = doc["phases"]["static"]["batches"]["1"]["abstracts"]["12"]["conversation_log"]
            .as_array()
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0]["content"], "first");
        assert_eq!(log[1]["content"], "second");
    }

    #[test]
    fn resume_pointer_writes_all_three_leaves() {
        let mut doc = doc_with_unit();
        apply_update(
            &mut doc,
            &StoreUpdate::SetResumePointer {
                page: Some(UnitStage::Questions),
                batch_id: Some(1),
                unit_id: Some("12".into()),
            },
        )
        .unwrap();
        assert_eq!(doc["last_page"], "questions");
        assert_eq!(doc["last_batch"], 1);
        assert_eq!(doc["last_unit_id"], "12");

        apply_update(
            &mut doc,
            &StoreUpdate::SetResumePointer {
                page: None,
                batch_id: None,
                unit_id: None,
            },
        )
        .unwrap();
        assert!(doc["last_page"].is_null());
    }

    #[test]
    fn set_through_scalar_is_rejected() {
        let mut doc = doc_with_unit();
        let err = set_leaf(
            &mut doc,
            "participant_id.nested.leaf",
            Value::Bool(true),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::BadPath(_)));
    }
}
