//! 进度调度：全局固定批次顺序与口令门
//!
//! 顺序表与口令表来自配置（不嵌在任何界面代码里）。调度只看批次的
//! completed 标志：按序返回第一个未完成批次，全部完成返回 None；
//! 已完成的批次永不回访。

use std::collections::HashMap;

use crate::error::StudyError;
use crate::model::{parse_full_type, ParticipantRecord, PhaseName};

/// 调度结果：参与者当前应进入的批次
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub phase: PhaseName,
    pub batch_id: u32,
    pub full_type: String,
    pub unlocked: bool,
}

/// 全局批次顺序 + 口令表
#[derive(Debug)]
pub struct StudyPlan {
    /// (phase, batch_id, full_type)，构造时已验证
    order: Vec<(PhaseName, u32, String)>,
    /// 表中无条目即无需口令
    passcodes: HashMap<String, String>,
}

impl StudyPlan {
    /// 构造并验证：顺序表里的 token 必须可解析，且首个批次不得配置口令
    /// （首批次按构造即解锁）
    pub fn new(
        order: Vec<String>,
        passcodes: HashMap<String, String>,
    ) -> Result<Self, StudyError> {
        let mut parsed = Vec::with_capacity(order.len());
        for token in order {
            let (phase, batch_id) = parse_full_type(&token).ok_or_else(|| {
                StudyError::Integrity(format!("unrecognized full_type in batch order: {token}"))
            })?;
            parsed.push((phase, batch_id, token));
        }
        if let Some((_, _, first)) = parsed.first() {
            if passcodes.contains_key(first) {
                return Err(StudyError::Integrity(format!(
                    "first batch {first} must not require a passcode"
                )));
            }
        }
        Ok(Self {
            order: parsed,
            passcodes,
        })
    }

    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|(_, _, ft)| ft.as_str())
    }

    pub fn requires_passcode(&self, full_type: &str) -> bool {
        self.passcodes.contains_key(full_type)
    }

    /// 大小写敏感的精确比较；计划外的 full_type 一律拒绝
    pub fn verify_passcode(&self, full_type: &str, supplied: &str) -> bool {
        match self.passcodes.get(full_type) {
            Some(code) => code == supplied,
            None => false,
        }
    }

    /// 按全局顺序取第一个未完成批次；参与者没有的批次跳过
    pub fn next_unit_of_work(&self, record: &ParticipantRecord) -> Option<WorkItem> {
        for (phase, batch_id, ft) in &self.order {
            let Some(batch) = record.batch(*phase, *batch_id) else {
                continue;
            };
            if !batch.completed {
                return Some(WorkItem {
                    phase: *phase,
                    batch_id: *batch_id,
                    full_type: ft.clone(),
                    unlocked: batch.unlocked,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Batch, Unit};

    fn plan() -> StudyPlan {
        StudyPlan::new(
            vec![
                "static_1".into(),
                "interactive_3".into(),
                "finetuned_5".into(),
            ],
            HashMap::from([
                ("interactive_3".to_string(), "DOG721".to_string()),
                ("finetuned_5".to_string(), "CAT264".to_string()),
            ]),
        )
        .unwrap()
    }

    fn record_with_batches(specs: &[(PhaseName, u32, bool, bool)]) -> ParticipantRecord {
        let mut record = ParticipantRecord::new("p1");
        for (phase, batch_id, unlocked, completed) in specs {
            let mut batch = Batch {
                unlocked: *unlocked,
                completed: *completed,
                ..Batch::default()
            };
            batch.abstracts.insert("1".into(), Unit::new("t", "a"));
            record
                .phases
                .entry(*phase)
                .or_default()
                .batches
                .insert(*batch_id, batch);
        }
        record
    }

    #[test]
    fn first_incomplete_in_fixed_order() {
        let record = record_with_batches(&[
            (PhaseName::Static, 1, true, true),
            (PhaseName::Interactive, 3, false, false),
            (PhaseName::Finetuned, 5, false, false),
        ]);
        let work = plan().next_unit_of_work(&record).unwrap();
        assert_eq!(work.full_type, "interactive_3");
        assert!(!work.unlocked);
    }

    #[test]
    fn missing_batches_are_skipped() {
        // 花名册没给 interactive_3，直接落到 finetuned_5
        let record = record_with_batches(&[
            (PhaseName::Static, 1, true, true),
            (PhaseName::Finetuned, 5, false, false),
        ]);
        let work = plan().next_unit_of_work(&record).unwrap();
        assert_eq!(work.full_type, "finetuned_5");
    }

    #[test]
    fn none_when_everything_completed() {
        let record = record_with_batches(&[
            (PhaseName::Static, 1, true, true),
            (PhaseName::Interactive, 3, true, true),
            (PhaseName::Finetuned, 5, true, true),
        ]);
        assert_eq!(plan().next_unit_of_work(&record), None);
    }

    #[test]
    fn passcode_is_exact_and_case_sensitive() {
        let plan = plan();
        assert!(plan.verify_passcode("interactive_3", "DOG721"));
        assert!(!plan.verify_passcode("interactive_3", "dog721"));
        assert!(!plan.verify_passcode("interactive_3", "DOG721 "));
        assert!(!plan.verify_passcode("static_1", "DOG721"));
        assert!(!plan.verify_passcode("unknown_9", "DOG721"));
    }

    #[test]
    fn first_batch_with_passcode_is_rejected() {
        let err = StudyPlan::new(
            vec!["static_1".into()],
            HashMap::from([("static_1".to_string(), "X".to_string())]),
        )
        .unwrap_err();
        assert!(matches!(err, StudyError::Integrity(_)));
    }

    #[test]
    fn bad_order_token_is_rejected() {
        let err = StudyPlan::new(vec!["warmup_1".into()], HashMap::new()).unwrap_err();
        assert!(matches!(err, StudyError::Integrity(_)));
    }
}
