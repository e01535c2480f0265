//! 参与者进度记录：阶段 → 批次 → 单元的强类型嵌套文档
//!
//! 持久化文档与本模块一一对应；点号路径的部分更新见 store::path。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::unit::Unit;
use crate::pipeline::{PipelineVariant, UnitStage};

/// 实验阶段（三个顶层条件）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    Static,
    Interactive,
    Finetuned,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Static => "static",
            PhaseName::Interactive => "interactive",
            PhaseName::Finetuned => "finetuned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(PhaseName::Static),
            "interactive" => Some(PhaseName::Interactive),
            "finetuned" => Some(PhaseName::Finetuned),
            _ => None,
        }
    }

    /// static 走词汇变体；interactive 与 finetuned 只在生成后端上不同，流水线同为会话变体
    pub fn variant(&self) -> PipelineVariant {
        match self {
            PhaseName::Static => PipelineVariant::Vocabulary,
            PhaseName::Interactive | PhaseName::Finetuned => PipelineVariant::Conversational,
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"{phase}_{batch_id}"` 组合键
pub fn full_type(phase: PhaseName, batch_id: u32) -> String {
    format!("{}_{}", phase.as_str(), batch_id)
}

/// 解析 full_type；阶段名或批次号不合法时返回 None
pub fn parse_full_type(s: &str) -> Option<(PhaseName, u32)> {
    let (phase, batch) = s.rsplit_once('_')?;
    Some((PhaseName::parse(phase)?, batch.parse().ok()?))
}

/// 批次的自报用时与反馈
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchTimeReport {
    pub batch_time_seconds: f64,
    pub sata_time_seconds: f64,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

/// 口令门控的单元分组；completed 是调度推进的唯一依据
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub seen_instructions: bool,
    #[serde(default)]
    pub abstracts: BTreeMap<String, Unit>,
    #[serde(default)]
    pub time_completion: Option<BatchTimeReport>,
    #[serde(default)]
    pub confirmed_completion: Option<bool>,
}

impl Batch {
    /// 单元按数字 id 升序（非数字 id 排在末尾，按字典序）
    pub fn ordered_unit_ids(&self) -> Vec<String> {
        let mut ids: Vec<&String> = self.abstracts.keys().collect();
        ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), (*id).clone()));
        ids.into_iter().cloned().collect()
    }

    pub fn first_incomplete_unit(&self) -> Option<String> {
        self.ordered_unit_ids()
            .into_iter()
            .find(|id| !self.abstracts[id].completed)
    }

    pub fn all_units_completed(&self) -> bool {
        self.abstracts.values().all(|u| u.completed)
    }
}

/// 一个阶段名下的全部批次
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhaseRecord {
    #[serde(default)]
    pub batches: BTreeMap<u32, Batch>,
}

/// 每位登记参与者一份；键为小写化身份
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub participant_id: String,
    pub created_at: DateTime<Utc>,
    pub accepted_terms: bool,
    #[serde(default)]
    pub phases: BTreeMap<PhaseName, PhaseRecord>,
    /// 断线恢复指针（全部可空）
    #[serde(default)]
    pub last_page: Option<UnitStage>,
    #[serde(default)]
    pub last_batch: Option<u32>,
    #[serde(default)]
    pub last_unit_id: Option<String>,
}

impl ParticipantRecord {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            created_at: Utc::now(),
            accepted_terms: true,
            phases: BTreeMap::new(),
            last_page: None,
            last_batch: None,
            last_unit_id: None,
        }
    }

    pub fn batch(&self, phase: PhaseName, batch_id: u32) -> Option<&Batch> {
        self.phases.get(&phase)?.batches.get(&batch_id)
    }

    pub fn batch_mut(&mut self, phase: PhaseName, batch_id: u32) -> Option<&mut Batch> {
        self.phases.get_mut(&phase)?.batches.get_mut(&batch_id)
    }

    pub fn unit(&self, phase: PhaseName, batch_id: u32, unit_id: &str) -> Option<&Unit> {
        self.batch(phase, batch_id)?.abstracts.get(unit_id)
    }

    pub fn unit_mut(&mut self, phase: PhaseName, batch_id: u32, unit_id: &str) -> Option<&mut Unit> {
        self.batch_mut(phase, batch_id)?.abstracts.get_mut(unit_id)
    }
}
