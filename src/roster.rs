//! 花名册与白名单：CSV 读入、身份门、按参与者透视为嵌套进度记录
//!
//! 登记发生在首次登录：把该参与者的全部分配行按 full_type 透视成
//! 阶段 → 批次 → 单元结构。无法识别的行记日志后跳过，不无痕丢弃。

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{StudyError, ValidationError};
use crate::model::{parse_full_type, ParticipantRecord, SataQuestion, TermEntry, Unit};
use crate::pipeline::PipelineVariant;
use crate::scheduler::StudyPlan;

/// 花名册一行：一位参与者名下的一篇摘要分配
#[derive(Clone, Debug, Deserialize)]
pub struct RosterRow {
    pub user_id: String,
    /// `"{phase}_{batch_id}"`
    pub full_type: String,
    pub abstract_id: String,
    pub abstract_title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// 人工参考重写文本
    #[serde(default)]
    pub human_reference: Option<String>,
    /// 分号分隔的关键术语（词汇阶段）
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub main_idea_question: Option<String>,
    #[serde(default)]
    pub method_question: Option<String>,
    #[serde(default)]
    pub result_question: Option<String>,
    // 五组 SATA 三元列；选项与正确项均分号分隔
    #[serde(default)]
    pub sata_question_1: Option<String>,
    #[serde(default)]
    pub sata_choices_1: Option<String>,
    #[serde(default)]
    pub sata_correct_1: Option<String>,
    #[serde(default)]
    pub sata_question_2: Option<String>,
    #[serde(default)]
    pub sata_choices_2: Option<String>,
    #[serde(default)]
    pub sata_correct_2: Option<String>,
    #[serde(default)]
    pub sata_question_3: Option<String>,
    #[serde(default)]
    pub sata_choices_3: Option<String>,
    #[serde(default)]
    pub sata_correct_3: Option<String>,
    #[serde(default)]
    pub sata_question_4: Option<String>,
    #[serde(default)]
    pub sata_choices_4: Option<String>,
    #[serde(default)]
    pub sata_correct_4: Option<String>,
    #[serde(default)]
    pub sata_question_5: Option<String>,
    #[serde(default)]
    pub sata_choices_5: Option<String>,
    #[serde(default)]
    pub sata_correct_5: Option<String>,
}

impl RosterRow {
    pub fn new(
        user_id: impl Into<String>,
        full_type: impl Into<String>,
        abstract_id: impl Into<String>,
        abstract_title: impl Into<String>,
        abstract_text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            full_type: full_type.into(),
            abstract_id: abstract_id.into(),
            abstract_title: abstract_title.into(),
            abstract_text: abstract_text.into(),
            human_reference: None,
            terms: None,
            main_idea_question: None,
            method_question: None,
            result_question: None,
            sata_question_1: None,
            sata_choices_1: None,
            sata_correct_1: None,
            sata_question_2: None,
            sata_choices_2: None,
            sata_correct_2: None,
            sata_question_3: None,
            sata_choices_3: None,
            sata_correct_3: None,
            sata_question_4: None,
            sata_choices_4: None,
            sata_correct_4: None,
            sata_question_5: None,
            sata_choices_5: None,
            sata_correct_5: None,
        }
    }

    pub fn with_terms(mut self, terms: impl Into<String>) -> Self {
        self.terms = Some(terms.into());
        self
    }

    fn sata_triples(&self) -> [(&Option<String>, &Option<String>, &Option<String>); 5] {
        [
            (&self.sata_question_1, &self.sata_choices_1, &self.sata_correct_1),
            (&self.sata_question_2, &self.sata_choices_2, &self.sata_correct_2),
            (&self.sata_question_3, &self.sata_choices_3, &self.sata_correct_3),
            (&self.sata_question_4, &self.sata_choices_4, &self.sata_correct_4),
            (&self.sata_question_5, &self.sata_choices_5, &self.sata_correct_5),
        ]
    }
}

/// 分号分隔列 → 去空白的非空片段
fn split_semicolons(s: &str) -> Vec<String> {
    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// 白名单 + 分配行
pub struct Roster {
    /// 小写化的被批准身份
    approved: HashSet<String>,
    assignments: Vec<RosterRow>,
}

impl Roster {
    pub fn from_rows(approved: impl IntoIterator<Item = String>, rows: Vec<RosterRow>) -> Self {
        Self {
            approved: approved
                .into_iter()
                .map(|id| id.trim().to_lowercase())
                .filter(|id| !id.is_empty())
                .collect(),
            assignments: rows,
        }
    }

    /// 从两个 CSV 文件读入：白名单（列 participant_id）与分配表
    pub fn load(
        approved_path: impl AsRef<Path>,
        roster_path: impl AsRef<Path>,
    ) -> Result<Self, StudyError> {
        #[derive(Deserialize)]
        struct ApprovedRow {
            participant_id: String,
        }

        let mut approved = Vec::new();
        let mut reader = csv::Reader::from_path(approved_path.as_ref())
            .map_err(|e| StudyError::Integrity(format!("approved ids csv: {e}")))?;
        for row in reader.deserialize::<ApprovedRow>() {
            let row = row.map_err(|e| StudyError::Integrity(format!("approved ids csv: {e}")))?;
            approved.push(row.participant_id);
        }

        let mut assignments = Vec::new();
        let mut reader = csv::Reader::from_path(roster_path.as_ref())
            .map_err(|e| StudyError::Integrity(format!("roster csv: {e}")))?;
        for row in reader.deserialize::<RosterRow>() {
            assignments.push(row.map_err(|e| StudyError::Integrity(format!("roster csv: {e}")))?);
        }

        tracing::info!(
            approved = approved.len(),
            assignments = assignments.len(),
            "roster loaded"
        );
        Ok(Self::from_rows(approved, assignments))
    }

    /// 身份门：大小写不敏感的白名单成员检查
    pub fn is_approved(&self, raw_id: &str) -> bool {
        self.approved.contains(&raw_id.trim().to_lowercase())
    }

    /// 把一位参与者的分配行透视成进度记录；批次是否带锁由计划的口令表决定
    pub fn build_record(
        &self,
        participant_id: &str,
        plan: &StudyPlan,
    ) -> Result<ParticipantRecord, StudyError> {
        let normalized = participant_id.trim().to_lowercase();
        let rows: Vec<&RosterRow> = self
            .assignments
            .iter()
            .filter(|r| r.user_id.trim().to_lowercase() == normalized)
            .collect();
        if rows.is_empty() {
            return Err(StudyError::Integrity(format!(
                "no roster assignments for participant {normalized}"
            )));
        }

        let mut record = ParticipantRecord::new(normalized.clone());
        for row in rows {
            let Some((phase, batch_id)) = parse_full_type(row.full_type.trim()) else {
                tracing::warn!(
                    user_id = %row.user_id,
                    full_type = %row.full_type,
                    abstract_id = %row.abstract_id,
                    "skipping roster row with unrecognized full_type"
                );
                continue;
            };

            let mut unit = Unit::new(row.abstract_title.clone(), row.abstract_text.clone());
            unit.human_reference = row.human_reference.clone();
            unit.main_idea_question = row.main_idea_question.clone();
            unit.method_question = row.method_question.clone();
            unit.result_question = row.result_question.clone();

            if phase.variant() == PipelineVariant::Vocabulary {
                if let Some(terms) = &row.terms {
                    unit.term_familiarity = split_semicolons(terms)
                        .into_iter()
                        .map(TermEntry::new)
                        .collect();
                }
            }

            for (question, choices, correct) in row.sata_triples() {
                let (Some(question), Some(choices), Some(correct)) = (question, choices, correct)
                else {
                    continue;
                };
                let choices = split_semicolons(choices);
                let correct_set: BTreeSet<usize> = split_semicolons(correct)
                    .iter()
                    .filter_map(|answer| {
                        let idx = choices.iter().position(|c| c == answer);
                        if idx.is_none() {
                            tracing::warn!(
                                abstract_id = %row.abstract_id,
                                answer = %answer,
                                "correct answer not among choices, ignoring"
                            );
                        }
                        idx
                    })
                    .collect();
                if choices.is_empty() || correct_set.is_empty() {
                    tracing::warn!(
                        abstract_id = %row.abstract_id,
                        question = %question,
                        "skipping SATA question without usable choices or correct set"
                    );
                    continue;
                }
                unit.sata_questions.push(SataQuestion {
                    prompt: question.trim().to_string(),
                    choices,
                    correct: correct_set,
                });
            }

            let batch = record
                .phases
                .entry(phase)
                .or_default()
                .batches
                .entry(batch_id)
                .or_default();
            batch.unlocked = !plan.requires_passcode(row.full_type.trim());
            batch
                .abstracts
                .insert(row.abstract_id.trim().to_string(), unit);
        }

        if record.phases.is_empty() {
            return Err(StudyError::Integrity(format!(
                "every roster row for participant {normalized} was unusable"
            )));
        }
        Ok(record)
    }

    /// 身份门 + 透视（登录路径用）；未获批准立即拒绝，不创建记录
    pub fn enroll(
        &self,
        raw_id: &str,
        plan: &StudyPlan,
    ) -> Result<ParticipantRecord, StudyError> {
        if !self.is_approved(raw_id) {
            return Err(ValidationError::UnknownIdentity.into());
        }
        self.build_record(raw_id, plan)
    }
}
