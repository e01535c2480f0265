//! 单元任务流水线：带守卫的阶段转移与逐转移落盘
//!
//! 每个在进行中的单元持有一条流水线。所有转移先持久化后改状态，
//! 写失败即阻断转移；completed 只在确认提交时置位一次。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{StudyError, ValidationError};
use crate::generate::{chat_request, summary_request, GenerationClient, GenerationError};
use crate::model::{
    ComparisonRatings, ConversationTurn, ExtraInfo, LikertReport, SataAnswers, ShortAnswers,
    TurnRole, Unit, BASE_SCALES, CHATBOT_SCALES,
};
use crate::pipeline::{PipelineVariant, QuestionTimers, UnitStage};
use crate::store::{ParticipantStore, StoreUpdate, UnitField, UnitPath};

/// 阶段门槛（来自 [study] 配置）
#[derive(Clone, Copy, Debug)]
pub struct StageLimits {
    /// 简答题最少字符数
    pub min_answer_chars: usize,
    /// 进入生成前最少用户提问轮数
    pub min_user_turns: usize,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            min_answer_chars: 75,
            min_user_turns: 3,
        }
    }
}

/// 一个活动单元的状态机
pub struct UnitPipeline {
    participant_id: String,
    path: UnitPath,
    variant: PipelineVariant,
    stage: UnitStage,
    unit: Unit,
    /// 对比评分草稿；提交确认后进入 LikertReport
    ratings: ComparisonRatings,
    completion_requested: bool,
    store: Arc<dyn ParticipantStore>,
    generator: Arc<dyn GenerationClient>,
    limits: StageLimits,
}

impl std::fmt::Debug for UnitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitPipeline")
            .field("participant_id", &self.participant_id)
            .field("path", &self.path)
            .field("variant", &self.variant)
            .field("stage", &self.stage)
            .field("unit", &self.unit)
            .field("ratings", &self.ratings)
            .field("completion_requested", &self.completion_requested)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl UnitPipeline {
    /// 装载一个未完成单元；resume_at 指向本变体的合法阶段时原地恢复，
    /// 否则回到初始阶段
    pub fn new(
        participant_id: impl Into<String>,
        path: UnitPath,
        unit: Unit,
        resume_at: Option<UnitStage>,
        store: Arc<dyn ParticipantStore>,
        generator: Arc<dyn GenerationClient>,
        limits: StageLimits,
    ) -> Result<Self, StudyError> {
        if unit.completed {
            return Err(ValidationError::AlreadyCompleted.into());
        }
        let variant = path.phase.variant();
        let stage = match resume_at {
            Some(s) if s != UnitStage::Completed && variant.contains(s) => s,
            Some(s) => {
                tracing::warn!(
                    stage = s.as_str(),
                    full_type = %path.full_type(),
                    "resume pointer does not fit pipeline variant, restarting unit"
                );
                variant.initial_stage()
            }
            None => variant.initial_stage(),
        };
        Ok(Self {
            participant_id: participant_id.into(),
            path,
            variant,
            stage,
            unit,
            ratings: ComparisonRatings::default(),
            completion_requested: false,
            store,
            generator,
            limits,
        })
    }

    pub fn stage(&self) -> UnitStage {
        self.stage
    }

    pub fn variant(&self) -> PipelineVariant {
        self.variant
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn into_unit(self) -> Unit {
        self.unit
    }

    pub fn path(&self) -> &UnitPath {
        &self.path
    }

    pub fn completion_requested(&self) -> bool {
        self.completion_requested
    }

    pub fn ratings(&self) -> &ComparisonRatings {
        &self.ratings
    }

    pub fn is_sata(&self) -> bool {
        self.unit.uses_sata()
    }

    pub fn question_count(&self) -> usize {
        if self.is_sata() {
            self.unit.sata_questions.len()
        } else {
            3
        }
    }

    /// 对比阶段必答量表；会话变体附加 chatbot 两项
    pub fn required_scales(&self) -> Vec<&'static str> {
        let mut scales = BASE_SCALES.to_vec();
        if self.variant == PipelineVariant::Conversational {
            scales.extend(CHATBOT_SCALES);
        }
        scales
    }

    fn require_stage(&self, expected: UnitStage) -> Result<(), ValidationError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(ValidationError::WrongStage {
                expected: expected.as_str(),
                actual: self.stage.as_str(),
            })
        }
    }

    async fn flush(&self, update: StoreUpdate) -> Result<(), StudyError> {
        Ok(self.store.apply(&self.participant_id, update).await?)
    }

    async fn flush_unit_field(&self, field: UnitField) -> Result<(), StudyError> {
        self.flush(StoreUpdate::SetUnitField {
            path: self.path.clone(),
            field,
        })
        .await
    }

    async fn flush_pointer(&self, page: UnitStage) -> Result<(), StudyError> {
        self.flush(StoreUpdate::SetResumePointer {
            page: Some(page),
            batch_id: Some(self.path.batch_id),
            unit_id: Some(self.path.unit_id.clone()),
        })
        .await
    }

    // ----- 词汇变体：术语熟悉度 -----

    /// 为第 index 个术语打分（1..=5）
    pub fn set_familiarity(&mut self, index: usize, score: u8) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Familiarity)?;
        if !(1..=5).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange { score }.into());
        }
        let term = self
            .unit
            .term_familiarity
            .get_mut(index)
            .ok_or_else(|| StudyError::Integrity(format!("term index {index} out of range")))?;
        term.familiarity_score = Some(score);
        Ok(())
    }

    /// Familiarity → ExtraInfo：所有术语都已打分才放行，不做部分推进
    pub async fn advance_from_familiarity(&mut self, time_spent_secs: f64) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Familiarity)?;
        if let Some(t) = self
            .unit
            .term_familiarity
            .iter()
            .find(|t| t.familiarity_score.is_none())
        {
            return Err(ValidationError::TermUnrated {
                term: t.term.clone(),
            }
            .into());
        }
        self.flush_unit_field(UnitField::TermFamiliarity(self.unit.term_familiarity.clone()))
            .await?;
        self.flush_unit_field(UnitField::TimeFamiliarity(time_spent_secs))
            .await?;
        self.flush_pointer(UnitStage::ExtraInfo).await?;
        self.unit.time_familiarity = time_spent_secs;
        self.stage = UnitStage::ExtraInfo;
        Ok(())
    }

    /// 覆盖第 index 个术语的补充信息集合
    pub fn set_extra_info(
        &mut self,
        index: usize,
        info: BTreeSet<ExtraInfo>,
    ) -> Result<(), StudyError> {
        self.require_stage(UnitStage::ExtraInfo)?;
        let term = self
            .unit
            .term_familiarity
            .get_mut(index)
            .ok_or_else(|| StudyError::Integrity(format!("term index {index} out of range")))?;
        term.extra_information = info;
        Ok(())
    }

    /// ExtraInfo → Questions：每个术语的集合非空；落盘最终术语记录与停留用时
    pub async fn advance_from_extra_info(&mut self, time_spent_secs: f64) -> Result<(), StudyError> {
        self.require_stage(UnitStage::ExtraInfo)?;
        if let Some(t) = self
            .unit
            .term_familiarity
            .iter()
            .find(|t| t.extra_information.is_empty())
        {
            return Err(ValidationError::TermMissingExtraInfo {
                term: t.term.clone(),
            }
            .into());
        }
        self.flush_unit_field(UnitField::TermFamiliarity(self.unit.term_familiarity.clone()))
            .await?;
        self.flush_unit_field(UnitField::TimeExtraInfo(time_spent_secs))
            .await?;
        self.flush_pointer(UnitStage::Questions).await?;
        self.unit.time_extra_info = time_spent_secs;
        self.stage = UnitStage::Questions;
        Ok(())
    }

    // ----- 会话变体：问答与生成 -----

    /// 一轮问答：调用生成服务取得回复，成功后两条消息按序追加落盘
    pub async fn user_turn(&mut self, text: &str) -> Result<String, StudyError> {
        self.require_stage(UnitStage::Conversation)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let reply = self
            .generator
            .complete(&chat_request(&self.unit, text))
            .await?;

        let user_turn = ConversationTurn::user(text);
        let assistant_turn = ConversationTurn::assistant(reply.clone());
        self.flush(StoreUpdate::PushTurn {
            path: self.path.clone(),
            turn: user_turn.clone(),
        })
        .await?;
        self.flush(StoreUpdate::PushTurn {
            path: self.path.clone(),
            turn: assistant_turn.clone(),
        })
        .await?;
        self.unit.conversation_log.push(user_turn);
        self.unit.conversation_log.push(assistant_turn);
        Ok(reply)
    }

    pub fn user_turn_count(&self) -> usize {
        self.unit
            .conversation_log
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .count()
    }

    /// Conversation → Generating：至少 min_user_turns 轮用户提问；
    /// 对话在此之后不再可改
    pub async fn finish_conversation(&mut self) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Conversation)?;
        let have = self.user_turn_count();
        if have < self.limits.min_user_turns {
            return Err(ValidationError::TooFewUserTurns {
                have,
                need: self.limits.min_user_turns,
            }
            .into());
        }
        self.flush_pointer(UnitStage::Generating).await?;
        self.stage = UnitStage::Generating;
        Ok(())
    }

    /// Generating：对生成服务的一次同步调用；失败时阶段原地不动，
    /// 可在不重新收集对话的情况下手动重试
    pub async fn run_generation(&mut self) -> Result<String, StudyError> {
        self.require_stage(UnitStage::Generating)?;
        let summary = self
            .generator
            .complete(&summary_request(&self.unit))
            .await?;
        if summary.trim().is_empty() {
            return Err(GenerationError::EmptyResponse.into());
        }

        self.flush_unit_field(UnitField::GeneratedSummary(summary.clone()))
            .await?;
        self.flush_pointer(UnitStage::Questions).await?;
        self.unit.generated_summary = Some(summary.clone());
        self.stage = UnitStage::Questions;
        tracing::info!(
            participant_id = %self.participant_id,
            full_type = %self.path.full_type(),
            unit_id = %self.path.unit_id,
            "summary generated"
        );
        Ok(summary)
    }

    // ----- 作答阶段 -----

    /// 简答草稿；往返导航不清空
    pub fn set_short_answer(&mut self, index: usize, text: &str) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Questions)?;
        if self.is_sata() {
            return Err(StudyError::Integrity(
                "unit uses select-all-that-apply questions".into(),
            ));
        }
        let answers = self.unit.short_answers.get_or_insert_with(Default::default);
        match index {
            0 => answers.main_idea = text.to_string(),
            1 => answers.methods = text.to_string(),
            2 => answers.results = text.to_string(),
            _ => {
                return Err(StudyError::Integrity(format!(
                    "question index {index} out of range"
                )))
            }
        }
        Ok(())
    }

    pub fn short_answer(&self, index: usize) -> &str {
        match (&self.unit.short_answers, index) {
            (Some(a), 0) => &a.main_idea,
            (Some(a), 1) => &a.methods,
            (Some(a), 2) => &a.results,
            _ => "",
        }
    }

    /// 覆盖第 question 题的选中集合
    pub fn set_sata_selection(
        &mut self,
        question: usize,
        selection: BTreeSet<usize>,
    ) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Questions)?;
        let q = self
            .unit
            .sata_questions
            .get(question)
            .ok_or_else(|| StudyError::Integrity(format!("question index {question} out of range")))?;
        if let Some(bad) = selection.iter().find(|i| **i >= q.choices.len()) {
            return Err(StudyError::Integrity(format!(
                "choice index {bad} out of range for question {question}"
            )));
        }
        let answers = self.unit.sata_answers.get_or_insert_with(Default::default);
        answers
            .selections
            .resize(self.unit.sata_questions.len(), Default::default());
        answers.selections[question] = selection;
        Ok(())
    }

    /// Questions → Comparison：简答逐题 ≥ min_answer_chars，
    /// SATA 逐题至少选一项；分题用时随提交落盘
    pub async fn submit_answers(
        &mut self,
        timers: &mut QuestionTimers,
    ) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Questions)?;
        timers.pause();

        if self.is_sata() {
            let count = self.unit.sata_questions.len();
            let mut selections = self
                .unit
                .sata_answers
                .as_ref()
                .map(|a| a.selections.clone())
                .unwrap_or_default();
            selections.resize(count, Default::default());
            if let Some(index) = selections.iter().position(|s| s.is_empty()) {
                return Err(ValidationError::NoOptionSelected { index }.into());
            }
            let answers = SataAnswers {
                selections,
                submitted_at: Some(Utc::now()),
                time_per_question: (0..count).map(|i| timers.elapsed_secs(i)).collect(),
            };
            self.flush_unit_field(UnitField::SataAnswers(answers.clone())).await?;
            self.flush_pointer(UnitStage::Comparison).await?;
            self.unit.sata_answers = Some(answers);
        } else {
            let draft = self.unit.short_answers.clone().unwrap_or_default();
            let trimmed = [
                draft.main_idea.trim(),
                draft.methods.trim(),
                draft.results.trim(),
            ];
            for (index, answer) in trimmed.iter().enumerate() {
                let len = answer.chars().count();
                if len < self.limits.min_answer_chars {
                    return Err(ValidationError::AnswerTooShort {
                        index,
                        len,
                        min: self.limits.min_answer_chars,
                    }
                    .into());
                }
            }
            let answers = ShortAnswers {
                main_idea: trimmed[0].to_string(),
                methods: trimmed[1].to_string(),
                results: trimmed[2].to_string(),
                submitted_at: Some(Utc::now()),
                time_main_idea: timers.elapsed_secs(0),
                time_method: timers.elapsed_secs(1),
                time_result: timers.elapsed_secs(2),
            };
            self.flush_unit_field(UnitField::ShortAnswers(answers.clone())).await?;
            self.flush_pointer(UnitStage::Comparison).await?;
            self.unit.short_answers = Some(answers);
        }

        self.stage = UnitStage::Comparison;
        Ok(())
    }

    /// Comparison → Questions：提交前允许回退一个阶段；已填内容保留
    pub async fn back_to_questions(&mut self) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Comparison)?;
        self.completion_requested = false;
        self.flush_pointer(UnitStage::Questions).await?;
        self.stage = UnitStage::Questions;
        Ok(())
    }

    // ----- 对比评分与终态提交 -----

    pub fn set_rating(&mut self, scale: &str, value: u8) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Comparison)?;
        if !self.ratings.set(scale, value) {
            return Err(ValidationError::BadRating {
                scale: scale.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// 第一步：全部必答量表就绪后登记提交意向（"确定要继续吗"）
    pub fn request_completion(&mut self) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Comparison)?;
        if let Some(scale) = self.ratings.first_missing(&self.required_scales()) {
            return Err(ValidationError::MissingRating { scale }.into());
        }
        self.completion_requested = true;
        Ok(())
    }

    /// 参与者点了"否"：撤回提交意向，留在对比阶段
    pub fn cancel_completion(&mut self) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Comparison)?;
        self.completion_requested = false;
        Ok(())
    }

    /// 第二步：不可逆提交。落盘评分报告并将 completed 置位（仅此一处），
    /// 此后单元不可回访
    pub async fn confirm_completion(&mut self, time_spent_secs: f64) -> Result<(), StudyError> {
        self.require_stage(UnitStage::Comparison)?;
        if !self.completion_requested {
            return Err(ValidationError::ConfirmationRequired.into());
        }
        let report = LikertReport {
            timestamp: Utc::now(),
            time_spent_seconds: time_spent_secs,
            responses: self.ratings.clone(),
        };
        self.flush_unit_field(UnitField::Likert(report.clone())).await?;
        self.flush_unit_field(UnitField::Completed(true)).await?;
        self.flush_pointer(UnitStage::Completed).await?;
        self.unit.likert = Some(report);
        self.unit.completed = true;
        self.stage = UnitStage::Completed;
        tracing::info!(
            participant_id = %self.participant_id,
            full_type = %self.path.full_type(),
            unit_id = %self.path.unit_id,
            "unit completed"
        );
        Ok(())
    }
}
