//! 会话协调：身份门与登记、口令解锁、单元装载与恢复、批次收尾
//!
//! 协调器把调度器与流水线拴在一起：每次进入流水线都先读恢复指针，
//! 在持久化的阶段上原地重建，而不是重开单元。假定同一参与者同一
//! 时刻至多一个活动会话；字段级 last-writer-wins，不加锁。

use std::sync::Arc;

use chrono::Utc;

use crate::error::{StudyError, ValidationError};
use crate::generate::GenerationClient;
use crate::model::{parse_full_type, BatchTimeReport, ParticipantRecord};
use crate::pipeline::{StageLimits, UnitPipeline, UnitStage};
use crate::roster::Roster;
use crate::scheduler::{StudyPlan, WorkItem};
use crate::session::SessionState;
use crate::store::{BatchField, ParticipantStore, StoreUpdate, UnitPath};

/// 一位参与者的活动会话
pub struct StudySession {
    pub session_id: String,
    pub participant_id: String,
    pub record: ParticipantRecord,
    pub state: SessionState,
}

impl std::fmt::Debug for StudySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudySession")
            .field("session_id", &self.session_id)
            .field("participant_id", &self.participant_id)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

pub struct SessionCoordinator {
    store: Arc<dyn ParticipantStore>,
    generator: Arc<dyn GenerationClient>,
    plan: StudyPlan,
    roster: Roster,
    limits: StageLimits,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn ParticipantStore>,
        generator: Arc<dyn GenerationClient>,
        plan: StudyPlan,
        roster: Roster,
        limits: StageLimits,
    ) -> Self {
        Self {
            store,
            generator,
            plan,
            roster,
            limits,
        }
    }

    pub fn plan(&self) -> &StudyPlan {
        &self.plan
    }

    /// 登录：身份门 → 读取或登记记录 → 新会话
    pub async fn login(&self, raw_id: &str) -> Result<StudySession, StudyError> {
        if !self.roster.is_approved(raw_id) {
            return Err(ValidationError::UnknownIdentity.into());
        }
        let participant_id = raw_id.trim().to_lowercase();

        let record = match self.store.load(&participant_id).await? {
            Some(record) => record,
            None => {
                let record = self.roster.build_record(&participant_id, &self.plan)?;
                self.store.insert(&record).await?;
                tracing::info!(participant_id = %participant_id, "participant enrolled");
                record
            }
        };

        Ok(StudySession {
            session_id: format!("session_{}", uuid::Uuid::new_v4()),
            participant_id,
            record,
            state: SessionState::new(),
        })
    }

    /// 调度：当前应进入的批次；全部完成返回 None
    pub fn next_work(&self, session: &StudySession) -> Option<WorkItem> {
        self.plan.next_unit_of_work(&session.record)
    }

    /// 口令解锁。成功落盘 unlocked 并幂等（已解锁直接返回 true）；
    /// 失败不改任何状态，只报告
    pub async fn attempt_unlock(
        &self,
        session: &mut StudySession,
        full_type: &str,
        supplied_code: &str,
    ) -> Result<bool, StudyError> {
        let (phase, batch_id) = parse_full_type(full_type)
            .ok_or_else(|| StudyError::Integrity(format!("unrecognized full_type {full_type}")))?;
        let batch = session
            .record
            .batch(phase, batch_id)
            .ok_or_else(|| StudyError::Integrity(format!("batch {full_type} not in record")))?;
        if batch.unlocked {
            return Ok(true);
        }
        if !self.plan.verify_passcode(full_type, supplied_code) {
            tracing::warn!(
                participant_id = %session.participant_id,
                full_type,
                "wrong passcode"
            );
            return Ok(false);
        }
        self.store
            .apply(
                &session.participant_id,
                StoreUpdate::SetBatchField {
                    phase,
                    batch_id,
                    field: BatchField::Unlocked(true),
                },
            )
            .await?;
        session
            .record
            .batch_mut(phase, batch_id)
            .expect("batch just read")
            .unlocked = true;
        tracing::info!(participant_id = %session.participant_id, full_type, "batch unlocked");
        Ok(true)
    }

    /// 批次说明页已读，只落盘一次
    pub async fn mark_instructions_seen(
        &self,
        session: &mut StudySession,
        full_type: &str,
    ) -> Result<(), StudyError> {
        let (phase, batch_id) = parse_full_type(full_type)
            .ok_or_else(|| StudyError::Integrity(format!("unrecognized full_type {full_type}")))?;
        let batch = session
            .record
            .batch(phase, batch_id)
            .ok_or_else(|| StudyError::Integrity(format!("batch {full_type} not in record")))?;
        if batch.seen_instructions {
            return Ok(());
        }
        self.store
            .apply(
                &session.participant_id,
                StoreUpdate::SetBatchField {
                    phase,
                    batch_id,
                    field: BatchField::SeenInstructions(true),
                },
            )
            .await?;
        session
            .record
            .batch_mut(phase, batch_id)
            .expect("batch just read")
            .seen_instructions = true;
        Ok(())
    }

    /// 装载当前批次的第一个未完成单元；恢复指针指向该单元时在
    /// 持久化的阶段上重建。批次未解锁时唯一允许的操作是 attempt_unlock。
    /// 全部批次完成返回 Ok(None)
    pub async fn begin_unit(
        &self,
        session: &mut StudySession,
    ) -> Result<Option<UnitPipeline>, StudyError> {
        loop {
            let Some(work) = self.plan.next_unit_of_work(&session.record) else {
                return Ok(None);
            };
            if !work.unlocked {
                return Err(ValidationError::BatchLocked {
                    full_type: work.full_type,
                }
                .into());
            }
            let batch = session
                .record
                .batch(work.phase, work.batch_id)
                .ok_or_else(|| {
                    StudyError::Integrity(format!("batch {} not in record", work.full_type))
                })?;

            let Some(unit_id) = batch.first_incomplete_unit() else {
                // 全部单元已完成但批次标志缺位（完成与收尾之间断线）：补记后继续调度
                tracing::warn!(
                    participant_id = %session.participant_id,
                    full_type = %work.full_type,
                    "all units completed but batch flag unset, repairing"
                );
                self.store
                    .apply(
                        &session.participant_id,
                        StoreUpdate::SetBatchField {
                            phase: work.phase,
                            batch_id: work.batch_id,
                            field: BatchField::Completed(true),
                        },
                    )
                    .await?;
                session
                    .record
                    .batch_mut(work.phase, work.batch_id)
                    .expect("batch just read")
                    .completed = true;
                continue;
            };

            let unit = batch
                .abstracts
                .get(&unit_id)
                .cloned()
                .ok_or_else(|| StudyError::Integrity(format!("unit {unit_id} not in batch")))?;
            let resume_at = if session.record.last_batch == Some(work.batch_id)
                && session.record.last_unit_id.as_deref() == Some(unit_id.as_str())
            {
                session.record.last_page
            } else {
                None
            };
            if let Some(stage) = resume_at {
                tracing::info!(
                    participant_id = %session.participant_id,
                    full_type = %work.full_type,
                    unit_id = %unit_id,
                    stage = stage.as_str(),
                    "resuming unit at persisted stage"
                );
            }

            session.state.enter_stage();
            let pipeline = UnitPipeline::new(
                session.participant_id.clone(),
                UnitPath::new(work.phase, work.batch_id, unit_id),
                unit,
                resume_at,
                Arc::clone(&self.store),
                Arc::clone(&self.generator),
                self.limits,
            )?;
            return Ok(Some(pipeline));
        }
    }

    /// 单元终态后的收尾：回写记录、按需置批次完成标志、清恢复指针，
    /// 并重新调度
    pub async fn finish_unit(
        &self,
        session: &mut StudySession,
        pipeline: UnitPipeline,
    ) -> Result<Option<WorkItem>, StudyError> {
        if pipeline.stage() != UnitStage::Completed {
            return Err(ValidationError::WrongStage {
                expected: UnitStage::Completed.as_str(),
                actual: pipeline.stage().as_str(),
            }
            .into());
        }
        let path = pipeline.path().clone();
        let unit = pipeline.into_unit();
        let slot = session
            .record
            .unit_mut(path.phase, path.batch_id, &path.unit_id)
            .ok_or_else(|| {
                StudyError::Integrity(format!("unit {} vanished from record", path.unit_id))
            })?;
        *slot = unit;

        let batch = session
            .record
            .batch(path.phase, path.batch_id)
            .expect("batch of finished unit");
        if batch.all_units_completed() && !batch.completed {
            self.store
                .apply(
                    &session.participant_id,
                    StoreUpdate::SetBatchField {
                        phase: path.phase,
                        batch_id: path.batch_id,
                        field: BatchField::Completed(true),
                    },
                )
                .await?;
            session
                .record
                .batch_mut(path.phase, path.batch_id)
                .expect("batch of finished unit")
                .completed = true;
            tracing::info!(
                participant_id = %session.participant_id,
                full_type = %path.full_type(),
                "batch completed"
            );
        }

        self.store
            .apply(
                &session.participant_id,
                StoreUpdate::SetResumePointer {
                    page: None,
                    batch_id: None,
                    unit_id: None,
                },
            )
            .await?;
        session.record.last_page = None;
        session.record.last_batch = None;
        session.record.last_unit_id = None;
        session.state.reset_for_next_unit();

        Ok(self.plan.next_unit_of_work(&session.record))
    }

    /// 批次自报用时与反馈
    pub async fn record_batch_time(
        &self,
        session: &mut StudySession,
        full_type: &str,
        batch_time_seconds: f64,
        sata_time_seconds: f64,
        feedback: String,
    ) -> Result<(), StudyError> {
        let (phase, batch_id) = parse_full_type(full_type)
            .ok_or_else(|| StudyError::Integrity(format!("unrecognized full_type {full_type}")))?;
        let report = BatchTimeReport {
            batch_time_seconds,
            sata_time_seconds,
            feedback,
            timestamp: Utc::now(),
        };
        self.store
            .apply(
                &session.participant_id,
                StoreUpdate::SetBatchField {
                    phase,
                    batch_id,
                    field: BatchField::TimeCompletion(report.clone()),
                },
            )
            .await?;
        session
            .record
            .batch_mut(phase, batch_id)
            .ok_or_else(|| StudyError::Integrity(format!("batch {full_type} not in record")))?
            .time_completion = Some(report);
        Ok(())
    }

    /// 批次完成确认（参与者是否愿意进入下一阶段）
    pub async fn confirm_batch_completion(
        &self,
        session: &mut StudySession,
        full_type: &str,
        confirmed: bool,
    ) -> Result<(), StudyError> {
        let (phase, batch_id) = parse_full_type(full_type)
            .ok_or_else(|| StudyError::Integrity(format!("unrecognized full_type {full_type}")))?;
        self.store
            .apply(
                &session.participant_id,
                StoreUpdate::SetBatchField {
                    phase,
                    batch_id,
                    field: BatchField::ConfirmedCompletion(confirmed),
                },
            )
            .await?;
        session
            .record
            .batch_mut(phase, batch_id)
            .ok_or_else(|| StudyError::Integrity(format!("batch {full_type} not in record")))?
            .confirmed_completion = Some(confirmed);
        Ok(())
    }
}
