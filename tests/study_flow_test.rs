//! 全流程集成测试：登记 → 批次调度 → 口令解锁 → 单元流水线 → 断线恢复

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use plstudy::error::{StudyError, ValidationError};
use plstudy::generate::{ChatMessage, GenerationClient, GenerationError, MockGenerationClient};
use plstudy::model::{ExtraInfo, PhaseName, BASE_SCALES, CHATBOT_SCALES};
use plstudy::pipeline::{QuestionTimers, StageLimits, UnitPipeline, UnitStage};
use plstudy::roster::{Roster, RosterRow};
use plstudy::scheduler::StudyPlan;
use plstudy::session::{SessionCoordinator, StudySession};
use plstudy::store::{MemoryParticipantStore, ParticipantStore};

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

fn roster() -> Roster {
    let mut interactive = RosterRow::new(
        "p1",
        "interactive_3",
        "7",
        "Sleep study",
        "Sleep restriction abstract text.",
    );
    interactive.main_idea_question = Some("What did the researchers want to find out?".into());

    let mut finetuned = RosterRow::new(
        "p1",
        "finetuned_5",
        "9",
        "Green space study",
        "Green space abstract text.",
    );
    finetuned.sata_question_1 = Some("Which factors were adjusted for?".into());
    finetuned.sata_choices_1 = Some("socioeconomic status; air pollution; diet".into());
    finetuned.sata_correct_1 = Some("socioeconomic status; air pollution".into());
    finetuned.sata_question_2 = Some("Which outcome was measured?".into());
    finetuned.sata_choices_2 = Some("working memory; height; income".into());
    finetuned.sata_correct_2 = Some("working memory".into());

    Roster::from_rows(
        vec!["P1".to_string()],
        vec![
            RosterRow::new(
                "p1",
                "static_1",
                "12",
                "Microbiome study",
                "Microbiome abstract text.",
            )
            .with_terms("microbiome; IgE; Bacteroides"),
            interactive,
            finetuned,
        ],
    )
}

fn coordinator_with(
    store: Arc<dyn ParticipantStore>,
    generator: Arc<dyn GenerationClient>,
) -> SessionCoordinator {
    SessionCoordinator::new(store, generator, plan(), roster(), StageLimits::default())
}

fn coordinator() -> SessionCoordinator {
    coordinator_with(
        Arc::new(MemoryParticipantStore::new()),
        Arc::new(MockGenerationClient::default()),
    )
}

/// 把一个词汇单元从头推到终态
async fn complete_vocab_unit(pipeline: &mut UnitPipeline) {
    for i in 0..pipeline.unit().term_familiarity.len() {
        pipeline.set_familiarity(i, 3).unwrap();
    }
    pipeline.advance_from_familiarity(2.0).await.unwrap();
    for i in 0..pipeline.unit().term_familiarity.len() {
        pipeline
            .set_extra_info(i, BTreeSet::from([ExtraInfo::Definition]))
            .unwrap();
    }
    pipeline.advance_from_extra_info(2.0).await.unwrap();

    let answer = "This answer is deliberately long enough to pass the minimum character gate.....";
    for i in 0..3 {
        pipeline.set_short_answer(i, answer).unwrap();
    }
    let mut timers = QuestionTimers::new(3);
    pipeline.submit_answers(&mut timers).await.unwrap();

    for scale in BASE_SCALES {
        pipeline.set_rating(scale, 4).unwrap();
    }
    pipeline.request_completion().unwrap();
    pipeline.confirm_completion(5.0).await.unwrap();
}

/// 把一个会话单元推进到作答阶段
async fn chat_until_questions(pipeline: &mut UnitPipeline) {
    for n in 0..3 {
        pipeline.user_turn(&format!("question {n}")).await.unwrap();
    }
    pipeline.finish_conversation().await.unwrap();
    pipeline.run_generation().await.unwrap();
}

async fn complete_conversational_unit(pipeline: &mut UnitPipeline) {
    chat_until_questions(pipeline).await;

    if pipeline.is_sata() {
        for q in 0..pipeline.question_count() {
            pipeline
                .set_sata_selection(q, BTreeSet::from([0]))
                .unwrap();
        }
    } else {
        let answer =
            "This answer is deliberately long enough to pass the minimum character gate.....";
        for i in 0..3 {
            pipeline.set_short_answer(i, answer).unwrap();
        }
    }
    let mut timers = QuestionTimers::new(pipeline.question_count());
    pipeline.submit_answers(&mut timers).await.unwrap();

    for scale in BASE_SCALES {
        pipeline.set_rating(scale, 4).unwrap();
    }
    for scale in CHATBOT_SCALES {
        pipeline.set_rating(scale, 5).unwrap();
    }
    pipeline.request_completion().unwrap();
    pipeline.confirm_completion(5.0).await.unwrap();
}

#[tokio::test]
async fn enrollment_creates_three_batches_with_only_first_unlocked() {
    let coordinator = coordinator();
    let session = coordinator.login(" P1 ").await.unwrap();

    assert_eq!(session.participant_id, "p1");
    let record = &session.record;
    assert!(record.batch(PhaseName::Static, 1).unwrap().unlocked);
    assert!(!record.batch(PhaseName::Interactive, 3).unwrap().unlocked);
    assert!(!record.batch(PhaseName::Finetuned, 5).unwrap().unlocked);

    let work = coordinator.next_work(&session).unwrap();
    assert_eq!(work.full_type, "static_1");
    assert!(work.unlocked);
}

#[tokio::test]
async fn unknown_identity_is_terminal_and_creates_nothing() {
    let store: Arc<dyn ParticipantStore> = Arc::new(MemoryParticipantStore::new());
    let coordinator = coordinator_with(
        Arc::clone(&store),
        Arc::new(MockGenerationClient::default()),
    );
    let err = coordinator.login("stranger").await.unwrap_err();
    assert!(matches!(
        err,
        StudyError::Validation(ValidationError::UnknownIdentity)
    ));
    assert!(store.load("stranger").await.unwrap().is_none());
}

#[tokio::test]
async fn full_study_walkthrough() {
    let coordinator = coordinator();
    let mut session = coordinator.login("p1").await.unwrap();

    // --- static_1：词汇变体 ---
    let mut pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    assert_eq!(pipeline.stage(), UnitStage::Familiarity);
    complete_vocab_unit(&mut pipeline).await;
    let next = coordinator
        .finish_unit(&mut session, pipeline)
        .await
        .unwrap()
        .unwrap();

    assert!(session.record.batch(PhaseName::Static, 1).unwrap().completed);
    assert_eq!(next.full_type, "interactive_3");
    assert!(!next.unlocked);

    // 未解锁批次绝不放行流水线
    let err = coordinator.begin_unit(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        StudyError::Validation(ValidationError::BatchLocked { .. })
    ));

    // 错口令不改状态；对口令幂等解锁
    assert!(!coordinator
        .attempt_unlock(&mut session, "interactive_3", "dog721")
        .await
        .unwrap());
    assert!(!session.record.batch(PhaseName::Interactive, 3).unwrap().unlocked);
    assert!(coordinator
        .attempt_unlock(&mut session, "interactive_3", "DOG721")
        .await
        .unwrap());
    assert!(coordinator
        .attempt_unlock(&mut session, "interactive_3", "DOG721")
        .await
        .unwrap());
    assert!(session.record.batch(PhaseName::Interactive, 3).unwrap().unlocked);

    // --- interactive_3：会话变体，三道简答 ---
    let mut pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    assert_eq!(pipeline.stage(), UnitStage::Conversation);
    complete_conversational_unit(&mut pipeline).await;
    assert!(pipeline.unit().completed);
    let next = coordinator
        .finish_unit(&mut session, pipeline)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.full_type, "finetuned_5");

    coordinator
        .record_batch_time(&mut session, "interactive_3", 1800.0, 300.0, "ok".into())
        .await
        .unwrap();
    coordinator
        .confirm_batch_completion(&mut session, "interactive_3", true)
        .await
        .unwrap();

    // --- finetuned_5：会话变体，SATA ---
    assert!(coordinator
        .attempt_unlock(&mut session, "finetuned_5", "CAT264")
        .await
        .unwrap());
    let mut pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    assert!(pipeline.is_sata());
    assert_eq!(pipeline.question_count(), 2);
    complete_conversational_unit(&mut pipeline).await;
    let next = coordinator.finish_unit(&mut session, pipeline).await.unwrap();

    // 全部批次完成：调度返回 None，记录里三个批次全部 completed
    assert!(next.is_none());
    assert!(coordinator.next_work(&session).is_none());
    for (phase, batch_id) in [
        (PhaseName::Static, 1),
        (PhaseName::Interactive, 3),
        (PhaseName::Finetuned, 5),
    ] {
        assert!(session.record.batch(phase, batch_id).unwrap().completed);
    }
    assert!(coordinator.begin_unit(&mut session).await.unwrap().is_none());
}

#[tokio::test]
async fn completed_flag_is_monotonic_across_reload() {
    let store: Arc<dyn ParticipantStore> = Arc::new(MemoryParticipantStore::new());
    let coordinator = coordinator_with(
        Arc::clone(&store),
        Arc::new(MockGenerationClient::default()),
    );
    let mut session = coordinator.login("p1").await.unwrap();
    let mut pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    complete_vocab_unit(&mut pipeline).await;
    coordinator.finish_unit(&mut session, pipeline).await.unwrap();

    let record = store.load("p1").await.unwrap().unwrap();
    let unit = record.unit(PhaseName::Static, 1, "12").unwrap();
    assert!(unit.completed);
    // 术语列表顺序在整轮落盘/重载后保持不变，无重复
    let terms: Vec<&str> = unit
        .term_familiarity
        .iter()
        .map(|t| t.term.as_str())
        .collect();
    assert_eq!(terms, ["microbiome", "IgE", "Bacteroides"]);
    assert!(unit.term_familiarity.iter().all(|t| t.familiarity_score == Some(3)));
}

#[tokio::test]
async fn disconnect_resumes_at_persisted_stage() {
    let store: Arc<dyn ParticipantStore> = Arc::new(MemoryParticipantStore::new());
    let coordinator = coordinator_with(
        Arc::clone(&store),
        Arc::new(MockGenerationClient::default()),
    );

    // 第一次会话：完成 static_1，解锁 interactive_3，推进到作答阶段后断线
    let mut session = coordinator.login("p1").await.unwrap();
    let mut pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    complete_vocab_unit(&mut pipeline).await;
    coordinator.finish_unit(&mut session, pipeline).await.unwrap();
    coordinator
        .attempt_unlock(&mut session, "interactive_3", "DOG721")
        .await
        .unwrap();
    let mut pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    chat_until_questions(&mut pipeline).await;
    let summary = pipeline.unit().generated_summary.clone().unwrap();
    drop(pipeline);
    drop(session);

    // 第二次会话：同一单元在持久化的阶段上重建，对话与摘要原样在场
    let mut session = coordinator.login("p1").await.unwrap();
    let pipeline = coordinator.begin_unit(&mut session).await.unwrap().unwrap();
    assert_eq!(pipeline.stage(), UnitStage::Questions);
    assert_eq!(pipeline.path().unit_id, "7");
    assert_eq!(pipeline.unit().generated_summary.as_deref(), Some(summary.as_str()));
    assert_eq!(pipeline.unit().user_turns().len(), 3);
}

struct FailingClient;

#[async_trait]
impl GenerationClient for FailingClient {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
        Err(GenerationError::Request("simulated outage".to_string()))
    }
}

#[tokio::test]
async fn generation_failure_leaves_unit_in_generating_for_manual_retry() {
    let store: Arc<dyn ParticipantStore> = Arc::new(MemoryParticipantStore::new());
    let failing = coordinator_with(Arc::clone(&store), Arc::new(FailingClient));

    let mut session = failing.login("p1").await.unwrap();
    let mut pipeline = failing.begin_unit(&mut session).await.unwrap().unwrap();
    complete_vocab_unit(&mut pipeline).await;
    failing.finish_unit(&mut session, pipeline).await.unwrap();
    failing
        .attempt_unlock(&mut session, "interactive_3", "DOG721")
        .await
        .unwrap();

    let mut pipeline = failing.begin_unit(&mut session).await.unwrap().unwrap();
    // 问答轮也走生成服务；故障时该轮两条消息都不落盘
    let err = pipeline.user_turn("question 0").await.unwrap_err();
    assert!(matches!(err, StudyError::Generation(_)));
    assert_eq!(pipeline.user_turn_count(), 0);
    drop(pipeline);
    drop(session);

    // 服务恢复（换用可用客户端）后从存储重建并收集完整对话
    let healthy = coordinator_with(
        Arc::clone(&store),
        Arc::new(MockGenerationClient::default()),
    );
    let mut session = healthy.login("p1").await.unwrap();
    let mut pipeline = healthy.begin_unit(&mut session).await.unwrap().unwrap();
    assert_eq!(pipeline.stage(), UnitStage::Conversation);
    for n in 0..3 {
        pipeline.user_turn(&format!("question {n}")).await.unwrap();
    }
    pipeline.finish_conversation().await.unwrap();

    // 生成失败：阶段原地不动，对话原封未动
    let err = generate_once(&store, &session, Arc::new(FailingClient))
        .await
        .unwrap_err();
    assert!(matches!(err, StudyError::Generation(_)));

    // 手动重试无需重新收集对话
    let summary = generate_once(
        &store,
        &session,
        Arc::new(MockGenerationClient::default()),
    )
    .await
    .unwrap();
    assert!(!summary.is_empty());
}

/// 在 Generating 阶段从存储重建同一单元并调用一次生成
async fn generate_once(
    store: &Arc<dyn ParticipantStore>,
    session: &StudySession,
    generator: Arc<dyn GenerationClient>,
) -> Result<String, StudyError> {
    let record = store.load(&session.participant_id).await.unwrap().unwrap();
    let unit = record.unit(PhaseName::Interactive, 3, "7").unwrap().clone();
    let turns_before = unit.user_turns().len();
    let mut pipeline = UnitPipeline::new(
        session.participant_id.clone(),
        plstudy::store::UnitPath::new(PhaseName::Interactive, 3, "7"),
        unit,
        Some(UnitStage::Generating),
        Arc::clone(store),
        generator,
        StageLimits::default(),
    )?;
    let result = pipeline.run_generation().await;
    if result.is_err() {
        assert_eq!(pipeline.stage(), UnitStage::Generating);
        assert_eq!(pipeline.unit().user_turns().len(), turns_before);
    }
    result
}
