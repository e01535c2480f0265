//! PLStudy - 实验引擎驱动入口
//!
//! 行式驱动：初始化日志与配置，载入花名册与进度存储，按调度结果
//! 逐批次、逐单元驱动流水线。页面渲染不在引擎范围内，这里只把
//! 引擎状态映射为最朴素的终端问答。

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};

use anyhow::Context;
use plstudy::config::load_config;
use plstudy::error::StudyError;
use plstudy::generate::create_generator;
use plstudy::model::ExtraInfo;
use plstudy::pipeline::{UnitPipeline, UnitStage};
use plstudy::roster::Roster;
use plstudy::scheduler::StudyPlan;
use plstudy::session::{SessionCoordinator, StudySession};
use plstudy::store::create_participant_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    plstudy::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let roster = Roster::load(&cfg.study.approved_ids_path, &cfg.study.roster_path)
        .context("Failed to load roster")?;
    let plan = StudyPlan::new(cfg.study.batch_order.clone(), cfg.study.passcodes.clone())?;
    let store = create_participant_store(Some(cfg.storage.root.as_path()));
    let generator = create_generator(&cfg.llm);
    let coordinator =
        SessionCoordinator::new(store, generator, plan, roster, cfg.study.limits());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    let id = prompt(&mut lines, "Participant ID: ")?;
    let mut session = match coordinator.login(&id).await {
        Ok(session) => session,
        Err(StudyError::Validation(v)) => {
            println!("Sorry: {v}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("Welcome, {}.", session.participant_id);

    loop {
        let Some(work) = coordinator.next_work(&session) else {
            println!("You have completed the study. Thank you!");
            break;
        };
        println!("\n=== Batch {} ===", work.full_type);

        if !work.unlocked {
            let code = prompt(&mut lines, "This batch is locked. Passcode: ")?;
            if !coordinator
                .attempt_unlock(&mut session, &work.full_type, code.trim())
                .await?
            {
                println!("Wrong passcode.");
                continue;
            }
            println!("Batch unlocked.");
        }
        coordinator
            .mark_instructions_seen(&mut session, &work.full_type)
            .await?;

        let Some(mut pipeline) = coordinator.begin_unit(&mut session).await? else {
            continue;
        };
        drive_unit(&mut pipeline, &mut session, &mut lines).await?;
        let (phase, batch_id) = (pipeline.path().phase, pipeline.path().batch_id);
        coordinator.finish_unit(&mut session, pipeline).await?;

        let batch_done = session
            .record
            .batch(phase, batch_id)
            .map(|b| b.completed && b.time_completion.is_none())
            .unwrap_or(false);
        if batch_done {
            wrap_up_batch(&coordinator, &mut session, &work.full_type, &mut lines).await?;
        }
    }

    Ok(())
}

/// 批次收尾：自报用时与反馈，并确认是否进入下一阶段
async fn wrap_up_batch(
    coordinator: &SessionCoordinator,
    session: &mut StudySession,
    full_type: &str,
    lines: &mut Lines<'_>,
) -> anyhow::Result<()> {
    println!("\nYou have completed all the tasks for this batch.");
    let batch_secs = prompt(lines, "Total time for this batch in seconds: ")?
        .trim()
        .parse::<f64>()
        .unwrap_or(0.0);
    let sata_secs = prompt(lines, "Time spent on the SATA questions in seconds: ")?
        .trim()
        .parse::<f64>()
        .unwrap_or(0.0);
    let feedback = prompt(lines, "Any feedback about this batch (optional): ")?;
    coordinator
        .record_batch_time(session, full_type, batch_secs, sata_secs, feedback)
        .await?;

    let answer = prompt(lines, "Would you like to continue to the next stage? (y/n): ")?;
    coordinator
        .confirm_batch_completion(session, full_type, answer.trim().eq_ignore_ascii_case("y"))
        .await?;
    Ok(())
}

type Lines<'a> = io::Lines<io::StdinLock<'a>>;

fn prompt(lines: &mut Lines<'_>, text: &str) -> anyhow::Result<String> {
    print!("{text}");
    io::stdout().flush()?;
    let line = lines
        .next()
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("stdin closed"))?;
    Ok(line)
}

/// 驱动一个单元直到终态；校验错误原地重新提示
async fn drive_unit(
    pipeline: &mut UnitPipeline,
    session: &mut StudySession,
    lines: &mut Lines<'_>,
) -> anyhow::Result<()> {
    while pipeline.stage() != UnitStage::Completed {
        match step(pipeline, session, lines).await {
            Ok(()) => {}
            Err(StudyError::Validation(v)) => println!("! {v}"),
            Err(StudyError::Generation(e)) => println!("! generation failed, try again: {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn step(
    pipeline: &mut UnitPipeline,
    session: &mut StudySession,
    lines: &mut Lines<'_>,
) -> Result<(), StudyError> {
    match pipeline.stage() {
        UnitStage::Familiarity => {
            println!("\n--- {} ---", pipeline.unit().abstract_title);
            println!("{}\n", pipeline.unit().abstract_text);
            for i in 0..pipeline.unit().term_familiarity.len() {
                let term = pipeline.unit().term_familiarity[i].term.clone();
                let answer = read_line(lines, &format!("Familiarity with '{term}' (1-5): "))?;
                match answer.trim().parse::<u8>() {
                    Ok(score) => pipeline.set_familiarity(i, score)?,
                    Err(_) => println!("! enter a number from 1 to 5"),
                }
            }
            pipeline
                .advance_from_familiarity(session.state.stage_elapsed_secs())
                .await?;
            session.state.enter_stage();
        }
        UnitStage::ExtraInfo => {
            for i in 0..pipeline.unit().term_familiarity.len() {
                let term = pipeline.unit().term_familiarity[i].term.clone();
                let answer = read_line(
                    lines,
                    &format!("Extra info for '{term}' (definition/example/background/none, comma separated): "),
                )?;
                pipeline.set_extra_info(i, parse_extra_info(&answer))?;
            }
            pipeline
                .advance_from_extra_info(session.state.stage_elapsed_secs())
                .await?;
            session.state.enter_stage();
        }
        UnitStage::Conversation => {
            println!("\n--- {} ---", pipeline.unit().abstract_title);
            println!("{}\n", pipeline.unit().abstract_text);
            println!("Ask at least 3 questions about the abstract; type /done when finished.");
            loop {
                let line = read_line(lines, "> ")?;
                if line.trim() == "/done" {
                    pipeline.finish_conversation().await?;
                    session.state.enter_stage();
                    break;
                }
                match pipeline.user_turn(&line).await {
                    Ok(reply) => println!("Assistant: {reply}"),
                    Err(StudyError::Validation(v)) => println!("! {v}"),
                    Err(e) => return Err(e),
                }
            }
        }
        UnitStage::Generating => {
            println!("Generating the plain-language summary...");
            let summary = pipeline.run_generation().await?;
            println!("\n--- Summary ---\n{summary}\n");
            session.state.enter_stage();
        }
        UnitStage::Questions => {
            run_questions(pipeline, session, lines).await?;
        }
        UnitStage::Comparison => {
            run_comparison(pipeline, session, lines).await?;
        }
        UnitStage::Completed => {}
    }
    Ok(())
}

async fn run_questions(
    pipeline: &mut UnitPipeline,
    session: &mut StudySession,
    lines: &mut Lines<'_>,
) -> Result<(), StudyError> {
    if let Some(summary) = &pipeline.unit().generated_summary {
        println!("\n--- Summary ---\n{summary}\n");
    } else if let Some(reference) = &pipeline.unit().human_reference {
        println!("\n--- Summary ---\n{reference}\n");
    }
    println!("Answer every question; /next, /prev to navigate, /submit when done.");
    session.state.begin_questions(pipeline.question_count());

    loop {
        let index = session.state.question_index();
        if pipeline.is_sata() {
            let question = &pipeline.unit().sata_questions[index];
            println!("\nQ{}: {}", index + 1, question.prompt);
            for (i, choice) in question.choices.iter().enumerate() {
                println!("  {}. {}", i + 1, choice);
            }
        } else {
            let prompts = pipeline.unit().question_prompts();
            println!("\nQ{}: {}", index + 1, prompts[index]);
            let draft = pipeline.short_answer(index);
            if !draft.is_empty() {
                println!("(current answer, {} chars): {draft}", draft.chars().count());
            }
        }

        let line = read_line(lines, "> ")?;
        match line.trim() {
            "/next" => session.state.goto_question((index + 1).min(pipeline.question_count() - 1)),
            "/prev" => session.state.goto_question(index.saturating_sub(1)),
            "/submit" => {
                let timers = session
                    .state
                    .timers_mut()
                    .expect("timers exist inside questions stage");
                pipeline.submit_answers(timers).await?;
                session.state.enter_stage();
                return Ok(());
            }
            text if pipeline.is_sata() => {
                let selection: BTreeSet<usize> = text
                    .split(',')
                    .filter_map(|p| p.trim().parse::<usize>().ok())
                    .filter_map(|n| n.checked_sub(1))
                    .collect();
                pipeline.set_sata_selection(index, selection)?;
            }
            text => pipeline.set_short_answer(index, text)?,
        }
    }
}

async fn run_comparison(
    pipeline: &mut UnitPipeline,
    session: &mut StudySession,
    lines: &mut Lines<'_>,
) -> Result<(), StudyError> {
    println!("\nCompare the SUMMARY to the ABSTRACT (1 = Very Poor, 5 = Excellent).");
    println!("Type /back to return to the questions.");
    for scale in pipeline.required_scales() {
        if pipeline.ratings().get(scale).is_some() {
            continue;
        }
        loop {
            let line = read_line(lines, &format!("{scale} (1-5): "))?;
            let trimmed = line.trim();
            if trimmed == "/back" {
                session.state.leave_questions();
                pipeline.back_to_questions().await?;
                return Ok(());
            }
            match trimmed.parse::<u8>() {
                Ok(value) => match pipeline.set_rating(scale, value) {
                    Ok(()) => break,
                    Err(StudyError::Validation(v)) => println!("! {v}"),
                    Err(e) => return Err(e),
                },
                Err(_) => println!("! enter a number from 1 to 5"),
            }
        }
    }

    pipeline.request_completion()?;
    let answer = read_line(
        lines,
        "Are you sure you want to move on? You will NOT be able to come back (y/n): ",
    )?;
    if answer.trim().eq_ignore_ascii_case("y") {
        pipeline
            .confirm_completion(session.state.stage_elapsed_secs())
            .await?;
        println!("Unit completed.");
    } else {
        pipeline.cancel_completion()?;
        println!("Staying on this page.");
    }
    Ok(())
}

fn read_line(lines: &mut Lines<'_>, text: &str) -> Result<String, StudyError> {
    print!("{text}");
    let _ = io::stdout().flush();
    lines
        .next()
        .transpose()
        .map_err(|e| StudyError::Integrity(format!("stdin: {e}")))?
        .ok_or_else(|| StudyError::Integrity("stdin closed".to_string()))
}

fn parse_extra_info(answer: &str) -> BTreeSet<ExtraInfo> {
    answer
        .split(',')
        .filter_map(|p| match p.trim().to_lowercase().as_str() {
            "definition" => Some(ExtraInfo::Definition),
            "example" => Some(ExtraInfo::Example),
            "background" => Some(ExtraInfo::Background),
            "none" => Some(ExtraInfo::None),
            _ => None,
        })
        .collect()
}
