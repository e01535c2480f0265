//! 会话内短暂状态：当前题号、答题计时、阶段进入时刻
//!
//! 显式对象 + 单一更新路径。未随子阶段转移落盘的内容在硬断线时丢失，
//! 这是接受的数据边界。

use std::time::Instant;

use crate::pipeline::QuestionTimers;

pub struct SessionState {
    question_index: usize,
    timers: Option<QuestionTimers>,
    stage_entered_at: Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            question_index: 0,
            timers: None,
            stage_entered_at: Instant::now(),
        }
    }

    /// 进入新子阶段：重置阶段时钟
    pub fn enter_stage(&mut self) {
        self.stage_entered_at = Instant::now();
    }

    pub fn stage_elapsed_secs(&self) -> f64 {
        self.stage_entered_at.elapsed().as_secs_f64()
    }

    /// 进入作答阶段。从对比阶段退回时计时器已存在且不重建，
    /// 累计用时与题号得以保留
    pub fn begin_questions(&mut self, question_count: usize) {
        let keep = matches!(&self.timers, Some(t) if t.question_count() == question_count);
        if !keep {
            self.timers = Some(QuestionTimers::new(question_count));
            self.question_index = 0;
        }
        let index = self.question_index;
        if let Some(t) = &mut self.timers {
            t.enter(index);
        }
    }

    /// 切题：停掉离开题的表，起进入题的表
    pub fn goto_question(&mut self, index: usize) {
        if let Some(t) = &mut self.timers {
            if index < t.question_count() {
                self.question_index = index;
                t.enter(index);
            }
        }
    }

    /// 离开作答阶段（提交或回退）：停表但保留累计
    pub fn leave_questions(&mut self) {
        if let Some(t) = &mut self.timers {
            t.pause();
        }
    }

    /// 单元完成后清空作答态
    pub fn reset_for_next_unit(&mut self) {
        self.question_index = 0;
        self.timers = None;
        self.stage_entered_at = Instant::now();
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn timers_mut(&mut self) -> Option<&mut QuestionTimers> {
        self.timers.as_mut()
    }
}
