//! 答题计时：离开一题即停表，进入一题即起表，往返导航累计不清零

use std::time::{Duration, Instant};

/// 每题一个累计时长；同一时刻至多一题在计时
#[derive(Debug)]
pub struct QuestionTimers {
    acc: Vec<Duration>,
    active: Option<(usize, Instant)>,
}

impl QuestionTimers {
    pub fn new(question_count: usize) -> Self {
        Self {
            acc: vec![Duration::ZERO; question_count],
            active: None,
        }
    }

    pub fn question_count(&self) -> usize {
        self.acc.len()
    }

    /// 进入第 index 题：先结算当前在计时的题，再为新题起表
    pub fn enter(&mut self, index: usize) {
        self.pause();
        if index < self.acc.len() {
            self.active = Some((index, Instant::now()));
        }
    }

    /// 停止计时并把流逝时间记入当前题
    pub fn pause(&mut self) {
        if let Some((idx, started)) = self.active.take() {
            self.acc[idx] += started.elapsed();
        }
    }

    /// 某题的累计时长（不含正在流逝的片段）
    pub fn elapsed(&self, index: usize) -> Duration {
        self.acc.get(index).copied().unwrap_or(Duration::ZERO)
    }

    pub fn elapsed_secs(&self, index: usize) -> f64 {
        self.elapsed(index).as_secs_f64()
    }

    pub fn total_secs(&self) -> f64 {
        self.acc.iter().map(|d| d.as_secs_f64()).sum()
    }

    #[cfg(test)]
    pub(crate) fn add_elapsed(&mut self, index: usize, d: Duration) {
        self.acc[index] += d;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switching_accumulates_into_departed_question() {
        let mut timers = QuestionTimers::new(3);
        timers.enter(0);
        timers.add_elapsed(0, Duration::from_secs(5));
        timers.enter(1);
        // 第 0 题已结算，第 1 题在计时
        assert!(timers.elapsed_secs(0) >= 5.0);
        assert_eq!(timers.elapsed(2), Duration::ZERO);
    }

    #[test]
    fn revisit_preserves_accumulated_time() {
        let mut timers = QuestionTimers::new(2);
        timers.enter(0);
        timers.add_elapsed(0, Duration::from_secs(7));
        timers.enter(1);
        let before = timers.elapsed(0);
        timers.enter(0);
        timers.enter(1);
        assert!(timers.elapsed(0) >= before, "returning must not reset the counter");
    }

    #[test]
    fn pause_without_active_is_noop() {
        let mut timers = QuestionTimers::new(1);
        timers.pause();
        assert_eq!(timers.elapsed(0), Duration::ZERO);
    }
}
