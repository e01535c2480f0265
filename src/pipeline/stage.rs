//! 单元任务状态机：状态集合与两种阶段变体
//!
//! 状态即持久化的 `last_page`，断线后据此重建流水线位置。

use serde::{Deserialize, Serialize};

/// 流水线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStage {
    /// 逐术语给出 1..=5 熟悉度
    Familiarity,
    /// 逐术语勾选需要的补充信息
    ExtraInfo,
    /// 与生成服务就摘要自由问答
    Conversation,
    /// 等待一次性的重写调用（无用户输入，只为暴露外部调用边界）
    Generating,
    /// 简答或 SATA 作答
    Questions,
    /// 摘要 vs 重写文本的对比评分
    Comparison,
    /// 终态；不可回退
    Completed,
}

impl UnitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStage::Familiarity => "familiarity",
            UnitStage::ExtraInfo => "extra_info",
            UnitStage::Conversation => "conversation",
            UnitStage::Generating => "generating",
            UnitStage::Questions => "questions",
            UnitStage::Comparison => "comparison",
            UnitStage::Completed => "completed",
        }
    }
}

/// 阶段变体决定状态序列
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineVariant {
    /// static：术语熟悉度 → 补充信息 → 作答 → 对比 → 完成
    Vocabulary,
    /// interactive / finetuned：对话 → 生成 → 作答 → 对比 → 完成
    Conversational,
}

impl PipelineVariant {
    pub fn stages(&self) -> &'static [UnitStage] {
        match self {
            PipelineVariant::Vocabulary => &[
                UnitStage::Familiarity,
                UnitStage::ExtraInfo,
                UnitStage::Questions,
                UnitStage::Comparison,
                UnitStage::Completed,
            ],
            PipelineVariant::Conversational => &[
                UnitStage::Conversation,
                UnitStage::Generating,
                UnitStage::Questions,
                UnitStage::Comparison,
                UnitStage::Completed,
            ],
        }
    }

    pub fn initial_stage(&self) -> UnitStage {
        self.stages()[0]
    }

    pub fn contains(&self, stage: UnitStage) -> bool {
        self.stages().contains(&stage)
    }

    /// 线性后继；终态返回 None
    pub fn next_stage(&self, from: UnitStage) -> Option<UnitStage> {
        let stages = self.stages();
        let idx = stages.iter().position(|s| *s == from)?;
        stages.get(idx + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_order() {
        let v = PipelineVariant::Vocabulary;
        assert_eq!(v.initial_stage(), UnitStage::Familiarity);
        assert_eq!(
            v.next_stage(UnitStage::Familiarity),
            Some(UnitStage::ExtraInfo)
        );
        assert_eq!(v.next_stage(UnitStage::Completed), None);
        assert!(!v.contains(UnitStage::Conversation));
    }

    #[test]
    fn conversational_order() {
        let v = PipelineVariant::Conversational;
        assert_eq!(v.initial_stage(), UnitStage::Conversation);
        assert_eq!(
            v.next_stage(UnitStage::Generating),
            Some(UnitStage::Questions)
        );
        assert!(!v.contains(UnitStage::Familiarity));
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&UnitStage::ExtraInfo).unwrap();
        assert_eq!(json, "\"extra_info\"");
    }
}
