//! 错误分类：校验 / 生成服务 / 数据完整性 / 存储
//!
//! 校验错误可恢复（向参与者重新提示，不推进状态）；生成与存储错误阻断
//! 当前转移并如实上报，持久化写失败绝不吞掉。

use thiserror::Error;

use crate::generate::GenerationError;
use crate::store::StoreError;

/// 引擎统一错误
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("generation service failed: {0}")]
    Generation(#[from] GenerationError),

    /// 配置 / 记录形状不一致（未知单元、未识别阶段等），视为致命配置错误
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// 参与者输入不满足门槛；对应阶段不推进，已有数据不丢失
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("identity is not on the approved list")]
    UnknownIdentity,

    #[error("batch {full_type} is locked")]
    BatchLocked { full_type: String },

    #[error("term '{term}' has no familiarity score")]
    TermUnrated { term: String },

    #[error("term '{term}' has no extra information selected")]
    TermMissingExtraInfo { term: String },

    #[error("familiarity score {score} is outside 1..=5")]
    ScoreOutOfRange { score: u8 },

    #[error("message is empty")]
    EmptyMessage,

    #[error("asked {have} questions, at least {need} required")]
    TooFewUserTurns { have: usize, need: usize },

    #[error("answer {index} has {len} characters, minimum is {min}")]
    AnswerTooShort { index: usize, len: usize, min: usize },

    #[error("question {index} has no selected options")]
    NoOptionSelected { index: usize },

    #[error("rating scale '{scale}' not answered")]
    MissingRating { scale: &'static str },

    #[error("unknown rating scale or value: {scale}")]
    BadRating { scale: String },

    #[error("operation not allowed in stage {actual} (expected {expected})")]
    WrongStage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("completion must be requested and confirmed before commit")]
    ConfirmationRequired,

    #[error("unit is already completed and cannot be revisited")]
    AlreadyCompleted,
}
