//! 数据模型层：参与者记录（阶段 / 批次）与单元任务状态

pub mod record;
pub mod unit;

pub use record::{
    full_type, parse_full_type, Batch, BatchTimeReport, ParticipantRecord, PhaseName, PhaseRecord,
};
pub use unit::{
    ComparisonRatings, ConversationTurn, ExtraInfo, LikertReport, SataAnswers, SataQuestion,
    ShortAnswers, TermEntry, TurnRole, Unit, BASE_SCALES, CHATBOT_SCALES,
};
