//! 单元任务流水线层：状态机、守卫转移与答题计时

pub mod pipeline;
pub mod stage;
pub mod timer;

pub use pipeline::{StageLimits, UnitPipeline};
pub use stage::{PipelineVariant, UnitStage};
pub use timer::QuestionTimers;
