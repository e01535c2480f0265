//! 会话层：协调器与会话内短暂状态

pub mod coordinator;
pub mod state;

pub use coordinator::{SessionCoordinator, StudySession};
pub use state::SessionState;
