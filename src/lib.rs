//! PLStudy - 科研摘要可读性研究引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **error**: 错误分类（校验 / 生成服务 / 完整性 / 存储）
//! - **generate**: 生成服务客户端（OpenAI 兼容 / Mock）与请求构造
//! - **model**: 参与者进度文档的强类型数据模型
//! - **pipeline**: 单元任务状态机（术语 / 对话 / 生成 / 作答 / 对比）
//! - **roster**: 白名单身份门与花名册透视
//! - **scheduler**: 全局批次顺序调度与口令门
//! - **session**: 会话协调与断线恢复
//! - **store**: 进度文档存储（内存 / JSON 文件）

pub mod config;
pub mod error;
pub mod generate;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod store;

pub use error::{StudyError, ValidationError};
