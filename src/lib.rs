//! Maru - 个人知识库智能体编排核心
//!
//! 模块划分：
//! - **agent**: 编排器（单条消息的完整管线）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: system 指令装配（persona + 记忆摘录 + schema 摘要缓存）
//! - **core**: 错误类型
//! - **llm**: 后端抽象与三家协议适配（OpenAI / Claude / Gemini）、重试、注册表、自动路由
//! - **persona**: 人格配置
//! - **react**: Agentic 循环控制器
//! - **retrieval**: 检索协作方契约与预检索触发器
//! - **store**: 持久化协作方契约与内存参考实现
//! - **tools**: 工具契约、注册表、派发器与内置工具（vault / 脚本 / 外部引擎）
//! - **usage**: 用量账本与计价表

pub mod agent;
pub mod config;
pub mod context;
pub mod core;
pub mod llm;
pub mod observability;
pub mod persona;
pub mod react;
pub mod retrieval;
pub mod store;
pub mod tools;
pub mod usage;

pub use agent::{Agent, AgentReply};
