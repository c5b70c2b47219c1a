//! Agentic 循环控制器

pub mod loop_;

pub use loop_::{AgenticLoop, LoopResult};
