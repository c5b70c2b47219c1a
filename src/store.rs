//! 持久化协作方契约
//!
//! 对话落盘、提醒 CRUD、话题会话都由外部存储实现；编排核心只调用契约。
//! InMemoryStore 是给 REPL 与测试用的参考实现。
//! 注意：切话题只清工作（内存）历史，已持久化的记录不动。

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::AgentError;

/// 一条完成的对话记录；落盘后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// 展示货币成本；失败轮记 0
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, cost: f64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost = cost;
        self
    }
}

/// 对话历史存储
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_turn(&self, turn: ConversationTurn) -> Result<(), AgentError>;

    /// 最近 n 条（时间升序）
    async fn history(&self, n: usize) -> Result<Vec<ConversationTurn>, AgentError>;

    async fn clear_history(&self) -> Result<(), AgentError>;

    /// 成本聚合查询
    async fn total_cost(&self) -> Result<f64, AgentError>;
}

/// 提醒
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub text: String,
    pub due: DateTime<Utc>,
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn create(&self, text: &str, due: DateTime<Utc>) -> Result<Reminder, AgentError>;
    async fn list(&self) -> Result<Vec<Reminder>, AgentError>;
    async fn delete(&self, id: &str) -> Result<bool, AgentError>;
}

/// 话题会话：每用户最多一个活动话题
#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn active_topic(&self) -> Result<Option<String>, AgentError>;
    async fn set_topic(&self, name: &str) -> Result<(), AgentError>;
    async fn clear_topic(&self) -> Result<(), AgentError>;
}

/// 内存参考实现（REPL / 测试）
#[derive(Default)]
pub struct InMemoryStore {
    turns: Mutex<Vec<ConversationTurn>>,
    reminders: Mutex<Vec<Reminder>>,
    topic: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save_turn(&self, turn: ConversationTurn) -> Result<(), AgentError> {
        self.turns.lock().unwrap().push(turn);
        Ok(())
    }

    async fn history(&self, n: usize) -> Result<Vec<ConversationTurn>, AgentError> {
        let turns = self.turns.lock().unwrap();
        let start = turns.len().saturating_sub(n);
        Ok(turns[start..].to_vec())
    }

    async fn clear_history(&self) -> Result<(), AgentError> {
        self.turns.lock().unwrap().clear();
        Ok(())
    }

    async fn total_cost(&self) -> Result<f64, AgentError> {
        Ok(self.turns.lock().unwrap().iter().map(|t| t.cost).sum())
    }
}

#[async_trait]
impl ReminderStore for InMemoryStore {
    async fn create(&self, text: &str, due: DateTime<Utc>) -> Result<Reminder, AgentError> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            due,
        };
        self.reminders.lock().unwrap().push(reminder.clone());
        Ok(reminder)
    }

    async fn list(&self) -> Result<Vec<Reminder>, AgentError> {
        Ok(self.reminders.lock().unwrap().clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, AgentError> {
        let mut reminders = self.reminders.lock().unwrap();
        let before = reminders.len();
        reminders.retain(|r| r.id != id);
        Ok(reminders.len() < before)
    }
}

#[async_trait]
impl TopicStore for InMemoryStore {
    async fn active_topic(&self) -> Result<Option<String>, AgentError> {
        Ok(self.topic.lock().unwrap().clone())
    }

    async fn set_topic(&self, name: &str) -> Result<(), AgentError> {
        *self.topic.lock().unwrap() = Some(name.to_string());
        Ok(())
    }

    async fn clear_topic(&self) -> Result<(), AgentError> {
        *self.topic.lock().unwrap() = None;
        Ok(())
    }
}
