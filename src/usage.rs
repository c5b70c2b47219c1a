//! 用量与成本核算
//!
//! 每次循环迭代记一条 UsageRecord，按轮聚合后用 (provider, model) 计价表换算货币成本
//! （USD 每百万 token 单价 × 汇率）。查不到计价条目直接报错，绝不静默记零。

use std::collections::HashMap;

use crate::config::PricingSection;
use crate::core::AgentError;
use crate::llm::{ProviderId, TokenUsage};

/// 一次循环迭代的用量记录
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub provider: ProviderId,
    pub model: String,
    pub usage: TokenUsage,
}

/// 单轮账本：聚合该轮所有迭代的用量
#[derive(Debug, Default)]
pub struct TurnLedger {
    records: Vec<UsageRecord>,
}

impl TurnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, provider: ProviderId, model: &str, usage: TokenUsage) {
        self.records.push(UsageRecord {
            provider,
            model: model.to_string(),
            usage,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iterations(&self) -> usize {
        self.records.len()
    }

    /// 各迭代 input/output 之和（不是只取最后一次）
    pub fn totals(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for r in &self.records {
            total.add(r.usage);
        }
        total
    }

    /// 按记录逐条计价求和（USD）
    pub fn cost_usd(&self, table: &PricingTable) -> Result<f64, AgentError> {
        let mut cost = 0.0;
        for r in &self.records {
            cost += table.cost_usd(r.provider, &r.model, r.usage)?;
        }
        Ok(cost)
    }
}

/// 计价表：(provider, model) -> (输入单价, 输出单价)（USD / 1M tokens）
pub struct PricingTable {
    prices: HashMap<(ProviderId, String), (f64, f64)>,
    fx_rate: f64,
    currency_symbol: String,
}

impl PricingTable {
    /// 内置常用模型单价，可被配置覆盖
    fn builtin() -> HashMap<(ProviderId, String), (f64, f64)> {
        let mut m = HashMap::new();
        m.insert((ProviderId::Gemini, "gemini-2.0-flash".into()), (0.10, 0.40));
        m.insert((ProviderId::Gemini, "gemini-1.5-pro".into()), (1.25, 5.00));
        m.insert(
            (ProviderId::Claude, "claude-sonnet-4-20250514".into()),
            (3.00, 15.00),
        );
        m.insert(
            (ProviderId::Claude, "claude-3-5-haiku-20241022".into()),
            (0.80, 4.00),
        );
        m.insert((ProviderId::OpenAi, "gpt-4o-mini".into()), (0.15, 0.60));
        m.insert((ProviderId::OpenAi, "gpt-4o".into()), (2.50, 10.00));
        m
    }

    pub fn from_config(cfg: &PricingSection) -> Self {
        let mut prices = Self::builtin();
        for entry in &cfg.models {
            if let Ok(provider) = entry.provider.parse::<ProviderId>() {
                prices.insert(
                    (provider, entry.model.clone()),
                    (entry.input_per_m_usd, entry.output_per_m_usd),
                );
            } else {
                tracing::warn!(provider = %entry.provider, "pricing entry for unknown provider ignored");
            }
        }
        Self {
            prices,
            fx_rate: cfg.fx_rate,
            currency_symbol: cfg.currency_symbol.clone(),
        }
    }

    pub fn with_entry(
        mut self,
        provider: ProviderId,
        model: &str,
        input_per_m: f64,
        output_per_m: f64,
    ) -> Self {
        self.prices
            .insert((provider, model.to_string()), (input_per_m, output_per_m));
        self
    }

    /// 单条记录成本（USD）；未知 (provider, model) 报 UnknownPricing
    pub fn cost_usd(
        &self,
        provider: ProviderId,
        model: &str,
        usage: TokenUsage,
    ) -> Result<f64, AgentError> {
        let (input_per_m, output_per_m) = self
            .prices
            .get(&(provider, model.to_string()))
            .ok_or_else(|| AgentError::UnknownPricing {
                provider: provider.to_string(),
                model: model.to_string(),
            })?;
        Ok(usage.input_tokens as f64 / 1_000_000.0 * input_per_m
            + usage.output_tokens as f64 / 1_000_000.0 * output_per_m)
    }

    /// 整轮成本换算到展示货币
    pub fn cost_display(&self, ledger: &TurnLedger) -> Result<f64, AgentError> {
        Ok(ledger.cost_usd(self)? * self.fx_rate)
    }

    /// 渲染附在回复后的"tokens + 成本"注记
    pub fn annotation(&self, ledger: &TurnLedger) -> Result<String, AgentError> {
        let totals = ledger.totals();
        let cost = self.cost_display(ledger)?;
        Ok(format!(
            "{} in / {} out tokens · ≈ {}{:.2}",
            totals.input_tokens, totals.output_tokens, self.currency_symbol, cost
        ))
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::from_config(&PricingSection::default())
    }
}
