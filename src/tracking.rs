// tracking.rs — Token and cost accounting for the current session.
// Records are kept in memory in arrival order; every summary is recomputed
// from them on demand, never cached.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

// ── Pricing Tables ─────────────────────────────────────────

/// Per-model pricing in USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt_per_m: f64,
    pub completion_per_m: f64,
}

/// Model name prefixes, most specific first so dated snapshots
/// (e.g. `gpt-4-0613`) resolve to their family.
const PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", ModelPricing { prompt_per_m: 0.15, completion_per_m: 0.60 }),
    ("gpt-4o", ModelPricing { prompt_per_m: 2.50, completion_per_m: 10.0 }),
    ("gpt-4-turbo", ModelPricing { prompt_per_m: 10.0, completion_per_m: 30.0 }),
    ("gpt-4-1106", ModelPricing { prompt_per_m: 10.0, completion_per_m: 30.0 }),
    ("gpt-4-0125", ModelPricing { prompt_per_m: 10.0, completion_per_m: 30.0 }),
    ("gpt-4-32k", ModelPricing { prompt_per_m: 60.0, completion_per_m: 120.0 }),
    ("gpt-4", ModelPricing { prompt_per_m: 30.0, completion_per_m: 60.0 }),
    ("gpt-3.5-turbo", ModelPricing { prompt_per_m: 0.50, completion_per_m: 1.50 }),
];

/// Look up pricing for a model identifier.
/// Returns None for unknown models (cost will be recorded as 0).
pub fn model_pricing(model: &str) -> Option<ModelPricing> {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
}

/// Cost in USD of one completion call.
pub fn calculate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    match model_pricing(model) {
        Some(p) => {
            prompt_tokens as f64 * p.prompt_per_m / 1_000_000.0
                + completion_tokens as f64 * p.completion_per_m / 1_000_000.0
        }
        None => {
            warn!(model, "No pricing known for model, recording cost as 0");
            0.0
        }
    }
}

// ── Currency ───────────────────────────────────────────────

/// Display currencies with static exchange rates from USD.
/// All accounting is done in USD; conversion is display-only.
pub const CURRENCIES: &[(&str, &str, f64)] = &[
    ("USD", "$", 1.0),
    ("EUR", "€", 0.92),
    ("GBP", "£", 0.79),
    ("CNY", "¥", 7.25),
    ("JPY", "¥", 149.0),
    ("TWD", "NT$", 32.0),
];

pub fn currency_symbol(code: &str) -> &'static str {
    CURRENCIES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, sym, _)| *sym)
        .unwrap_or("$")
}

pub fn exchange_rate(code: &str) -> f64 {
    CURRENCIES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, _, rate)| *rate)
        .unwrap_or(1.0)
}

/// Format a USD amount in the chosen display currency.
pub fn format_cost(usd: f64, currency: &str) -> String {
    let rate = exchange_rate(currency);
    let converted = usd * rate;
    if rate > 100.0 {
        format!("{}{:.2}", currency_symbol(currency), converted)
    } else {
        format!("{}{:.4}", currency_symbol(currency), converted)
    }
}

/// Format a duration as a short human-readable string.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}min", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

// ── Records ────────────────────────────────────────────────

/// Usage of one completed API call.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Derived summary of the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub duration: Duration,
    pub interactions: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub average_tokens_per_interaction: f64,
    pub total_cost: f64,
    pub average_cost_per_interaction: f64,
    pub last_interaction: Option<DateTime<Utc>>,
}

/// Result of a pre-flight token estimate. `warning` is set when the
/// estimate could not be computed and `tokens` fell back to 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEstimate {
    pub tokens: usize,
    pub warning: Option<String>,
}

// ── Tracker ────────────────────────────────────────────────

pub struct UsageTracker {
    started_at: DateTime<Utc>,
    records: Vec<UsageRecord>,
    tokenizer: Result<Arc<CoreBPE>, String>,
}

impl UsageTracker {
    /// Build a tracker whose token estimates use the tokenizer of `model`.
    /// An unknown model is not an error here; estimates just degrade to 0.
    pub fn new(model: &str) -> Self {
        let tokenizer = tiktoken_rs::get_bpe_from_model(model)
            .map(Arc::new)
            .map_err(|e| format!("no tokenizer for model '{model}': {e}"));
        if let Err(ref e) = tokenizer {
            debug!(%e, "Token estimation unavailable");
        }
        Self {
            started_at: Utc::now(),
            records: Vec::new(),
            tokenizer,
        }
    }

    pub fn record_interaction(&mut self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) {
        let cost_usd = if cost_usd.is_finite() && cost_usd > 0.0 {
            cost_usd
        } else {
            if cost_usd != 0.0 {
                warn!(cost_usd, "Discarding invalid cost value");
            }
            0.0
        };

        self.records.push(UsageRecord {
            timestamp: Utc::now(),
            prompt_tokens,
            completion_tokens,
            cost_usd,
        });

        debug!(
            prompt_tokens,
            completion_tokens,
            cost_usd,
            interactions = self.records.len(),
            "Interaction recorded"
        );
    }

    /// Advisory token count for `text`. Never fails.
    pub fn estimate_tokens(&self, text: &str) -> TokenEstimate {
        match &self.tokenizer {
            Ok(bpe) => TokenEstimate {
                tokens: bpe.encode_with_special_tokens(text).len(),
                warning: None,
            },
            Err(e) => {
                warn!(%e, "Token estimation failed, reporting 0");
                TokenEstimate {
                    tokens: 0,
                    warning: Some(format!("Token estimate unavailable: {e}")),
                }
            }
        }
    }

    pub fn session_stats(&self) -> SessionStats {
        let mut s = SessionStats {
            duration: (Utc::now() - self.started_at).to_std().unwrap_or_default(),
            ..SessionStats::default()
        };

        for r in &self.records {
            s.interactions += 1;
            s.prompt_tokens += r.prompt_tokens;
            s.completion_tokens += r.completion_tokens;
            s.total_tokens += r.total_tokens();
            s.total_cost += r.cost_usd;
            s.last_interaction = Some(r.timestamp);
        }

        if s.interactions > 0 {
            s.average_tokens_per_interaction = s.total_tokens as f64 / s.interactions as f64;
            s.average_cost_per_interaction = s.total_cost / s.interactions as f64;
        }

        s
    }

    /// Clear history and restart the session clock.
    pub fn reset(&mut self) {
        self.records.clear();
        self.started_at = Utc::now();
    }
}
