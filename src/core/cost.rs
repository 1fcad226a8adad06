//! API cost tracking
//!
//! Prices are $/MTok per model tier, matched by substring of the model name.

use std::time::{Duration, Instant};

use crate::types::Usage;

/// Tier prices in $/MTok: (tier, input, output)
pub const PRICING: [(&str, f64, f64); 3] = [
    ("haiku", 0.25, 1.25),
    ("sonnet", 3.00, 15.00),
    ("opus", 15.00, 75.00),
];

/// Running token totals and their dollar cost
#[derive(Debug, Clone)]
pub struct ApiCosts {
    tier: String,
    in_price: f64,
    out_price: f64,
    total: Usage,
    start: Instant,
}

impl ApiCosts {
    /// Unknown models are tracked at zero cost
    pub fn new(model: &str) -> Self {
        let lower = model.to_lowercase();
        let (tier, input, output) = PRICING
            .iter()
            .find(|(tier, _, _)| lower.contains(tier))
            .map(|(tier, i, o)| (tier.to_string(), *i, *o))
            .unwrap_or_else(|| {
                tracing::warn!(model = %model, "No pricing known for model; costs will read $0");
                (model.to_string(), 0.0, 0.0)
            });
        Self {
            tier,
            in_price: input / 1e6,
            out_price: output / 1e6,
            total: Usage::default(),
            start: Instant::now(),
        }
    }

    pub fn tier(&self) -> &str {
        &self.tier
    }

    pub fn ingest(&mut self, usage: Usage) {
        self.total.add(usage);
    }

    pub fn total_usage(&self) -> Usage {
        self.total
    }

    /// Dollars spent so far
    pub fn total_cost(&self) -> f64 {
        self.total.input_tokens as f64 * self.in_price + self.total.output_tokens as f64 * self.out_price
    }

    /// (total $, $/hour) over `elapsed`
    pub fn costs_over(&self, elapsed: Duration) -> (f64, f64) {
        let total = self.total_cost();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { total / secs * 3600.0 } else { 0.0 };
        (total, rate)
    }

    /// (total $, $/hour) since tracking started
    pub fn current_costs(&self) -> (f64, f64) {
        self.costs_over(self.start.elapsed())
    }

    pub fn log_current_costs(&self) {
        let (total, rate) = self.current_costs();
        tracing::warn!(
            tier = %self.tier,
            input_tokens = self.total.input_tokens,
            output_tokens = self.total.output_tokens,
            "API cost({}): ${:.2}/hour (total: ${:.4})",
            self.tier,
            rate,
            total
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================
