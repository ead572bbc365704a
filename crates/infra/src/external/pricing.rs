//! Static per-model price list used for cost estimates.

use std::collections::HashMap;

use lotwise_ai::Usage;

/// USD per 1K tokens.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
    fallback: ModelPrice,
}

impl Default for PricingTable {
    fn default() -> Self {
        let prices = [
            ("gpt-4o-mini", ModelPrice::new(0.000_15, 0.000_6)),
            ("gpt-4o", ModelPrice::new(0.002_5, 0.01)),
            ("gpt-4.1-mini", ModelPrice::new(0.000_4, 0.001_6)),
            ("text-embedding-3-small", ModelPrice::new(0.000_02, 0.0)),
            ("text-embedding-3-large", ModelPrice::new(0.000_13, 0.0)),
        ]
        .into_iter()
        .map(|(model, price)| (model.to_string(), price))
        .collect();

        Self {
            prices,
            fallback: ModelPrice::new(0.000_15, 0.000_6),
        }
    }
}

impl PricingTable {
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    /// Price for `model`. Dated snapshots (`gpt-4o-mini-2024-07-18`) resolve to
    /// their base model; anything else unknown uses the fallback rate.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        if let Some(price) = self.prices.get(model) {
            return *price;
        }
        self.prices
            .iter()
            .filter(|(name, _)| {
                model.starts_with(name.as_str()) && model[name.len()..].starts_with('-')
            })
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price)
            .unwrap_or(self.fallback)
    }

    pub fn estimate(&self, model: &str, usage: &Usage) -> f64 {
        self.price_for(model).cost(usage)
    }
}
