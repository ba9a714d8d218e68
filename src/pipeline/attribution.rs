//! Fee attribution from the process-wide configuration.
//!
//! Advisory fees apply tiered bps to the deal value; underwriting fees
//! apply per-market-tag bps to each event's amount and split across
//! participants by configured role weights.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::config::AttributionConfig;
use crate::models::{Deal, FinancingEvent};
use crate::storage::GraphStore;

#[derive(Debug, Default, Serialize)]
pub struct AttributionStats {
    pub deals_processed: usize,
    pub events_processed: usize,
    pub total_advisory_fees: f64,
    pub total_underwriting_fees: f64,
}

pub struct AttributionEngine<'a> {
    store: &'a GraphStore,
    config: &'a AttributionConfig,
}

impl<'a> AttributionEngine<'a> {
    pub fn new(store: &'a GraphStore, config: &'a AttributionConfig) -> Self {
        Self { store, config }
    }

    pub fn calculate_all_fees(&self) -> Result<AttributionStats> {
        let mut stats = AttributionStats::default();
        for deal in self.store.all_deals()? {
            let (advisory, underwriting, events) = self.calculate_deal_fees(deal)?;
            stats.deals_processed += 1;
            stats.events_processed += events;
            stats.total_advisory_fees += advisory.unwrap_or(0.0);
            stats.total_underwriting_fees += underwriting;
        }
        info!(
            deals = stats.deals_processed,
            advisory = stats.total_advisory_fees,
            underwriting = stats.total_underwriting_fees,
            "💰 Attribution complete"
        );
        Ok(stats)
    }

    /// Returns (advisory fee, total underwriting fee, events processed).
    /// A deal without a value simply gets no advisory fee.
    pub fn calculate_deal_fees(&self, mut deal: Deal) -> Result<(Option<f64>, f64, usize)> {
        let advisory = deal.deal_value_usd.map(|value| {
            let bps = self.advisory_bps(value);
            value * (bps / 10_000.0)
        });
        deal.advisory_fee_estimated = advisory;

        let events = self.store.events_by_deal(deal.id)?;
        let mut total_underwriting = 0.0;
        let mut processed = 0usize;
        for event in events {
            total_underwriting += self.calculate_event_fee(event)?;
            processed += 1;
        }
        deal.underwriting_fee_estimated = Some(total_underwriting);
        self.store.update_deal(&deal)?;

        Ok((advisory, total_underwriting, processed))
    }

    fn advisory_bps(&self, deal_value: f64) -> f64 {
        let tiers = &self.config.advisory_fee_bps;
        if deal_value >= 5_000_000_000.0 {
            tiers.deal_size_over_5b.unwrap_or(tiers.default)
        } else if deal_value >= 1_000_000_000.0 {
            tiers.deal_size_over_1b.unwrap_or(tiers.default)
        } else {
            tiers.default
        }
    }

    fn underwriting_bps(&self, market_tag: &str) -> f64 {
        self.config
            .underwriting_fee_bps
            .get(market_tag)
            .or_else(|| self.config.underwriting_fee_bps.get("Unknown"))
            .copied()
            .unwrap_or(100.0)
    }

    /// Event fee plus participant allocation. An event without an amount
    /// gets a zero fee.
    pub fn calculate_event_fee(&self, mut event: FinancingEvent) -> Result<f64> {
        let Some(amount) = event.amount_usd else {
            event.estimated_fee_usd = Some(0.0);
            self.store.update_event(&event)?;
            return Ok(0.0);
        };

        let market_tag = event.market_tag.as_deref().unwrap_or("Unknown");
        let bps = self.underwriting_bps(market_tag);
        let fee = amount * (bps / 10_000.0);
        event.estimated_fee_usd = Some(fee);
        self.store.update_event(&event)?;

        self.allocate_to_participants(&event, fee)?;
        Ok(fee)
    }

    /// Proportional allocation by `role_splits[family][role]`, falling back
    /// to the `other` weight, finally to an even split when the total
    /// weight is zero. The shares always sum to the event fee.
    fn allocate_to_participants(&self, event: &FinancingEvent, total_fee: f64) -> Result<()> {
        let mut participants = self.store.participants_by_event(event.id)?;
        if participants.is_empty() || total_fee == 0.0 {
            return Ok(());
        }

        let empty = std::collections::HashMap::new();
        let splits = self
            .config
            .role_splits
            .get(&event.instrument_family)
            .unwrap_or(&empty);
        let other_weight = splits.get("other").copied().unwrap_or(0.1);

        let mut total_weight = 0.0;
        for participant in participants.iter_mut() {
            let weight = splits
                .get(participant.role_normalized.as_str())
                .copied()
                .unwrap_or(other_weight);
            participant.role_weight = Some(weight);
            total_weight += weight;
        }

        let even_share = total_fee / participants.len() as f64;
        for participant in participants.iter_mut() {
            let share = if total_weight > 0.0 {
                total_fee * (participant.role_weight.unwrap_or(0.0) / total_weight)
            } else {
                even_share
            };
            participant.estimated_fee_usd = Some(share);
            self.store.update_participant(participant)?;
        }
        Ok(())
    }
}
