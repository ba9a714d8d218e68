//! Reconciliation: turns clustered FINANCING_MENTION facts into financing
//! events with participants, and scores unlinked financing facts against
//! candidate deals.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AttributionConfig;
use crate::extraction::patterns::normalize_bank_name;
use crate::models::{
    AtomicFact, Deal, DealState, FactType, FinancingEvent, FinancingParticipant,
};
use crate::storage::GraphStore;

use super::partial_ratio;

#[derive(Debug, Default, Serialize)]
pub struct ReconcileStats {
    pub facts_processed: usize,
    pub events_created: usize,
    pub matches_found: usize,
    pub low_confidence_skipped: usize,
}

/// How a deal matched an unlinked financing fact.
#[derive(Debug, Clone)]
struct DealMatch {
    deal_id: i64,
    confidence: f64,
    explanation: String,
}

pub struct Reconciler<'a> {
    store: &'a GraphStore,
    min_confidence: f64,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a GraphStore, config: &AttributionConfig) -> Self {
        Self {
            store,
            min_confidence: config.thresholds.reconcile_min_confidence.unwrap_or(0.5),
        }
    }

    pub fn with_min_confidence(store: &'a GraphStore, min_confidence: f64) -> Self {
        Self {
            store,
            min_confidence,
        }
    }

    /// Materialize events for clustered facts, then attempt to attach
    /// unlinked facts by scoring.
    pub fn reconcile(&self) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();
        self.materialize_clustered(&mut stats)?;
        self.reconcile_unlinked(&mut stats)?;
        info!(
            processed = stats.facts_processed,
            events = stats.events_created,
            skipped = stats.low_confidence_skipped,
            "🔗 Reconciliation complete"
        );
        Ok(stats)
    }

    fn materialize_clustered(&self, stats: &mut ReconcileStats) -> Result<()> {
        let facts = self.store.clustered_facts(FactType::FinancingMention)?;
        for fact in &facts {
            stats.facts_processed += 1;
            // Events are idempotent on their source-fact set.
            if self.store.event_exists_for_fact(fact.id)? {
                continue;
            }
            if self
                .create_event_from_fact(fact, 1.0, "direct link via clustering")?
                .is_some()
            {
                stats.events_created += 1;
            }
        }
        Ok(())
    }

    fn reconcile_unlinked(&self, stats: &mut ReconcileStats) -> Result<()> {
        let unlinked = self
            .store
            .unclustered_facts(&[FactType::FinancingMention])?;
        if unlinked.is_empty() {
            return Ok(());
        }

        let candidates = self
            .store
            .deals_by_states(&[DealState::Candidate, DealState::Open])?;

        for fact in &unlinked {
            stats.facts_processed += 1;
            let best = self.best_deal_match(fact, &candidates);
            match best {
                Some(m) if m.confidence >= self.min_confidence => {
                    if self.store.assign_fact_to_deal(fact.id, m.deal_id)? {
                        stats.matches_found += 1;
                        let mut fact = fact.clone();
                        fact.deal_id = Some(m.deal_id);
                        if self
                            .create_event_from_fact(&fact, m.confidence, &m.explanation)?
                            .is_some()
                        {
                            stats.events_created += 1;
                        }
                    }
                }
                _ => {
                    debug!(fact = fact.id, "financing fact below confidence threshold");
                    stats.low_confidence_skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn best_deal_match(&self, fact: &AtomicFact, deals: &[Deal]) -> Option<DealMatch> {
        let evidence_lower = fact.evidence_snippet.to_lowercase();
        let mut best: Option<DealMatch> = None;
        for deal in deals {
            let m = score_deal_match(deal, &evidence_lower);
            if best.as_ref().map_or(true, |b| m.confidence > b.confidence) {
                best = Some(m);
            }
        }
        best.filter(|m| m.confidence > 0.0)
    }

    fn create_event_from_fact(
        &self,
        fact: &AtomicFact,
        confidence: f64,
        explanation: &str,
    ) -> Result<Option<i64>> {
        let Some(deal_id) = fact.deal_id else {
            return Ok(None);
        };
        let Some(payload) = fact.payload.as_financing() else {
            return Ok(None);
        };

        let mut event = FinancingEvent::new(deal_id, payload.instrument_family.clone());
        event.instrument_type = payload.instrument_subtype.clone();
        event.amount_usd = payload.amount_usd;
        event.amount_raw = payload.amount_raw.clone();
        event.currency = payload.currency.clone();
        event.maturity = payload.maturity.clone();
        event.interest_rate = payload.interest_rate.clone();
        event.purpose = payload.purpose.clone();
        event.source_exhibit_id = fact.exhibit_id;
        event.source_fact_ids = vec![fact.id];
        event.reconciliation_confidence = confidence;
        event.reconciliation_explanation = Some(explanation.to_string());

        let evidence_source = if fact.extraction_method == "table" {
            "table"
        } else {
            "text"
        };
        let mut participants: Vec<FinancingParticipant> = payload
            .participants
            .iter()
            .map(|p| {
                let mut participant = FinancingParticipant::new(p.bank.clone(), p.role.clone());
                participant.bank_name_normalized = if p.bank_normalized.is_empty() {
                    normalize_bank_name(&p.bank)
                } else {
                    p.bank_normalized.clone()
                };
                participant.role_normalized = normalize_role(&p.role).to_string();
                participant.evidence_snippet = p.evidence.clone();
                participant.evidence_source = Some(evidence_source.to_string());
                participant
            })
            .collect();

        let event_id = self
            .store
            .insert_financing_event(&mut event, &mut participants)?;
        Ok(Some(event_id))
    }
}

/// Additive match signals: target name is strong, acquirer moderate,
/// sponsor weak. Confidence clamps at 1.0.
fn score_deal_match(deal: &Deal, evidence_lower: &str) -> DealMatch {
    let mut confidence = 0.0f64;
    let mut explanations: Vec<String> = Vec::new();

    if let Some(target) = deal.target_name_normalized.as_deref() {
        if !target.is_empty() {
            if evidence_lower.contains(target) {
                confidence += 0.5;
                explanations.push(format!("target name '{}' found in evidence", target));
            } else {
                let ratio = partial_ratio(target, evidence_lower);
                if ratio > 0.85 {
                    confidence += 0.4 * ratio;
                    explanations.push(format!("target name fuzzy match: {:.0}%", ratio * 100.0));
                }
            }
        }
    }

    if let Some(acquirer) = deal.acquirer_name_normalized.as_deref() {
        if !acquirer.is_empty() {
            if evidence_lower.contains(acquirer) {
                confidence += 0.3;
                explanations.push(format!("acquirer name '{}' found in evidence", acquirer));
            } else {
                let ratio = partial_ratio(acquirer, evidence_lower);
                if ratio > 0.85 {
                    confidence += 0.2 * ratio;
                    explanations.push(format!("acquirer name fuzzy match: {:.0}%", ratio * 100.0));
                }
            }
        }
    }

    if let Some(sponsor) = deal.sponsor_name_normalized.as_deref() {
        if !sponsor.is_empty() {
            if evidence_lower.contains(sponsor) {
                confidence += 0.2;
                explanations.push(format!("sponsor '{}' found in evidence", sponsor));
            } else {
                let ratio = partial_ratio(sponsor, evidence_lower);
                if ratio > 0.80 {
                    confidence += 0.1 * ratio;
                    explanations.push(format!("sponsor fuzzy match: {:.0}%", ratio * 100.0));
                }
            }
        }
    }

    DealMatch {
        deal_id: deal.id,
        confidence: confidence.min(1.0),
        explanation: if explanations.is_empty() {
            "no strong signals".to_string()
        } else {
            explanations.join("; ")
        },
    }
}

/// Normalize a raw role into the canonical fee-split vocabulary. Anything
/// unrecognized is `other`.
pub fn normalize_role(role: &str) -> &'static str {
    let role = role.trim().to_lowercase();

    if role.contains("bookrunner") || role.contains("book-runn") || role.contains("bookrunn") {
        if role.contains("joint") {
            return "joint_bookrunner";
        }
        return "bookrunner";
    }
    if role.contains("co-manager") || role.contains("co manager") {
        return "co_manager";
    }
    if role.contains("underwriter") {
        if role.contains("lead") || role.contains("senior") {
            return "lead_underwriter";
        }
        return "underwriter";
    }
    if role.contains("arranger") {
        if role.contains("joint") && role.contains("lead") {
            return "joint_lead_arranger";
        }
        if role.contains("lead") || role.contains("mandated") {
            return "lead_arranger";
        }
        return "arranger";
    }
    if role.contains("admin") && role.contains("agent") {
        return "admin_agent";
    }
    if role.contains("syndication") {
        return "syndication_agent";
    }
    if role.contains("agent") {
        return "agent";
    }
    "other"
}
