//! Market classification for financing events and deals.
//!
//! Keyword indicators over concatenated evidence text feed a fixed
//! decision tree; deals then take the highest-priority tag of their events.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::models::{Deal, FactType, FinancingEvent, MarketTag};
use crate::storage::GraphStore;

lazy_static! {
    /// Investment-grade indicators. Rating symbols stay case-sensitive so
    /// prose does not trip them.
    static ref IG_INDICATORS: Regex = Regex::new(
        r"(?:(?i:investment\s+grade))|\bIG\b|\bBBB[+-]?\b|\bAA[+-]?\b|\bAAA\b"
    )
    .unwrap();

    /// High-yield / leveraged indicators.
    static ref HY_INDICATORS: Regex = Regex::new(
        r"(?:(?i:high\s+yield))|\bHY\b|(?:(?i:\bleveraged\b))|(?:(?i:\blevfin\b))|\bBB[+-]?\b|\bCCC[+-]?\b|(?:(?i:\bjunk\b))|(?:(?i:sub[-\s]?investment\s+grade))"
    )
    .unwrap();

    static ref TLB_INDICATORS: Regex = Regex::new(
        r"(?:(?i:term\s+loan\s+b\b))|\bTLB\b|(?:(?i:institutional\s+term\s+loan))|(?:(?i:\bterm\s+b\b))"
    )
    .unwrap();

    static ref BRIDGE_INDICATORS: Regex = Regex::new(
        r"(?i:\bbridge\b|interim\s+financing|temporary\s+financing)"
    )
    .unwrap();

    static ref RCF_INDICATORS: Regex = Regex::new(
        r"(?:(?i:\brevolving\b))|\bRCF\b|(?:(?i:\brevolver\b))|\bABL\b|(?:(?i:asset[-\s]based\s+(?:lending|loan)))"
    )
    .unwrap();
}

#[derive(Debug, Default, Serialize)]
pub struct ClassifyStats {
    pub events_classified: usize,
    pub deals_classified: usize,
}

pub struct Classifier<'a> {
    store: &'a GraphStore,
}

impl<'a> Classifier<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Classify every untagged event, then retag every deal from its
    /// events.
    pub fn classify_all(&self) -> Result<ClassifyStats> {
        let mut stats = ClassifyStats::default();

        for event in self.store.all_events()? {
            if event.market_tag.is_none() {
                self.classify_event(event)?;
                stats.events_classified += 1;
            }
        }

        for deal in self.store.all_deals()? {
            self.classify_deal(deal)?;
            stats.deals_classified += 1;
        }

        info!(
            events = stats.events_classified,
            deals = stats.deals_classified,
            "🏷️ Classification complete"
        );
        Ok(stats)
    }

    /// Decision tree:
    /// bridge -> Bridge; TLB -> Term_Loan_B; RCF -> Other_Loan/rcf;
    /// bond -> HY/IG by indicators, defaulting by the deal's sponsor flag;
    /// loan -> Term_Loan_B on HY/TLB indicators else Other_Loan;
    /// anything else -> Unknown.
    pub fn classify_event(&self, mut event: FinancingEvent) -> Result<MarketTag> {
        let facts = self.store.facts_by_ids(&event.source_fact_ids)?;
        let evidence: String = facts
            .iter()
            .map(|f| f.evidence_snippet.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let is_ig = IG_INDICATORS.is_match(&evidence);
        let is_hy = HY_INDICATORS.is_match(&evidence);
        let is_tlb = TLB_INDICATORS.is_match(&evidence);
        let is_bridge = BRIDGE_INDICATORS.is_match(&evidence);
        let is_rcf = RCF_INDICATORS.is_match(&evidence);

        let mut family = event.instrument_family.clone();
        let mut instrument_type = event.instrument_type.clone();

        let tag = if is_bridge {
            instrument_type = Some("bridge".to_string());
            MarketTag::Bridge
        } else if is_tlb {
            instrument_type = Some("term_loan_b".to_string());
            family = "loan".to_string();
            MarketTag::TermLoanB
        } else if is_rcf {
            instrument_type = Some("rcf".to_string());
            family = "loan".to_string();
            MarketTag::OtherLoan
        } else if family == "bond" {
            if is_hy && !is_ig {
                MarketTag::HyBond
            } else if is_ig {
                MarketTag::IgBond
            } else {
                // Unrated bond: sponsor-backed deals default to high yield.
                let sponsor_backed = self
                    .store
                    .deal_by_id(event.deal_id)?
                    .and_then(|d| d.is_sponsor_backed)
                    .unwrap_or(false);
                if sponsor_backed {
                    MarketTag::HyBond
                } else {
                    MarketTag::IgBond
                }
            }
        } else if family == "loan" {
            if is_hy || is_tlb {
                instrument_type = Some("term_loan_b".to_string());
                MarketTag::TermLoanB
            } else {
                MarketTag::OtherLoan
            }
        } else {
            MarketTag::Unknown
        };

        event.market_tag = Some(tag.as_str().to_string());
        event.instrument_family = family;
        event.instrument_type = instrument_type;
        self.store.update_event(&event)?;
        Ok(tag)
    }

    /// Deal-level tagging: sponsor-backed if any sponsor fact attached or
    /// any event is HY_Bond / Term_Loan_B; market tag by priority over
    /// events.
    pub fn classify_deal(&self, mut deal: Deal) -> Result<()> {
        let events = self.store.events_by_deal(deal.id)?;

        let has_sponsor_fact = deal.sponsor_name_normalized.is_some()
            || self
                .store
                .facts_by_deal(deal.id)?
                .iter()
                .any(|f| f.fact_type() == FactType::SponsorMention);
        let has_levfin_event = events.iter().any(|e| {
            matches!(
                e.market_tag.as_deref(),
                Some("HY_Bond") | Some("Term_Loan_B")
            )
        });

        if deal.is_sponsor_backed.is_none() {
            deal.is_sponsor_backed = Some(has_sponsor_fact || has_levfin_event);
        } else if has_sponsor_fact || has_levfin_event {
            deal.is_sponsor_backed = Some(true);
        }

        deal.market_tag = deal_market_tag(&events).or(deal.market_tag);
        self.store.update_deal(&deal)?;
        Ok(())
    }
}

/// Priority: Term_Loan_B > HY_Bond > Bridge > IG_Bond > first-seen.
fn deal_market_tag(events: &[FinancingEvent]) -> Option<String> {
    let tags: Vec<&str> = events
        .iter()
        .filter_map(|e| e.market_tag.as_deref())
        .collect();
    if tags.is_empty() {
        return None;
    }
    for wanted in ["Term_Loan_B", "HY_Bond", "Bridge", "IG_Bond"] {
        if tags.contains(&wanted) {
            return Some(wanted.to_string());
        }
    }
    Some(tags[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AtomicFact, DatePayload, FactPayload, FinancingPayload};

    fn event_with_evidence(store: &GraphStore, deal_id: i64, family: &str, evidence: &str) -> FinancingEvent {
        let mut fact = AtomicFact::new(
            FactPayload::FinancingMention(FinancingPayload {
                instrument_family: family.to_string(),
                instrument_subtype: None,
                amount_usd: Some(100_000_000.0),
                amount_raw: None,
                currency: "USD".to_string(),
                participants: vec![],
                purpose: None,
                maturity: None,
                interest_rate: None,
            }),
            evidence,
        );
        store.insert_fact(&mut fact).unwrap();
        store.assign_fact_to_deal(fact.id, deal_id).unwrap();

        let mut event = FinancingEvent::new(deal_id, family);
        event.source_fact_ids = vec![fact.id];
        store.insert_financing_event(&mut event, &mut []).unwrap();
        event
    }

    fn make_deal(store: &GraphStore, key: &str) -> Deal {
        store.create_deal(&Deal::new(key)).unwrap().0
    }

    #[test]
    fn test_bridge_wins_over_everything() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:2");
        let event = event_with_evidence(
            &store,
            deal.id,
            "loan",
            "a bridge facility to fund the acquisition, term loan b to follow",
        );
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::Bridge);
    }

    #[test]
    fn test_tlb_classification() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:3");
        let event = event_with_evidence(
            &store,
            deal.id,
            "loan",
            "a $1.5 billion term loan b with customary covenants",
        );
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::TermLoanB);

        let stored = &store.events_by_deal(deal.id).unwrap()[0];
        assert_eq!(stored.instrument_type.as_deref(), Some("term_loan_b"));
        assert_eq!(stored.instrument_family, "loan");
    }

    #[test]
    fn test_rcf_classification() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:4");
        let event = event_with_evidence(
            &store,
            deal.id,
            "loan",
            "a revolving credit facility providing working capital",
        );
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::OtherLoan);
        let stored = &store.events_by_deal(deal.id).unwrap()[0];
        assert_eq!(stored.instrument_type.as_deref(), Some("rcf"));
    }

    #[test]
    fn test_hy_bond_classification() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:5");
        let event = event_with_evidence(
            &store,
            deal.id,
            "bond",
            "high yield senior notes to finance the leveraged buyout",
        );
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::HyBond);
    }

    #[test]
    fn test_ig_bond_classification() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:6");
        let event = event_with_evidence(
            &store,
            deal.id,
            "bond",
            "investment grade senior notes rated BBB+ by the agencies",
        );
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::IgBond);
    }

    #[test]
    fn test_unrated_bond_defaults_by_sponsor_flag() {
        let store = GraphStore::in_memory().unwrap();

        let mut sponsored = Deal::new("cik:1:cik:7");
        sponsored.is_sponsor_backed = Some(true);
        let (sponsored, _) = store.create_deal(&sponsored).unwrap();
        let event = event_with_evidence(&store, sponsored.id, "bond", "senior notes due 2031");
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::HyBond);

        let plain = make_deal(&store, "cik:1:cik:8");
        let event = event_with_evidence(&store, plain.id, "bond", "senior notes due 2030");
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::IgBond);
    }

    #[test]
    fn test_unknown_family_falls_through() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:9");
        let event =
            event_with_evidence(&store, deal.id, "unknown", "an unusual financing arrangement");
        let tag = Classifier::new(&store).classify_event(event).unwrap();
        assert_eq!(tag, MarketTag::Unknown);
    }

    #[test]
    fn test_deal_tag_priority_and_sponsor_flag() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:10");

        let ig = event_with_evidence(&store, deal.id, "bond", "investment grade notes rated BBB");
        let tlb = event_with_evidence(&store, deal.id, "loan", "term loan b facility");
        let classifier = Classifier::new(&store);
        classifier.classify_event(ig).unwrap();
        classifier.classify_event(tlb).unwrap();

        classifier
            .classify_deal(store.deal_by_id(deal.id).unwrap().unwrap())
            .unwrap();

        let stored = store.deal_by_id(deal.id).unwrap().unwrap();
        assert_eq!(stored.market_tag.as_deref(), Some("Term_Loan_B"));
        // A TLB event implies leveraged financing.
        assert_eq!(stored.is_sponsor_backed, Some(true));
    }

    #[test]
    fn test_deal_without_events_keeps_null_tag() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:11");
        Classifier::new(&store).classify_deal(deal.clone()).unwrap();
        let stored = store.deal_by_id(deal.id).unwrap().unwrap();
        assert_eq!(stored.market_tag, None);
        assert_eq!(stored.is_sponsor_backed, Some(false));
    }

    #[test]
    fn test_date_fact_does_not_confuse_classifier() {
        let store = GraphStore::in_memory().unwrap();
        let deal = make_deal(&store, "cik:1:cik:12");
        let mut fact = AtomicFact::new(
            FactPayload::DealDate(DatePayload {
                date_type: "agreement_date".to_string(),
                date_value: "2024-01-15".to_string(),
                date_raw: "January 15, 2024".to_string(),
            }),
            "dated January 15, 2024",
        );
        store.insert_fact(&mut fact).unwrap();
        store.assign_fact_to_deal(fact.id, deal.id).unwrap();
        Classifier::new(&store).classify_deal(deal).unwrap();
    }
}
