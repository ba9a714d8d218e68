//! Deal entity with the tiered clustering key.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Deal lifecycle states.
///
/// LOCKED is terminal for pipeline writes: new matching facts raise alerts
/// instead of mutating the deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealState {
    Candidate,
    Open,
    Closed,
    Locked,
    NeedsReview,
}

impl DealState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealState::Candidate => "CANDIDATE",
            DealState::Open => "OPEN",
            DealState::Closed => "CLOSED",
            DealState::Locked => "LOCKED",
            DealState::NeedsReview => "NEEDS_REVIEW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CANDIDATE" => Some(DealState::Candidate),
            "OPEN" => Some(DealState::Open),
            "CLOSED" => Some(DealState::Closed),
            "LOCKED" => Some(DealState::Locked),
            "NEEDS_REVIEW" => Some(DealState::NeedsReview),
            _ => None,
        }
    }
}

/// Build the stable clustering key.
///
/// Priority:
/// 1. `cik:<acquirer_cik>:cik:<target_cik>`
/// 2. `cik:<acquirer_cik>:name:<target_name_normalized>`
/// 3. `name:<acquirer>:name:<target>`, returned with `needs_review = true`
///
/// Returns `(key, needs_review)`, or None when neither side is identified.
pub fn build_deal_key(
    acquirer_cik: Option<&str>,
    acquirer_name: Option<&str>,
    target_cik: Option<&str>,
    target_name: Option<&str>,
) -> Option<(String, bool)> {
    let acquirer_cik = acquirer_cik.filter(|s| !s.is_empty());
    let acquirer_name = acquirer_name.filter(|s| !s.is_empty());
    let target_cik = target_cik.filter(|s| !s.is_empty());
    let target_name = target_name.filter(|s| !s.is_empty());

    match (acquirer_cik, target_cik, target_name) {
        (Some(a), Some(t), _) => Some((format!("cik:{}:cik:{}", a, t), false)),
        (Some(a), None, Some(t)) => Some((format!("cik:{}:name:{}", a, t), false)),
        (None, _, Some(t)) => {
            acquirer_name.map(|a| (format!("name:{}:name:{}", a, t), true))
        }
        _ => None,
    }
}

/// One M&A transaction.
///
/// The sponsor identity is stored separately from the acquirer identity and
/// is never merged into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub state: DealState,

    pub acquirer_cik: Option<String>,
    pub acquirer_name_raw: Option<String>,
    pub acquirer_name_display: Option<String>,
    pub acquirer_name_normalized: Option<String>,

    pub target_cik: Option<String>,
    pub target_name_raw: Option<String>,
    pub target_name_display: Option<String>,
    pub target_name_normalized: Option<String>,

    /// Stable clustering key; unique across non-LOCKED deals.
    pub deal_key: String,

    pub announcement_date: Option<NaiveDate>,
    pub agreement_date: Option<NaiveDate>,
    pub expected_close_date: Option<NaiveDate>,
    pub actual_close_date: Option<NaiveDate>,

    pub deal_value_usd: Option<f64>,
    pub deal_value_evidence: Option<String>,

    pub is_sponsor_backed: Option<bool>,
    pub sponsor_name_raw: Option<String>,
    pub sponsor_name_normalized: Option<String>,
    pub sponsor_confidence: Option<f64>,
    /// {fact_id, snippet, pattern} recorded when the sponsor was attached.
    pub sponsor_evidence: Option<serde_json::Value>,
    pub sponsor_entity_id: Option<i64>,
    pub unresolved_sponsor_entity: bool,

    pub market_tag: Option<String>,
    pub is_cross_border: bool,

    pub advisory_fee_estimated: Option<f64>,
    pub underwriting_fee_estimated: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl Deal {
    pub fn new(deal_key: impl Into<String>) -> Self {
        Self {
            id: 0,
            state: DealState::Candidate,
            acquirer_cik: None,
            acquirer_name_raw: None,
            acquirer_name_display: None,
            acquirer_name_normalized: None,
            target_cik: None,
            target_name_raw: None,
            target_name_display: None,
            target_name_normalized: None,
            deal_key: deal_key.into(),
            announcement_date: None,
            agreement_date: None,
            expected_close_date: None,
            actual_close_date: None,
            deal_value_usd: None,
            deal_value_evidence: None,
            is_sponsor_backed: None,
            sponsor_name_raw: None,
            sponsor_name_normalized: None,
            sponsor_confidence: None,
            sponsor_evidence: None,
            sponsor_entity_id: None,
            unresolved_sponsor_entity: false,
            market_tag: None,
            is_cross_border: false,
            advisory_fee_estimated: None,
            underwriting_fee_estimated: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deal_key_prefers_cik_pair() {
        let (key, review) =
            build_deal_key(Some("0001730168"), Some("broadcom"), Some("0001124615"), Some("vmware"))
                .unwrap();
        assert_eq!(key, "cik:0001730168:cik:0001124615");
        assert!(!review);
    }

    #[test]
    fn test_deal_key_cik_name_for_private_target() {
        let (key, review) =
            build_deal_key(Some("0001730168"), Some("broadcom"), None, Some("target private company"))
                .unwrap();
        assert_eq!(key, "cik:0001730168:name:target private company");
        assert!(!review);
    }

    #[test]
    fn test_deal_key_name_only_flags_review() {
        let (key, review) =
            build_deal_key(None, Some("acquirer corp"), None, Some("target private company"))
                .unwrap();
        assert!(key.starts_with("name:"));
        assert!(review);
    }

    #[test]
    fn test_deal_key_missing_target_is_none() {
        assert!(build_deal_key(Some("123"), Some("a"), None, None).is_none());
    }
}
