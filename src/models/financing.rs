//! Financing events and syndicate participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse market classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketTag {
    #[serde(rename = "IG_Bond")]
    IgBond,
    #[serde(rename = "HY_Bond")]
    HyBond,
    #[serde(rename = "Term_Loan_B")]
    TermLoanB,
    #[serde(rename = "Other_Loan")]
    OtherLoan,
    #[serde(rename = "Bridge")]
    Bridge,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl MarketTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketTag::IgBond => "IG_Bond",
            MarketTag::HyBond => "HY_Bond",
            MarketTag::TermLoanB => "Term_Loan_B",
            MarketTag::OtherLoan => "Other_Loan",
            MarketTag::Bridge => "Bridge",
            MarketTag::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IG_Bond" => Some(MarketTag::IgBond),
            "HY_Bond" => Some(MarketTag::HyBond),
            "Term_Loan_B" => Some(MarketTag::TermLoanB),
            "Other_Loan" => Some(MarketTag::OtherLoan),
            "Bridge" => Some(MarketTag::Bridge),
            "Unknown" => Some(MarketTag::Unknown),
            _ => None,
        }
    }
}

/// One financing instrument associated with a deal.
///
/// Append-only per `source_fact_ids` set: re-running reconciliation never
/// materializes the same fact twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancingEvent {
    pub id: i64,
    pub deal_id: i64,

    /// bond, loan, bridge, unknown.
    pub instrument_family: String,
    /// term_loan_b, rcf, ig_bond, hy_bond, bridge, ...
    pub instrument_type: Option<String>,
    pub market_tag: Option<String>,

    pub amount_usd: Option<f64>,
    pub amount_raw: Option<String>,
    pub currency: String,

    pub maturity: Option<String>,
    pub interest_rate: Option<String>,
    pub spread_bps: Option<i64>,
    pub purpose: Option<String>,

    pub reconciliation_confidence: f64,
    pub reconciliation_explanation: Option<String>,

    pub source_exhibit_id: Option<i64>,
    /// Atomic fact ids this event was materialized from. Never empty.
    pub source_fact_ids: Vec<i64>,

    pub estimated_fee_usd: Option<f64>,

    pub created_at: DateTime<Utc>,
}

impl FinancingEvent {
    pub fn new(deal_id: i64, instrument_family: impl Into<String>) -> Self {
        Self {
            id: 0,
            deal_id,
            instrument_family: instrument_family.into(),
            instrument_type: None,
            market_tag: None,
            amount_usd: None,
            amount_raw: None,
            currency: "USD".to_string(),
            maturity: None,
            interest_rate: None,
            spread_bps: None,
            purpose: None,
            reconciliation_confidence: 1.0,
            reconciliation_explanation: None,
            source_exhibit_id: None,
            source_fact_ids: Vec::new(),
            estimated_fee_usd: None,
            created_at: Utc::now(),
        }
    }
}

/// A bank playing a role in a financing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancingParticipant {
    pub id: i64,
    pub financing_event_id: i64,
    /// Resolved canonical bank id, when known.
    pub bank_id: Option<i64>,

    pub bank_name_raw: String,
    pub bank_name_normalized: String,

    pub role: String,
    /// Canonical role used for fee splits. Always inside the closed
    /// vocabulary (`other` when nothing matched).
    pub role_normalized: String,

    pub evidence_snippet: Option<String>,
    /// "table", "text", "manual".
    pub evidence_source: Option<String>,
    /// {row, col} when the participant came out of a table.
    pub table_cell_coords: Option<serde_json::Value>,

    pub role_weight: Option<f64>,
    pub estimated_fee_usd: Option<f64>,
}

impl FinancingParticipant {
    pub fn new(bank_name_raw: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: 0,
            financing_event_id: 0,
            bank_id: None,
            bank_name_raw: bank_name_raw.into(),
            bank_name_normalized: String::new(),
            role: role.into(),
            role_normalized: "other".to_string(),
            evidence_snippet: None,
            evidence_source: None,
            table_cell_coords: None,
            role_weight: None,
            estimated_fee_usd: None,
        }
    }
}

/// Canonical participant-role vocabulary for fee splits.
pub const CANONICAL_ROLES: &[&str] = &[
    "bookrunner",
    "joint_bookrunner",
    "co_manager",
    "lead_underwriter",
    "underwriter",
    "lead_arranger",
    "joint_lead_arranger",
    "arranger",
    "admin_agent",
    "syndication_agent",
    "agent",
    "other",
];
