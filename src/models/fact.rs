//! Atomic facts: the sole output of document extraction.
//!
//! Extraction emits facts only, never deals. `deal_id` is NULL at creation
//! and assigned exactly once, by the clusterer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for the fact payload union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactType {
    PartyMention,
    PartyDefinition,
    SponsorMention,
    DealDate,
    FinancingMention,
    AdvisorMention,
    DealValue,
    Manual,
}

impl FactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::PartyMention => "PARTY_MENTION",
            FactType::PartyDefinition => "PARTY_DEFINITION",
            FactType::SponsorMention => "SPONSOR_MENTION",
            FactType::DealDate => "DEAL_DATE",
            FactType::FinancingMention => "FINANCING_MENTION",
            FactType::AdvisorMention => "ADVISOR_MENTION",
            FactType::DealValue => "DEAL_VALUE",
            FactType::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PARTY_MENTION" => Some(FactType::PartyMention),
            "PARTY_DEFINITION" => Some(FactType::PartyDefinition),
            "SPONSOR_MENTION" => Some(FactType::SponsorMention),
            "DEAL_DATE" => Some(FactType::DealDate),
            "FINANCING_MENTION" => Some(FactType::FinancingMention),
            "ADVISOR_MENTION" => Some(FactType::AdvisorMention),
            "DEAL_VALUE" => Some(FactType::DealValue),
            "MANUAL" => Some(FactType::Manual),
            _ => None,
        }
    }
}

/// Party payload, shared by PARTY_DEFINITION and PARTY_MENTION.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyPayload {
    pub party_name_raw: String,
    pub party_name_normalized: String,
    pub party_name_display: String,
    /// Defined-term label: Company, Parent, Merger Sub, Purchaser, ...
    pub role_label: String,
    #[serde(default)]
    pub cik: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorPayload {
    pub sponsor_name_raw: String,
    pub sponsor_name_normalized: String,
    /// "seed_list" or "affiliation_pattern".
    pub source_pattern: String,
    pub context_snippet: String,
    #[serde(default)]
    pub is_negated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatePayload {
    /// "agreement_date", "announcement_date", "expected_close".
    pub date_type: String,
    /// ISO 8601.
    pub date_value: String,
    pub date_raw: String,
}

/// A bank named alongside a financing instrument, before reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantPayload {
    pub bank: String,
    pub bank_normalized: String,
    pub role: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancingPayload {
    /// Coarse family: bond, loan, bridge, unknown.
    pub instrument_family: String,
    #[serde(default)]
    pub instrument_subtype: Option<String>,
    #[serde(default)]
    pub amount_usd: Option<f64>,
    #[serde(default)]
    pub amount_raw: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub participants: Vec<ParticipantPayload>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub maturity: Option<String>,
    #[serde(default)]
    pub interest_rate: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorPayload {
    pub bank_name_raw: String,
    pub bank_name_normalized: String,
    pub role: String,
    /// "target", "acquirer", "issuer".
    pub client_side: String,
    #[serde(default)]
    pub bank_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealValuePayload {
    pub amount_usd: f64,
    pub amount_raw: String,
}

/// Human-provided payload persisted as a first-class fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualPayload {
    pub input_type: String,
    pub data: serde_json::Value,
    pub entered_by: String,
}

/// Variant-shaped payload bag. One schema per variant, validated on
/// construction through serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactPayload {
    PartyMention(PartyPayload),
    PartyDefinition(PartyPayload),
    SponsorMention(SponsorPayload),
    DealDate(DatePayload),
    FinancingMention(FinancingPayload),
    AdvisorMention(AdvisorPayload),
    DealValue(DealValuePayload),
    Manual(ManualPayload),
}

impl FactPayload {
    pub fn fact_type(&self) -> FactType {
        match self {
            FactPayload::PartyMention(_) => FactType::PartyMention,
            FactPayload::PartyDefinition(_) => FactType::PartyDefinition,
            FactPayload::SponsorMention(_) => FactType::SponsorMention,
            FactPayload::DealDate(_) => FactType::DealDate,
            FactPayload::FinancingMention(_) => FactType::FinancingMention,
            FactPayload::AdvisorMention(_) => FactType::AdvisorMention,
            FactPayload::DealValue(_) => FactType::DealValue,
            FactPayload::Manual(_) => FactType::Manual,
        }
    }

    pub fn as_party(&self) -> Option<&PartyPayload> {
        match self {
            FactPayload::PartyMention(p) | FactPayload::PartyDefinition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_sponsor(&self) -> Option<&SponsorPayload> {
        match self {
            FactPayload::SponsorMention(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DatePayload> {
        match self {
            FactPayload::DealDate(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_financing(&self) -> Option<&FinancingPayload> {
        match self {
            FactPayload::FinancingMention(p) => Some(p),
            _ => None,
        }
    }
}

/// An evidence-bearing extraction with a typed payload and an optional
/// link to a deal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicFact {
    pub id: i64,
    pub filing_id: Option<i64>,
    pub exhibit_id: Option<i64>,
    /// NULL until the clusterer assigns it; write-once.
    pub deal_id: Option<i64>,
    /// Verbatim substring of the source document. Never empty.
    pub evidence_snippet: String,
    pub evidence_start_offset: Option<i64>,
    pub evidence_end_offset: Option<i64>,
    /// "preamble", "item_1.01", "item_8.01", "press_release",
    /// "equity_commitment", "announcement".
    pub source_section: Option<String>,
    /// "regex", "table", "manual".
    pub extraction_method: String,
    pub extraction_pattern: Option<String>,
    pub confidence: f64,
    pub payload: FactPayload,
    pub created_at: DateTime<Utc>,
}

impl AtomicFact {
    pub fn new(payload: FactPayload, evidence_snippet: impl Into<String>) -> Self {
        Self {
            id: 0,
            filing_id: None,
            exhibit_id: None,
            deal_id: None,
            evidence_snippet: evidence_snippet.into(),
            evidence_start_offset: None,
            evidence_end_offset: None,
            source_section: None,
            extraction_method: "regex".to_string(),
            extraction_pattern: None,
            confidence: 0.5,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn fact_type(&self) -> FactType {
        self.payload.fact_type()
    }

    pub fn with_filing(mut self, filing_id: i64) -> Self {
        self.filing_id = Some(filing_id);
        self
    }

    pub fn with_exhibit(mut self, exhibit_id: i64, filing_id: i64) -> Self {
        self.exhibit_id = Some(exhibit_id);
        self.filing_id = Some(filing_id);
        self
    }

    pub fn with_section(mut self, section: &str) -> Self {
        self.source_section = Some(section.to_string());
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.extraction_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.extraction_method = method.to_string();
        self
    }

    pub fn with_offsets(mut self, start: usize, end: usize) -> Self {
        self.evidence_start_offset = Some(start as i64);
        self.evidence_end_offset = Some(end as i64);
        self
    }

    /// Dedup key: repeated extraction runs must not duplicate facts.
    pub fn evidence_fingerprint(&self) -> String {
        self.evidence_snippet.chars().take(100).collect()
    }
}
