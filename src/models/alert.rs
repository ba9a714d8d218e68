//! Human-review alerts emitted by any pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    UnparsedMaterialExhibit,
    FailedPrivateTargetExtraction,
    FailedSponsorExtraction,
    LowConfidenceMatch,
    DealMergeCandidate,
    UnresolvedBank,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::UnparsedMaterialExhibit => "UNPARSED_MATERIAL_EXHIBIT",
            AlertKind::FailedPrivateTargetExtraction => "FAILED_PRIVATE_TARGET_EXTRACTION",
            AlertKind::FailedSponsorExtraction => "FAILED_SPONSOR_EXTRACTION",
            AlertKind::LowConfidenceMatch => "LOW_CONFIDENCE_MATCH",
            AlertKind::DealMergeCandidate => "DEAL_MERGE_CANDIDATE",
            AlertKind::UnresolvedBank => "UNRESOLVED_BANK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNPARSED_MATERIAL_EXHIBIT" => Some(AlertKind::UnparsedMaterialExhibit),
            "FAILED_PRIVATE_TARGET_EXTRACTION" => Some(AlertKind::FailedPrivateTargetExtraction),
            "FAILED_SPONSOR_EXTRACTION" => Some(AlertKind::FailedSponsorExtraction),
            "LOW_CONFIDENCE_MATCH" => Some(AlertKind::LowConfidenceMatch),
            "DEAL_MERGE_CANDIDATE" => Some(AlertKind::DealMergeCandidate),
            "UNRESOLVED_BANK" => Some(AlertKind::UnresolvedBank),
            _ => None,
        }
    }
}

/// A queued human-review task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub kind: AlertKind,

    pub filing_id: Option<i64>,
    pub exhibit_id: Option<i64>,
    pub deal_id: Option<i64>,

    pub title: String,
    pub description: Option<String>,

    pub exhibit_link: Option<String>,
    /// Fields a human should supply, e.g. facility_type, amount, roles.
    pub fields_needed: Option<Vec<String>>,

    /// SHA-256 of the preamble, used to deduplicate repeated failures.
    pub preamble_hash: Option<String>,
    pub preamble_preview: Option<String>,

    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            filing_id: None,
            exhibit_id: None,
            deal_id: None,
            title: title.into(),
            description: None,
            exhibit_link: None,
            fields_needed: None,
            preamble_hash: None,
            preamble_preview: None,
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_filing(mut self, filing_id: i64) -> Self {
        self.filing_id = Some(filing_id);
        self
    }

    pub fn with_exhibit(mut self, exhibit_id: i64) -> Self {
        self.exhibit_id = Some(exhibit_id);
        self
    }

    pub fn with_deal(mut self, deal_id: i64) -> Self {
        self.deal_id = Some(deal_id);
        self
    }
}
