//! Filing and Exhibit records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A fetched registry filing, identified by accession number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    pub id: i64,
    pub accession_number: String,
    pub cik: String,
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub company_name: Option<String>,
    pub filing_url: Option<String>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Raw markup cache.
    pub raw_html: Option<String>,
    /// Normalized visual text buffer (cached after first extraction).
    pub visual_text: Option<String>,
}

impl Filing {
    pub fn new(
        accession_number: impl Into<String>,
        cik: impl Into<String>,
        form_type: impl Into<String>,
        filing_date: NaiveDate,
    ) -> Self {
        Self {
            id: 0,
            accession_number: accession_number.into(),
            cik: cik.into(),
            form_type: form_type.into(),
            filing_date,
            company_name: None,
            filing_url: None,
            processed: false,
            processed_at: None,
            raw_html: None,
            visual_text: None,
        }
    }
}

/// How well text extraction went for an exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionQuality {
    Good,
    Poor,
    Failed,
}

impl ExtractionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionQuality::Good => "good",
            ExtractionQuality::Poor => "poor",
            ExtractionQuality::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(ExtractionQuality::Good),
            "poor" => Some(ExtractionQuality::Poor),
            "failed" => Some(ExtractionQuality::Failed),
            _ => None,
        }
    }
}

/// A child artifact of a filing (EX-2.1, EX-10.1, EX-99.1, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exhibit {
    pub id: i64,
    pub filing_id: i64,
    pub exhibit_type: String,
    pub description: Option<String>,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub is_pdf: bool,
    /// Credit agreements, commitment letters and the like.
    pub is_material: bool,
    pub processed: bool,
    pub extraction_quality: Option<ExtractionQuality>,
    pub raw_content: Option<String>,
    pub visual_text: Option<String>,
}

impl Exhibit {
    pub fn new(filing_id: i64, exhibit_type: impl Into<String>) -> Self {
        Self {
            id: 0,
            filing_id,
            exhibit_type: exhibit_type.into(),
            description: None,
            filename: None,
            url: None,
            is_pdf: false,
            is_material: false,
            processed: false,
            extraction_quality: None,
            raw_content: None,
            visual_text: None,
        }
    }
}
