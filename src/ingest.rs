//! Filing ingestion worker.
//!
//! One filing is one unit of work: fetch primary document, fetch the index
//! and exhibits sequentially (dedup logic depends on deterministic order),
//! run extraction, persist everything in a single transaction.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{info, warn};

use crate::edgar::{EdgarClient, FetchError, FilingHeader};
use crate::extraction::{extract_from_filing, extract_visual_text};
use crate::models::{Alert, AlertKind, Exhibit, ExtractionQuality, Filing};
use crate::storage::GraphStore;

lazy_static! {
    static ref MATERIAL_EXHIBIT_PATTERNS: Vec<Regex> = [
        r"credit\s+agreement",
        r"commitment\s+letter",
        r"bridge",
        r"debt\s+financing",
        r"underwriting\s+agreement",
        r"indenture",
        r"loan\s+agreement",
        r"term\s+loan",
        r"revolving",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
    .collect();

    static ref EXHIBIT_TYPE: Regex = Regex::new(r"EX-(\d+\.?\d*)").unwrap();
    static ref TR_SEL: Selector = Selector::parse("tr").unwrap();
    static ref TD_SEL: Selector = Selector::parse("td").unwrap();
    static ref A_SEL: Selector = Selector::parse("a").unwrap();
}

/// Fetched exhibit material ready for processing. Tests construct these
/// directly; the network path builds them from the filing index.
#[derive(Debug, Clone, Default)]
pub struct ExhibitInput {
    pub exhibit_type: String,
    pub description: Option<String>,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub is_pdf: bool,
    pub raw_content: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub filings_found: usize,
    pub filings_ingested: usize,
    pub filings_skipped: usize,
    pub facts_extracted: usize,
    pub alerts_created: usize,
}

/// Ingest a company's filings for the given form types and date range.
///
/// A `Blocked` registry error is fatal and aborts the run; other per-filing
/// failures are logged and skipped.
pub async fn ingest_company_filings(
    store: &GraphStore,
    edgar: &EdgarClient,
    cik: &str,
    form_types: &[String],
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    let headers = match edgar.list_filings(cik, form_types, start_date, end_date).await {
        Ok(headers) => headers,
        Err(FetchError::NotFound(url)) => {
            warn!(cik, url = %url, "no submissions found for CIK");
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    };
    report.filings_found = headers.len();
    info!(cik, filings = headers.len(), "📥 Found filings to ingest");

    for header in headers {
        if store.filing_by_accession(&header.accession_number)?.is_some() {
            report.filings_skipped += 1;
            continue;
        }

        match ingest_single_filing(store, edgar, &header).await {
            Ok((facts, alerts)) => {
                report.filings_ingested += 1;
                report.facts_extracted += facts;
                report.alerts_created += alerts;
            }
            Err(e) => {
                if let Some(FetchError::Blocked(_)) = e.downcast_ref::<FetchError>() {
                    return Err(e);
                }
                warn!(accession = %header.accession_number, error = %e, "filing ingestion failed, skipping");
            }
        }
    }

    info!(
        cik,
        ingested = report.filings_ingested,
        facts = report.facts_extracted,
        "📦 Ingestion complete"
    );
    Ok(report)
}

async fn ingest_single_filing(
    store: &GraphStore,
    edgar: &EdgarClient,
    header: &FilingHeader,
) -> Result<(usize, usize)> {
    let filing_date = NaiveDate::parse_from_str(&header.filing_date, "%Y-%m-%d")
        .with_context(|| format!("bad filing date {}", header.filing_date))?;

    let mut filing = Filing::new(
        header.accession_number.clone(),
        header.cik.clone(),
        header.form_type.clone(),
        filing_date,
    );
    filing.company_name = header.company_name.clone();
    filing.filing_url = Some(format!(
        "https://www.sec.gov/Archives/edgar/data/{}/{}/{}",
        header.cik,
        header.accession_number.replace('-', ""),
        header.primary_document
    ));

    match edgar
        .fetch_document(&header.cik, &header.accession_number, &header.primary_document)
        .await
    {
        Ok(html) => {
            filing.visual_text = Some(extract_visual_text(&html));
            filing.raw_html = Some(html);
        }
        Err(FetchError::NotFound(url)) => {
            // A vanished primary document completes the task with no facts.
            warn!(url = %url, "primary document not found");
        }
        Err(e) => return Err(e.into()),
    }

    // Exhibits are processed sequentially within the filing.
    let exhibit_inputs = match edgar
        .fetch_filing_index(&header.cik, &header.accession_number)
        .await
    {
        Ok(index_html) => {
            let mut inputs = parse_exhibit_index(&index_html);
            for input in inputs.iter_mut() {
                if input.is_pdf {
                    continue;
                }
                if let Some(url) = input.url.clone() {
                    match edgar.fetch(&url).await {
                        Ok(content) => input.raw_content = Some(content),
                        Err(e) => {
                            warn!(url = %url, error = %e, "exhibit fetch failed");
                        }
                    }
                }
            }
            inputs
        }
        Err(e) => {
            warn!(accession = %header.accession_number, error = %e, "index fetch failed");
            Vec::new()
        }
    };

    let ingested = process_fetched_filing(store, filing, exhibit_inputs)?;
    Ok(ingested)
}

/// Parse the filing index page into exhibit metadata.
pub fn parse_exhibit_index(index_html: &str) -> Vec<ExhibitInput> {
    let document = Html::parse_document(index_html);
    let mut inputs = Vec::new();

    for row in document.select(&TR_SEL) {
        let cells: Vec<_> = row.select(&TD_SEL).collect();
        if cells.len() < 3 {
            continue;
        }
        let texts: Vec<String> = cells
            .iter()
            .map(|c| c.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .collect();
        let row_text = texts.join(" ").to_uppercase();
        if !row_text.contains("EX-") && !row_text.contains("EXHIBIT") {
            continue;
        }

        let Some(link) = row.select(&A_SEL).next() else {
            continue;
        };
        let filename = link.text().collect::<Vec<_>>().join("").trim().to_string();
        let href = link.value().attr("href").unwrap_or_default();

        let exhibit_type = EXHIBIT_TYPE
            .captures(&row_text)
            .map(|c| format!("EX-{}", &c[1]))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let description = texts.get(1).filter(|t| !t.is_empty()).cloned();

        inputs.push(ExhibitInput {
            exhibit_type,
            description,
            is_pdf: filename.to_lowercase().ends_with(".pdf"),
            url: if href.is_empty() {
                None
            } else if href.starts_with("http") {
                Some(href.to_string())
            } else {
                Some(format!("https://www.sec.gov{}", href))
            },
            filename: if filename.is_empty() { None } else { Some(filename) },
            raw_content: None,
        });
    }

    inputs
}

fn is_material_description(description: &str) -> bool {
    MATERIAL_EXHIBIT_PATTERNS
        .iter()
        .any(|p| p.is_match(description))
}

/// Process an already-fetched filing: build exhibits, run extraction,
/// raise alerts for unparsed material exhibits, and persist the whole
/// bundle in one transaction.
///
/// Returns (facts stored, alerts stored).
pub fn process_fetched_filing(
    store: &GraphStore,
    mut filing: Filing,
    exhibit_inputs: Vec<ExhibitInput>,
) -> Result<(usize, usize)> {
    let mut exhibits: Vec<Exhibit> = Vec::new();
    for (i, input) in exhibit_inputs.into_iter().enumerate() {
        let mut exhibit = Exhibit::new(0, input.exhibit_type);
        // Placeholder id until the transaction assigns the real one.
        exhibit.id = -((i as i64) + 1);
        exhibit.description = input.description.clone();
        exhibit.filename = input.filename;
        exhibit.url = input.url;
        exhibit.is_pdf = input.is_pdf;
        exhibit.is_material = input
            .description
            .as_deref()
            .map(is_material_description)
            .unwrap_or(false);

        match input.raw_content {
            Some(content) => {
                let visual = extract_visual_text(&content);
                exhibit.extraction_quality = if visual.trim().is_empty() {
                    Some(ExtractionQuality::Failed)
                } else {
                    Some(ExtractionQuality::Good)
                };
                exhibit.visual_text = Some(visual);
                exhibit.raw_content = Some(content);
                exhibit.processed = true;
            }
            None => {
                // PDFs are opaque here; anything else without content is a
                // failed extraction.
                exhibit.extraction_quality = Some(ExtractionQuality::Failed);
            }
        }
        exhibits.push(exhibit);
    }

    let mut outcome = extract_from_filing(&mut filing, &mut exhibits);

    for exhibit in &exhibits {
        if exhibit.extraction_quality == Some(ExtractionQuality::Failed) && exhibit.is_material {
            let mut alert = Alert::new(
                AlertKind::UnparsedMaterialExhibit,
                format!(
                    "Material exhibit could not be parsed: {}",
                    exhibit.description.as_deref().unwrap_or("unknown")
                ),
            )
            .with_description(
                "Extraction produced no text for a material financing exhibit; manual entry needed",
            )
            .with_exhibit(exhibit.id);
            alert.exhibit_link = exhibit.url.clone();
            alert.fields_needed = Some(
                ["facility_type", "amount", "participants", "roles", "purpose"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            );
            outcome.alerts.push(alert);
        }
    }

    filing.processed = true;
    filing.processed_at = Some(Utc::now());

    let facts = outcome.facts.len();
    let alerts = outcome.alerts.len();
    store.persist_filing_bundle(
        &mut filing,
        &mut exhibits,
        &mut outcome.facts,
        &mut outcome.alerts,
    )?;
    Ok((facts, alerts))
}
