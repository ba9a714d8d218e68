//! Atomic fact extraction.
//!
//! Document processing emits atomic facts only. It must NOT attempt to
//! create deals; that happens in the clusterer.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{
    AdvisorPayload, Alert, AlertKind, AtomicFact, DatePayload, Exhibit, FactPayload, Filing,
    FinancingPayload, ParticipantPayload, PartyPayload,
};

use super::patterns::{
    display_party_name, extract_agreement_date, extract_debt_instruments, extract_party_with_role,
    extract_sponsors, extract_underwriters, normalize_bank_name, normalize_party_name,
    split_party_span, DEFINITIVE_AGREEMENT_PATTERN, ITEM_101_PATTERN, ITEM_801_PATTERN,
    MERGER_AGREEMENT_HEADER, PREAMBLE_PARTIES_ALT, PREAMBLE_PARTY_LIST,
    PURCHASE_AGREEMENT_PATTERN,
};
use super::tables::extract_financing_participants;
use super::visual_text::{extract_visual_text, preamble, PREAMBLE_CHARS};

/// Result of running extraction over a document.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub facts: Vec<AtomicFact>,
    pub alerts: Vec<Alert>,
}

impl ExtractionOutcome {
    fn merge(&mut self, other: ExtractionOutcome) {
        self.facts.extend(other.facts);
        self.alerts.extend(other.alerts);
    }
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn ensure_filing_text(filing: &mut Filing) -> Option<String> {
    if filing.visual_text.is_none() {
        let raw = filing.raw_html.as_deref()?;
        filing.visual_text = Some(extract_visual_text(raw));
    }
    filing.visual_text.clone()
}

fn ensure_exhibit_text(exhibit: &mut Exhibit) -> Option<String> {
    if exhibit.visual_text.is_none() {
        let raw = exhibit.raw_content.as_deref()?;
        exhibit.visual_text = Some(extract_visual_text(raw));
    }
    exhibit.visual_text.clone()
}

/// Keywords marking an EX-10 exhibit as material financing paper.
const MATERIAL_KEYWORDS: &[&str] = &[
    "credit",
    "commitment",
    "bridge",
    "loan",
    "indenture",
    "financing",
];

/// Extract atomic facts from a filing and its exhibits.
///
/// The filing and exhibits are mutated only to cache normalized visual
/// text and the materiality flag; the caller persists those updates.
pub fn extract_from_filing(filing: &mut Filing, exhibits: &mut [Exhibit]) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();

    if filing.form_type.starts_with("8-K") {
        outcome.merge(extract_from_8k(filing));
    }

    for exhibit in exhibits.iter_mut() {
        outcome.merge(extract_from_exhibit(exhibit));
    }

    // The filing header states the filer's identity; when a party matches
    // the filer by normalized name, it inherits the filer's CIK. This is
    // what upgrades the deal key from the name tier to the CIK tier.
    if let Some(company) = filing.company_name.as_deref() {
        let filer_normalized = normalize_party_name(company);
        if !filer_normalized.is_empty() {
            for fact in outcome.facts.iter_mut() {
                if let FactPayload::PartyDefinition(party) | FactPayload::PartyMention(party) =
                    &mut fact.payload
                {
                    if party.cik.is_none() && party.party_name_normalized == filer_normalized {
                        party.cik = Some(filing.cik.clone());
                    }
                }
            }
        }
    }

    debug!(
        accession = %filing.accession_number,
        facts = outcome.facts.len(),
        alerts = outcome.alerts.len(),
        "extraction finished"
    );
    outcome
}

/// 8-K current report: Item 1.01 merger announcements and Item 8.01 debt
/// issuances / underwriting agreements.
fn extract_from_8k(filing: &mut Filing) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let Some(text) = ensure_filing_text(filing) else {
        return outcome;
    };

    if ITEM_101_PATTERN.is_match(&text) && DEFINITIVE_AGREEMENT_PATTERN.is_match(&text) {
        outcome.merge(extract_parties_from_announcement(&text, filing.id));

        if let Some((raw, iso)) = extract_agreement_date(&text) {
            let fact = AtomicFact::new(
                FactPayload::DealDate(DatePayload {
                    date_type: "agreement_date".to_string(),
                    date_value: iso,
                    date_raw: raw.clone(),
                }),
                format!("dated {}", raw),
            )
            .with_filing(filing.id)
            .with_section("item_1.01")
            .with_confidence(0.9);
            outcome.facts.push(fact);
        }
    }

    if ITEM_801_PATTERN.is_match(&text) {
        outcome.merge(extract_financing(filing, &text));
    }

    // Some filings carry purchase/underwriting agreements without the
    // standard item numbers. Dedup against what Item 8.01 already produced.
    if PURCHASE_AGREEMENT_PATTERN.is_match(&text) {
        let existing: HashSet<String> = outcome
            .facts
            .iter()
            .map(|f| f.evidence_fingerprint())
            .collect();
        let more = extract_financing(filing, &text);
        for fact in more.facts {
            if !existing.contains(&fact.evidence_fingerprint()) {
                outcome.facts.push(fact);
            }
        }
        outcome.alerts.extend(more.alerts);
    }

    outcome
}

/// The financing extraction path shared by Item 8.01 and purchase /
/// underwriting agreement documents.
///
/// Participants come from both the underwriter phrases in prose and from
/// any bank/role tables in the raw markup.
fn extract_financing(filing: &Filing, text: &str) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();

    let underwriters = extract_underwriters(text);
    let table_participants = filing
        .raw_html
        .as_deref()
        .map(extract_financing_participants)
        .unwrap_or_default();

    let mut participants: Vec<ParticipantPayload> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for uw in &underwriters {
        if seen.insert(uw.name_normalized.clone()) {
            participants.push(ParticipantPayload {
                bank: uw.name_raw.clone(),
                bank_normalized: uw.name_normalized.clone(),
                role: uw.role.clone(),
                evidence: Some(truncate_chars(&uw.evidence_snippet, 200)),
            });
        }
    }
    for p in &table_participants {
        let normalized = normalize_bank_name(&p.bank_name);
        if seen.insert(normalized.clone()) {
            participants.push(ParticipantPayload {
                bank: p.bank_name.clone(),
                bank_normalized: normalized,
                role: p.role.clone(),
                evidence: Some(truncate_chars(&p.evidence_text, 200)),
            });
        }
    }

    let instruments = extract_debt_instruments(text);
    if !instruments.is_empty() {
        for instrument in &instruments {
            let fact = AtomicFact::new(
                FactPayload::FinancingMention(FinancingPayload {
                    instrument_family: instrument.instrument_family.clone(),
                    instrument_subtype: Some(instrument.instrument_subtype.clone()),
                    amount_usd: instrument.amount_usd,
                    amount_raw: instrument.amount_raw.clone(),
                    currency: "USD".to_string(),
                    participants: participants.clone(),
                    purpose: None,
                    maturity: instrument.maturity_year.clone(),
                    interest_rate: instrument.interest_rate.clone(),
                }),
                instrument.evidence_snippet.clone(),
            )
            .with_filing(filing.id)
            .with_section("item_8.01")
            .with_pattern("DEBT_INSTRUMENT_PATTERN")
            .with_confidence(instrument.confidence);
            outcome.facts.push(fact);
        }
    } else if !table_participants.is_empty() {
        // Bank/role table without a matching instrument sentence: record a
        // financing mention of unknown family so the participants are not
        // lost.
        let evidence = table_participants
            .iter()
            .map(|p| p.evidence_text.as_str())
            .take(5)
            .collect::<Vec<_>>()
            .join("\n");
        let fact = AtomicFact::new(
            FactPayload::FinancingMention(FinancingPayload {
                instrument_family: "unknown".to_string(),
                instrument_subtype: None,
                amount_usd: None,
                amount_raw: None,
                currency: "USD".to_string(),
                participants: participants.clone(),
                purpose: None,
                maturity: None,
                interest_rate: None,
            }),
            truncate_chars(&evidence, 500),
        )
        .with_filing(filing.id)
        .with_section("item_8.01")
        .with_pattern("BANK_ROLE_TABLE")
        .with_method("table")
        .with_confidence(0.75);
        outcome.facts.push(fact);
    } else {
        // No instrument at all: keep the underwriters as advisor mentions.
        for uw in &underwriters {
            let fact = AtomicFact::new(
                FactPayload::AdvisorMention(AdvisorPayload {
                    bank_name_raw: uw.name_raw.clone(),
                    bank_name_normalized: uw.name_normalized.clone(),
                    role: "underwriter".to_string(),
                    client_side: "issuer".to_string(),
                    bank_id: None,
                }),
                uw.evidence_snippet.clone(),
            )
            .with_filing(filing.id)
            .with_section("item_8.01")
            .with_pattern("UNDERWRITER_PATTERN")
            .with_confidence(uw.confidence);
            outcome.facts.push(fact);
        }
    }

    if let Some((raw, iso)) = extract_agreement_date(text) {
        let fact = AtomicFact::new(
            FactPayload::DealDate(DatePayload {
                date_type: "agreement_date".to_string(),
                date_value: iso,
                date_raw: raw.clone(),
            }),
            format!("dated {}", raw),
        )
        .with_filing(filing.id)
        .with_section("item_8.01")
        .with_confidence(0.9);
        outcome.facts.push(fact);
    }

    outcome
}

/// Route an exhibit to the right extractor by type tag.
pub fn extract_from_exhibit(exhibit: &mut Exhibit) -> ExtractionOutcome {
    let exhibit_type = exhibit.exhibit_type.to_uppercase();
    if exhibit_type.starts_with("EX-2") {
        extract_from_merger_agreement(exhibit)
    } else if exhibit_type.starts_with("EX-10") {
        extract_from_ex10(exhibit)
    } else if exhibit_type.starts_with("EX-99") {
        extract_from_press_release(exhibit)
    } else {
        ExtractionOutcome::default()
    }
}

/// EX-2.1 merger agreement: the primary source for private targets.
fn extract_from_merger_agreement(exhibit: &mut Exhibit) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let Some(text) = ensure_exhibit_text(exhibit) else {
        return outcome;
    };

    let pre = preamble(&text, PREAMBLE_CHARS);

    if !MERGER_AGREEMENT_HEADER.is_match(pre) {
        return outcome;
    }

    let party_match = PREAMBLE_PARTY_LIST
        .captures(pre)
        .or_else(|| PREAMBLE_PARTIES_ALT.captures(pre));

    match party_match {
        Some(caps) => {
            let span_match = caps.name("party_span").unwrap();
            let party_span = span_match.as_str();
            let parties = split_party_span(party_span);

            let role_map: std::collections::HashMap<String, (String, Option<&'static str>)> =
                extract_party_with_role(pre)
                    .into_iter()
                    .map(|(party, label, role)| (normalize_party_name(&party), (label, role)))
                    .collect();

            let full = caps.get(0).unwrap();
            for (i, party_raw) in parties.iter().enumerate() {
                let party_normalized = normalize_party_name(party_raw);
                let party_display = display_party_name(party_raw);

                let (role_label, from_defined_term) = match role_map.get(&party_normalized) {
                    Some((label, _)) => (label.clone(), true),
                    None => {
                        // Positional heuristic: in a 3-party list the last
                        // entry is usually the target, the first the parent.
                        if parties.len() == 3 && i == 2 {
                            ("Company".to_string(), false)
                        } else if parties.len() >= 2 && i == 0 {
                            ("Parent".to_string(), false)
                        } else {
                            ("Unknown".to_string(), false)
                        }
                    }
                };
                let confidence = if from_defined_term { 0.9 } else { 0.6 };

                let fact = AtomicFact::new(
                    FactPayload::PartyDefinition(PartyPayload {
                        party_name_raw: party_raw.clone(),
                        party_name_normalized: party_normalized,
                        party_name_display: party_display,
                        role_label,
                        cik: None,
                    }),
                    truncate_chars(party_span, 500),
                )
                .with_exhibit(exhibit.id, exhibit.filing_id)
                .with_section("preamble")
                .with_pattern("PREAMBLE_PARTY_LIST")
                .with_offsets(full.start(), full.end())
                .with_confidence(confidence);
                outcome.facts.push(fact);
            }
        }
        None => {
            // A merger agreement whose party pattern fails goes to a human,
            // keyed on the preamble hash so repeats deduplicate.
            let alert = Alert::new(
                AlertKind::FailedPrivateTargetExtraction,
                "Failed to extract parties from merger agreement preamble",
            )
            .with_description("Could not find 'by and among/between' pattern in preamble")
            .with_exhibit(exhibit.id)
            .with_filing(exhibit.filing_id);
            let mut alert = alert;
            alert.preamble_hash = Some(sha256_hex(pre));
            alert.preamble_preview = Some(truncate_chars(pre, 500));
            outcome.alerts.push(alert);
        }
    }

    if let Some((raw, iso)) = extract_agreement_date(pre) {
        let fact = AtomicFact::new(
            FactPayload::DealDate(DatePayload {
                date_type: "agreement_date".to_string(),
                date_value: iso,
                date_raw: raw.clone(),
            }),
            format!("dated {}", raw),
        )
        .with_exhibit(exhibit.id, exhibit.filing_id)
        .with_section("preamble")
        .with_confidence(0.95);
        outcome.facts.push(fact);
    }

    outcome
}

/// EX-10.*: equity commitment letters and credit agreements.
fn extract_from_ex10(exhibit: &mut Exhibit) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let Some(text) = ensure_exhibit_text(exhibit) else {
        return outcome;
    };

    let description = exhibit
        .description
        .as_deref()
        .unwrap_or("")
        .to_lowercase();

    if MATERIAL_KEYWORDS.iter().any(|kw| description.contains(kw)) {
        exhibit.is_material = true;
    }

    if description.contains("commitment") || description.contains("equity") {
        for sponsor in extract_sponsors(&text) {
            if sponsor.is_negated {
                continue;
            }
            let fact = AtomicFact::new(
                FactPayload::SponsorMention(crate::models::SponsorPayload {
                    sponsor_name_raw: sponsor.sponsor_name_raw.clone(),
                    sponsor_name_normalized: sponsor.sponsor_name_normalized.clone(),
                    source_pattern: sponsor.source_pattern.clone(),
                    context_snippet: sponsor.context_snippet.clone(),
                    is_negated: false,
                }),
                sponsor.context_snippet.clone(),
            )
            .with_exhibit(exhibit.id, exhibit.filing_id)
            .with_section("equity_commitment")
            .with_pattern(&sponsor.source_pattern)
            .with_confidence(sponsor.confidence);
            outcome.facts.push(fact);
        }
    }

    outcome
}

/// EX-99.* press releases: sponsor mentions over the whole document.
fn extract_from_press_release(exhibit: &mut Exhibit) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let Some(text) = ensure_exhibit_text(exhibit) else {
        return outcome;
    };

    for sponsor in extract_sponsors(&text) {
        if sponsor.is_negated {
            continue;
        }
        let fact = AtomicFact::new(
            FactPayload::SponsorMention(crate::models::SponsorPayload {
                sponsor_name_raw: sponsor.sponsor_name_raw.clone(),
                sponsor_name_normalized: sponsor.sponsor_name_normalized.clone(),
                source_pattern: sponsor.source_pattern.clone(),
                context_snippet: sponsor.context_snippet.clone(),
                is_negated: false,
            }),
            sponsor.context_snippet.clone(),
        )
        .with_exhibit(exhibit.id, exhibit.filing_id)
        .with_section("press_release")
        .with_pattern(&sponsor.source_pattern)
        .with_confidence(sponsor.confidence);
        outcome.facts.push(fact);
    }

    outcome
}

/// Party mentions from an Item 1.01 deal announcement (lower confidence
/// than defined-term party definitions).
fn extract_parties_from_announcement(text: &str, filing_id: i64) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    let pre = preamble(text, PREAMBLE_CHARS);

    let party_match = PREAMBLE_PARTY_LIST
        .captures(pre)
        .or_else(|| PREAMBLE_PARTIES_ALT.captures(pre));

    if let Some(caps) = party_match {
        let span_match = caps.name("party_span").unwrap();
        let party_span = span_match.as_str();
        let full = caps.get(0).unwrap();
        for party_raw in split_party_span(party_span) {
            let fact = AtomicFact::new(
                FactPayload::PartyMention(PartyPayload {
                    party_name_normalized: normalize_party_name(&party_raw),
                    party_name_display: display_party_name(&party_raw),
                    party_name_raw: party_raw,
                    role_label: "Unknown".to_string(),
                    cik: None,
                }),
                truncate_chars(party_span, 500),
            )
            .with_filing(filing_id)
            .with_section("announcement")
            .with_pattern("PREAMBLE_PARTY_LIST")
            .with_offsets(full.start(), full.end())
            .with_confidence(0.7);
            outcome.facts.push(fact);
        }
    }

    outcome
}
