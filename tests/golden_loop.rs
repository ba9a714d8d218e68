//! End-to-end pipeline scenarios over an in-memory store.
//!
//! Filings go in as raw markup; the assertions check the resulting deals,
//! financing events, participants and fees after a full pipeline run.

use chrono::NaiveDate;
use serde_json::json;

use mafg_backend::config::AttributionConfig;
use mafg_backend::ingest::{process_fetched_filing, ExhibitInput};
use mafg_backend::models::{AlertKind, DealState, FactType, Filing};
use mafg_backend::pipeline::{run_pipeline, submit_manual_input};
use mafg_backend::storage::{DealFilter, GraphStore};

fn attribution_config() -> AttributionConfig {
    serde_json::from_value(json!({
        "advisory_fee_bps": {
            "default": 50.0,
            "deal_size_over_1B": 30.0,
            "deal_size_over_5B": 20.0
        },
        "underwriting_fee_bps": {
            "IG_Bond": 65.0,
            "HY_Bond": 180.0,
            "Term_Loan_B": 225.0,
            "Other_Loan": 75.0,
            "Bridge": 125.0,
            "Unknown": 100.0
        },
        "role_splits": {
            "bond": {
                "joint_bookrunner": 1.0,
                "bookrunner": 1.0,
                "lead_underwriter": 0.8,
                "underwriter": 0.5,
                "co_manager": 0.2,
                "other": 0.1
            },
            "loan": {
                "lead_arranger": 1.0,
                "joint_lead_arranger": 1.0,
                "arranger": 0.6,
                "admin_agent": 0.4,
                "syndication_agent": 0.3,
                "agent": 0.2,
                "other": 0.1
            },
            "bridge": { "lead_arranger": 1.0, "other": 0.2 },
            "unknown": { "underwriter": 0.5, "other": 0.1 }
        },
        "thresholds": { "fuzzy_bank_match_min": 92.0 }
    }))
    .unwrap()
}

fn filing(accession: &str, cik: &str, company: Option<&str>, date: (i32, u32, u32)) -> Filing {
    let mut filing = Filing::new(
        accession,
        cik,
        "8-K",
        NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
    );
    filing.company_name = company.map(|c| c.to_string());
    filing
}

const MERGER_AGREEMENT_HTML: &str = r#"
    <html><body>
    <div>AGREEMENT AND PLAN OF MERGER</div>
    <div>This AGREEMENT AND PLAN OF MERGER, dated as of January 15, 2024, is
    entered into by and among Alpha Holdings, Inc., a Delaware corporation
    ("Parent"), Alpha Merger Sub, Inc., a Delaware corporation and wholly owned
    subsidiary of Parent ("Merger Sub"), and Target Company, Inc., a Delaware
    corporation (the "Company").</div>
    <div>WITNESSETH</div>
    </body></html>
"#;

const PRESS_RELEASE_HTML: &str = r#"
    <html><body>
    <div>Target Company, Inc. announced today that it has entered into a
    definitive agreement under which it is to be acquired by affiliates of
    Blackstone Inc. in an all-cash transaction. Equity financing will be
    provided by funds managed by Blackstone.</div>
    </body></html>
"#;

const PRIVATE_TARGET_HTML: &str = r#"
    <html><body>
    <div>AGREEMENT AND PLAN OF MERGER</div>
    <div>This AGREEMENT AND PLAN OF MERGER, dated as of February 2, 2024, is
    entered into by and between Acquirer Corp., a Nevada corporation (the
    "Buyer"), and Target Private Company, LLC, a Delaware limited liability
    company (the "Company").</div>
    <div>WITNESSETH</div>
    </body></html>
"#;

const NOTES_8K_HTML: &str = r#"
    <html><body>
    <div>Item 8.01 Other Events.</div>
    <div>On March 1, 2024, the issuer entered into an Underwriting Agreement
    with J.P. Morgan Securities LLC and Goldman Sachs &amp; Co. LLC, as
    representatives of the several underwriters, and issued $500,000,000
    aggregate principal amount of its 5.25% Senior Notes due 2031. The net
    proceeds will be used to finance the pending acquisition of Target Company.</div>
    <table>
        <tr><th>Underwriter</th><th>Principal Amount</th></tr>
        <tr><td>J.P. Morgan Securities LLC</td><td>$200,000,000</td></tr>
        <tr><td>Goldman Sachs &amp; Co. LLC</td><td>$200,000,000</td></tr>
        <tr><td>Barclays Capital Inc.</td><td>$100,000,000</td></tr>
    </table>
    </body></html>
"#;

const LOAN_8K_HTML: &str = r#"
    <html><body>
    <div>Item 8.01 Other Events.</div>
    <div>The borrower obtained a $1,000,000,000 term loan b under a credit
    agreement to fund the acquisition of Target Company, syndicated among the
    lenders listed below.</div>
    <table>
        <tr><td>Lender</td><td>Commitment</td><td>Role</td></tr>
        <tr><td>JPMorgan Chase Bank, N.A.</td><td>$500,000,000</td><td>Administrative Agent and Joint Lead Arranger</td></tr>
        <tr><td>Bank of America, N.A.</td><td>$250,000,000</td><td>Syndication Agent</td></tr>
        <tr><td>Wells Fargo Bank, N.A.</td><td>$250,000,000</td><td>Joint Lead Arranger</td></tr>
    </table>
    </body></html>
"#;

fn ingest_public_deal(store: &GraphStore) {
    // The acquirer files the 8-K, so the Parent party inherits its CIK.
    let filing = filing(
        "0001111111-24-000001",
        "0001111111",
        Some("Alpha Holdings, Inc."),
        (2024, 1, 16),
    );
    process_fetched_filing(
        store,
        filing,
        vec![
            ExhibitInput {
                exhibit_type: "EX-2.1".to_string(),
                description: Some("Agreement and Plan of Merger".to_string()),
                filename: Some("ex21.htm".to_string()),
                raw_content: Some(MERGER_AGREEMENT_HTML.to_string()),
                ..Default::default()
            },
            ExhibitInput {
                exhibit_type: "EX-99.1".to_string(),
                description: Some("Press Release".to_string()),
                filename: Some("ex991.htm".to_string()),
                raw_content: Some(PRESS_RELEASE_HTML.to_string()),
                ..Default::default()
            },
        ],
    )
    .unwrap();
}

#[test]
fn golden_public_target_with_merger_agreement() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    ingest_public_deal(&store);

    // Three party definitions, two roles from defined terms at 0.9, plus an
    // agreement date.
    let facts = store
        .unclustered_facts(&[FactType::PartyDefinition])
        .unwrap();
    assert_eq!(facts.len(), 3, "{:#?}", facts);
    assert!(facts.iter().all(|f| (f.confidence - 0.9).abs() < 1e-9));
    assert!(facts.iter().all(|f| !f.evidence_snippet.is_empty()));

    run_pipeline(&store, &config).unwrap();

    let deals = store.all_deals().unwrap();
    assert_eq!(deals.len(), 1);
    let deal = &deals[0];
    assert_eq!(deal.state, DealState::Candidate);
    assert_eq!(deal.target_name_normalized.as_deref(), Some("target company"));
    assert_eq!(deal.acquirer_name_normalized.as_deref(), Some("alpha holdings"));
    assert_eq!(deal.acquirer_cik.as_deref(), Some("0001111111"));
    assert_eq!(
        deal.agreement_date,
        NaiveDate::from_ymd_opt(2024, 1, 15)
    );
    assert!(deal.deal_key.starts_with("cik:0001111111:"));

    // Provenance locality: every clustered fact shares a filing with a
    // party fact of the same deal.
    let clustered = store.facts_by_deal(deal.id).unwrap();
    assert!(!clustered.is_empty());
    let party_filings: Vec<Option<i64>> = clustered
        .iter()
        .filter(|f| f.fact_type() == FactType::PartyDefinition)
        .map(|f| f.filing_id)
        .collect();
    for fact in &clustered {
        assert!(party_filings.contains(&fact.filing_id));
    }
}

#[test]
fn golden_private_target_name_only_key() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    let filing = filing("0002222222-24-000002", "0002222222", None, (2024, 2, 3));
    process_fetched_filing(
        &store,
        filing,
        vec![ExhibitInput {
            exhibit_type: "EX-2.1".to_string(),
            description: Some("Agreement and Plan of Merger".to_string()),
            raw_content: Some(PRIVATE_TARGET_HTML.to_string()),
            ..Default::default()
        }],
    )
    .unwrap();

    run_pipeline(&store, &config).unwrap();

    let deals = store.all_deals().unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].state, DealState::NeedsReview);
    assert!(deals[0].deal_key.starts_with("name:"));
    assert_eq!(
        deals[0].target_name_normalized.as_deref(),
        Some("target private company")
    );
}

#[test]
fn golden_sponsor_press_release() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    ingest_public_deal(&store);

    let sponsor_facts = store
        .unclustered_facts(&[FactType::SponsorMention])
        .unwrap();
    assert!(!sponsor_facts.is_empty());
    let payload = sponsor_facts[0].payload.as_sponsor().unwrap();
    assert_eq!(payload.sponsor_name_normalized, "blackstone");
    assert!(!payload.is_negated);
    assert!((sponsor_facts[0].confidence - 0.95).abs() < 1e-9);

    run_pipeline(&store, &config).unwrap();

    let deal = &store.all_deals().unwrap()[0];
    assert_eq!(deal.is_sponsor_backed, Some(true));
    assert_eq!(deal.sponsor_name_normalized.as_deref(), Some("blackstone"));
    assert!(!deal.unresolved_sponsor_entity);
    // Sponsor identity never merges into the acquirer identity.
    assert_eq!(deal.acquirer_name_normalized.as_deref(), Some("alpha holdings"));
}

#[test]
fn golden_underwriter_table_produces_participants() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    ingest_public_deal(&store);
    let mut notes = filing(
        "0001111111-24-000003",
        "0001111111",
        Some("Alpha Holdings, Inc."),
        (2024, 3, 1),
    );
    notes.raw_html = Some(NOTES_8K_HTML.to_string());
    process_fetched_filing(&store, notes, vec![]).unwrap();

    run_pipeline(&store, &config).unwrap();

    let deal = &store.all_deals().unwrap()[0];
    let events = store.events_by_deal(deal.id).unwrap();
    assert!(!events.is_empty(), "financing fact should reconcile to the deal");

    let mut participants = Vec::new();
    for event in &events {
        participants.extend(store.participants_by_event(event.id).unwrap());
    }
    assert!(participants.len() >= 3, "{:#?}", participants);
    assert!(participants
        .iter()
        .all(|p| p.role_normalized.contains("underwriter")));
    assert!(participants
        .iter()
        .any(|p| p.bank_name_normalized.contains("barclays")));
}

#[test]
fn golden_syndicated_loan_roles_and_fee() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    ingest_public_deal(&store);
    let mut loan = filing(
        "0001111111-24-000004",
        "0001111111",
        Some("Alpha Holdings, Inc."),
        (2024, 3, 5),
    );
    loan.raw_html = Some(LOAN_8K_HTML.to_string());
    process_fetched_filing(&store, loan, vec![]).unwrap();

    run_pipeline(&store, &config).unwrap();

    let deal = &store.all_deals().unwrap()[0];
    let events = store.events_by_deal(deal.id).unwrap();
    let loan_event = events
        .iter()
        .find(|e| e.instrument_family == "loan")
        .expect("loan event missing");

    assert_eq!(loan_event.market_tag.as_deref(), Some("Term_Loan_B"));
    assert_eq!(loan_event.amount_usd, Some(1_000_000_000.0));

    // Event fee = amount * bps / 10000 for its market tag (225 bps).
    let expected_fee = 1_000_000_000.0 * 225.0 / 10_000.0;
    assert!((loan_event.estimated_fee_usd.unwrap() - expected_fee).abs() < 0.01);

    let participants = store.participants_by_event(loan_event.id).unwrap();
    let jpm = participants
        .iter()
        .find(|p| p.bank_name_normalized.contains("jpmorgan"))
        .expect("JPMorgan participant missing");
    assert_eq!(jpm.role_normalized, "joint_lead_arranger");

    // Attribution conservation within a cent.
    let total: f64 = participants
        .iter()
        .map(|p| p.estimated_fee_usd.unwrap_or(0.0))
        .sum();
    assert!((total - loan_event.estimated_fee_usd.unwrap()).abs() < 0.01);

    // Deal tag priority: the TLB event outranks the HY bond.
    let deal = store.deal_by_id(deal.id).unwrap().unwrap();
    assert_eq!(deal.market_tag.as_deref(), Some("Term_Loan_B"));
}

#[test]
fn golden_pipeline_rerun_is_idempotent() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    ingest_public_deal(&store);
    let mut notes = filing(
        "0001111111-24-000005",
        "0001111111",
        Some("Alpha Holdings, Inc."),
        (2024, 3, 1),
    );
    notes.raw_html = Some(NOTES_8K_HTML.to_string());
    process_fetched_filing(&store, notes, vec![]).unwrap();

    run_pipeline(&store, &config).unwrap();
    let deals_after_first = store.all_deals().unwrap().len();
    let events_after_first = store.all_events().unwrap().len();

    run_pipeline(&store, &config).unwrap();
    assert_eq!(store.all_deals().unwrap().len(), deals_after_first);
    assert_eq!(store.all_events().unwrap().len(), events_after_first);
}

#[test]
fn golden_failed_extraction_to_manual_input() {
    let store = GraphStore::in_memory().unwrap();

    // A merger-agreement-looking exhibit with an unparseable preamble.
    let broken = filing("0003333333-24-000006", "0003333333", None, (2024, 4, 1));
    process_fetched_filing(
        &store,
        broken,
        vec![ExhibitInput {
            exhibit_type: "EX-2.1".to_string(),
            description: Some("Agreement and Plan of Merger".to_string()),
            raw_content: Some(
                "<div>AGREEMENT AND PLAN OF MERGER</div><div>An unconventional preamble \
                 naming no parties in the usual form.</div>"
                    .to_string(),
            ),
            ..Default::default()
        }],
    )
    .unwrap();

    let alerts = store
        .list_alerts(Some(AlertKind::FailedPrivateTargetExtraction), Some(false), 10, 0)
        .unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert!(alert.preamble_hash.is_some());

    // A human supplies the parties; the input becomes a MANUAL fact and the
    // alert resolves.
    submit_manual_input(
        &store,
        alert.id,
        "target_name",
        json!({ "target_name": "Hidden Target LLC", "acquirer_name": "Quiet Buyer Corp." }),
        "analyst@example.com",
        Some("parties read manually from the preamble"),
    )
    .unwrap();

    let resolved = store.alert_by_id(alert.id).unwrap().unwrap();
    assert!(resolved.is_resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("analyst@example.com"));

    let manual_facts = store.unclustered_facts(&[FactType::Manual]).unwrap();
    assert_eq!(manual_facts.len(), 1);
    assert_eq!(manual_facts[0].extraction_method, "manual");
    assert!((manual_facts[0].confidence - 1.0).abs() < 1e-9);
}

#[test]
fn golden_deal_search_interface() {
    let store = GraphStore::in_memory().unwrap();
    let config = attribution_config();

    ingest_public_deal(&store);
    run_pipeline(&store, &config).unwrap();

    let found = store
        .search_deals(&DealFilter {
            query: Some("target".to_string()),
            is_sponsor_backed: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);

    let summary = store.summary().unwrap();
    assert_eq!(summary.deals, 1);
    assert!(summary.facts > 0);
}
