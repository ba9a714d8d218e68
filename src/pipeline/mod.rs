//! Batch pipeline stages over the persistent store.
//!
//! Cluster -> reconcile -> classify -> attribute. Each stage is a
//! synchronous job run to completion; none yields mid-transaction.

pub mod attribution;
pub mod bank_resolver;
pub mod classifier;
pub mod clusterer;
pub mod reconciler;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::config::AttributionConfig;
use crate::models::{AtomicFact, FactPayload, ManualInput, ManualPayload};
use crate::storage::GraphStore;

/// Levenshtein ratio in [0, 1].
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Best Levenshtein ratio of `needle` against any equally-sized window of
/// `haystack` (the partial-ratio used for substring-ish matching).
pub fn partial_ratio(needle: &str, haystack: &str) -> f64 {
    if needle.is_empty() || haystack.is_empty() {
        return 0.0;
    }
    let hay: Vec<char> = haystack.chars().collect();
    let n = needle.chars().count();
    if hay.len() <= n {
        return strsim::normalized_levenshtein(needle, haystack);
    }
    let mut best = 0.0f64;
    for start in 0..=(hay.len() - n) {
        let window: String = hay[start..start + n].iter().collect();
        let score = strsim::normalized_levenshtein(needle, &window);
        if score > best {
            best = score;
        }
        if best >= 0.999 {
            break;
        }
    }
    best
}

/// Results of one full pipeline run.
#[derive(Debug, Default, Serialize)]
pub struct PipelineReport {
    pub clustering: clusterer::ClusterStats,
    pub merging: clusterer::MergeStats,
    pub reconciliation: reconciler::ReconcileStats,
    pub bank_resolution: bank_resolver::ResolveStats,
    pub classification: classifier::ClassifyStats,
    pub attribution: attribution::AttributionStats,
}

/// Run cluster -> merge scan -> reconcile -> classify -> attribute in order.
pub fn run_pipeline(store: &GraphStore, config: &AttributionConfig) -> Result<PipelineReport> {
    let clustering = clusterer::DealClusterer::new(store).cluster_unclustered_facts()?;
    let merging = clusterer::DealClusterer::new(store).run_merge_pass()?;
    let reconciliation = reconciler::Reconciler::new(store, config).reconcile()?;
    let bank_resolution = bank_resolver::resolve_event_participants(store, config)?;
    let classification = classifier::Classifier::new(store).classify_all()?;
    let attribution = attribution::AttributionEngine::new(store, config).calculate_all_fees()?;

    let report = PipelineReport {
        clustering,
        merging,
        reconciliation,
        bank_resolution,
        classification,
        attribution,
    };
    info!(
        deals_created = report.clustering.deals_created,
        events_created = report.reconciliation.events_created,
        "✅ Pipeline run complete"
    );
    Ok(report)
}

/// Persist a human-provided payload for an alert: stores the manual input,
/// materializes a MANUAL fact so downstream stages treat it like any other
/// fact, and resolves the alert.
pub fn submit_manual_input(
    store: &GraphStore,
    alert_id: i64,
    input_type: &str,
    data: serde_json::Value,
    entered_by: &str,
    notes: Option<&str>,
) -> Result<i64> {
    let alert = store
        .alert_by_id(alert_id)?
        .with_context(|| format!("alert {} not found", alert_id))?;

    let input = ManualInput {
        id: 0,
        alert_id: Some(alert_id),
        deal_id: alert.deal_id,
        financing_event_id: None,
        input_type: input_type.to_string(),
        data: data.clone(),
        entered_by: entered_by.to_string(),
        entered_at: Utc::now(),
        notes: notes.map(|s| s.to_string()),
    };
    let input_id = store.insert_manual_input(&input)?;

    let evidence = notes
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
        .unwrap_or_else(|| format!("manual input for alert {}: {}", alert_id, data));
    let mut fact = AtomicFact::new(
        FactPayload::Manual(ManualPayload {
            input_type: input_type.to_string(),
            data,
            entered_by: entered_by.to_string(),
        }),
        evidence,
    )
    .with_method("manual")
    .with_confidence(1.0);
    fact.filing_id = alert.filing_id;
    fact.exhibit_id = alert.exhibit_id;
    // Human-directed linking is the one sanctioned bypass of the
    // clusterer-only deal_id rule.
    fact.deal_id = alert.deal_id;
    store.insert_fact(&mut fact)?;

    store.resolve_alert(alert_id, entered_by, notes)?;
    Ok(input_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_ratio_bounds() {
        assert!((levenshtein_ratio("target company", "target company") - 1.0).abs() < 1e-9);
        assert!(levenshtein_ratio("target company", "target co") > 0.6);
        assert!(levenshtein_ratio("alpha", "zzzzz") < 0.3);
    }

    #[test]
    fn test_partial_ratio_finds_substring() {
        let evidence = "the notes were issued in connection with the acquisition of target company by alpha holdings";
        assert!(partial_ratio("target company", evidence) > 0.99);
        assert!(partial_ratio("unrelated name", evidence) < 0.7);
    }
}
