//! Bank name resolution against the canonical bank table.
//!
//! Resolution order: exact normalized match, alias match, fuzzy match
//! above the configured threshold. Results are memoized per resolver.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AttributionConfig;
use crate::models::{Alert, AlertKind, Bank, BankAlias};
use crate::storage::GraphStore;

use super::levenshtein_ratio;

#[derive(Debug, Clone)]
pub struct BankMatch {
    pub bank_id: i64,
    pub bank_name: String,
    pub confidence: f64,
    /// "exact", "alias", "fuzzy".
    pub match_type: &'static str,
}

pub struct BankResolver<'a> {
    store: &'a GraphStore,
    fuzzy_threshold: f64,
    auto_create: bool,
    cache: HashMap<String, Option<BankMatch>>,
    catalog: Option<(Vec<Bank>, Vec<BankAlias>)>,
}

impl<'a> BankResolver<'a> {
    pub fn new(store: &'a GraphStore, config: &AttributionConfig) -> Self {
        Self {
            store,
            fuzzy_threshold: config.thresholds.fuzzy_bank_match_min,
            auto_create: false,
            cache: HashMap::new(),
            catalog: None,
        }
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    fn catalog(&mut self) -> Result<&(Vec<Bank>, Vec<BankAlias>)> {
        if self.catalog.is_none() {
            self.catalog = Some((self.store.all_banks()?, self.store.all_aliases()?));
        }
        Ok(self.catalog.as_ref().unwrap())
    }

    /// Resolve a raw bank string to a canonical bank, if one matches.
    pub fn resolve(&mut self, bank_name_raw: &str) -> Result<Option<BankMatch>> {
        if bank_name_raw.trim().is_empty() {
            return Ok(None);
        }
        let normalized = normalize(bank_name_raw);
        if let Some(cached) = self.cache.get(&normalized) {
            return Ok(cached.clone());
        }

        let threshold = self.fuzzy_threshold;
        let (banks, aliases) = self.catalog()?;

        // Exact match on the canonical normalized name.
        if let Some(bank) = banks.iter().find(|b| {
            let bank_norm = if b.name_normalized.is_empty() {
                normalize(&b.name)
            } else {
                b.name_normalized.clone()
            };
            bank_norm == normalized
        }) {
            let result = Some(BankMatch {
                bank_id: bank.id,
                bank_name: bank.name.clone(),
                confidence: 1.0,
                match_type: "exact",
            });
            self.cache.insert(normalized, result.clone());
            return Ok(result);
        }

        // Exact match on an alias.
        if let Some(alias) = aliases.iter().find(|a| {
            let alias_norm = if a.alias_normalized.is_empty() {
                normalize(&a.alias)
            } else {
                a.alias_normalized.clone()
            };
            alias_norm == normalized
        }) {
            if let Some(bank) = banks.iter().find(|b| b.id == alias.bank_id) {
                let result = Some(BankMatch {
                    bank_id: bank.id,
                    bank_name: bank.name.clone(),
                    confidence: 0.95,
                    match_type: "alias",
                });
                self.cache.insert(normalized, result.clone());
                return Ok(result);
            }
        }

        // Fuzzy match across canonical names and aliases.
        let mut best: Option<(i64, String, f64)> = None;
        for bank in banks {
            let candidate = if bank.name_normalized.is_empty() {
                normalize(&bank.name)
            } else {
                bank.name_normalized.clone()
            };
            let score = levenshtein_ratio(&normalized, &candidate) * 100.0;
            if best.as_ref().map_or(true, |(_, _, s)| score > *s) {
                best = Some((bank.id, bank.name.clone(), score));
            }
        }
        for alias in aliases {
            let candidate = if alias.alias_normalized.is_empty() {
                normalize(&alias.alias)
            } else {
                alias.alias_normalized.clone()
            };
            let score = levenshtein_ratio(&normalized, &candidate) * 100.0;
            if best.as_ref().map_or(true, |(_, _, s)| score > *s) {
                if let Some(bank) = banks.iter().find(|b| b.id == alias.bank_id) {
                    best = Some((bank.id, bank.name.clone(), score));
                }
            }
        }

        let result = match best {
            Some((bank_id, bank_name, score)) if score >= threshold => Some(BankMatch {
                bank_id,
                bank_name,
                confidence: score / 100.0,
                match_type: "fuzzy",
            }),
            _ => None,
        };
        self.cache.insert(normalized, result.clone());
        Ok(result)
    }

    /// Resolve and, in auto-create mode, insert unknown banks.
    ///
    /// Returns `(bank_id, normalized_name)`; the id is None when the name
    /// stayed unresolved (callers may raise an UNRESOLVED_BANK alert).
    pub fn resolve_and_link(&mut self, bank_name_raw: &str) -> Result<(Option<i64>, String)> {
        let normalized = normalize(bank_name_raw);
        if let Some(found) = self.resolve(bank_name_raw)? {
            return Ok((Some(found.bank_id), found.bank_name));
        }

        if self.auto_create {
            let bank = Bank {
                id: 0,
                name: bank_name_raw.to_string(),
                name_normalized: normalized.clone(),
                display_name: Some(bank_name_raw.to_string()),
                short_name: None,
                is_bulge_bracket: false,
                is_regional: false,
                primary_market: None,
            };
            let bank_id = self.store.insert_bank(&bank, &[])?;
            self.catalog = None; // New bank invalidates the snapshot.
            debug!(bank = bank_name_raw, "auto-created bank entity");
            return Ok((Some(bank_id), normalized));
        }

        Ok((None, normalized))
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ResolveStats {
    pub participants_resolved: usize,
    pub participants_unresolved: usize,
}

/// Resolve canonical bank ids for all event participants that still lack
/// one. Names that stay unresolved raise an UNRESOLVED_BANK alert (once
/// per name).
pub fn resolve_event_participants(
    store: &GraphStore,
    config: &AttributionConfig,
) -> Result<ResolveStats> {
    let mut resolver = BankResolver::new(store, config);
    let mut stats = ResolveStats::default();

    let mut alerted: HashSet<String> = store
        .list_alerts(Some(AlertKind::UnresolvedBank), None, 1000, 0)?
        .into_iter()
        .map(|a| a.title)
        .collect();

    for event in store.all_events()? {
        for mut participant in store.participants_by_event(event.id)? {
            if participant.bank_id.is_some() {
                continue;
            }
            match resolver.resolve(&participant.bank_name_raw)? {
                Some(found) => {
                    participant.bank_id = Some(found.bank_id);
                    store.update_participant(&participant)?;
                    stats.participants_resolved += 1;
                }
                None => {
                    stats.participants_unresolved += 1;
                    let title = format!("Unresolved bank: {}", participant.bank_name_normalized);
                    if alerted.insert(title.clone()) {
                        let mut alert = Alert::new(AlertKind::UnresolvedBank, title)
                            .with_description(format!(
                                "No canonical bank matched '{}' at or above the fuzzy threshold",
                                participant.bank_name_raw
                            ));
                        alert.deal_id = Some(event.deal_id);
                        store.insert_alert(&mut alert)?;
                    }
                }
            }
        }
    }

    if stats.participants_resolved + stats.participants_unresolved > 0 {
        info!(
            resolved = stats.participants_resolved,
            unresolved = stats.participants_unresolved,
            "🏦 Bank resolution complete"
        );
    }
    Ok(stats)
}

/// Normalize a bank name for matching: lowercase, one ordered pass over
/// the entity-suffix list, then punctuation-insensitive collapse.
///
/// The single pass is deliberate: "RBC Capital Markets" must survive
/// intact so the canonical seed bank exact-matches itself.
fn normalize(name: &str) -> String {
    let mut name = name.trim().to_lowercase();
    let suffixes = [
        ", n.a.", " n.a.", ", na", " na", ", inc.", " inc.", ", inc", " inc", ", llc", " llc",
        ", ltd", " ltd", " plc", " ag", " sa", " nv", " bv", " securities", " capital", " bank",
        "& co.", "& co", " & company",
    ];
    for suffix in suffixes {
        if name.ends_with(suffix) {
            name.truncate(name.len() - suffix.len());
        }
    }
    // Punctuation-insensitive comparison ("J.P. Morgan" vs "JP Morgan").
    let name = name.replace(['.', ','], "");
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Seed the bank table with the usual institutions and their aliases.
pub fn seed_banks(store: &GraphStore) -> Result<usize> {
    let banks: &[(&str, &[&str], bool)] = &[
        // Bulge bracket
        ("JPMorgan Chase & Co.", &["JPMorgan", "J.P. Morgan", "JP Morgan", "JPMC", "Chase"], true),
        ("Goldman Sachs", &["GS", "Goldman"], true),
        ("Morgan Stanley", &["MS"], true),
        (
            "Bank of America",
            &["BofA", "BAML", "Bank of America Merrill Lynch", "Merrill Lynch"],
            true,
        ),
        ("Citigroup", &["Citi", "Citibank"], true),
        ("Barclays", &["BARC"], true),
        ("Deutsche Bank", &["DB"], true),
        ("UBS", &["UBS AG"], true),
        ("Credit Suisse", &["CS"], true),
        // Large US banks
        ("Wells Fargo", &["WFC", "Wells"], false),
        ("PNC Financial", &["PNC", "PNC Bank"], false),
        ("U.S. Bank", &["USB", "US Bank", "US Bancorp"], false),
        ("Truist", &["Truist Financial", "BB&T", "SunTrust"], false),
        // International
        ("HSBC", &["HSBC Holdings"], false),
        ("BNP Paribas", &["BNP"], false),
        ("Societe Generale", &["SocGen"], false),
        ("RBC Capital Markets", &["RBC", "Royal Bank of Canada"], false),
        ("TD Securities", &["TD", "Toronto-Dominion"], false),
        ("Mizuho", &["Mizuho Financial", "Mizuho Bank"], false),
        ("MUFG", &["Mitsubishi UFJ", "Bank of Tokyo-Mitsubishi"], false),
        ("SMBC", &["Sumitomo Mitsui", "SMBC Nikko"], false),
        // Boutiques
        ("Lazard", &[], false),
        ("Evercore", &[], false),
        ("Centerview Partners", &["Centerview"], false),
        ("Moelis & Company", &["Moelis"], false),
        ("PJT Partners", &["PJT"], false),
        ("Perella Weinberg", &["PWP"], false),
        ("Guggenheim Securities", &["Guggenheim Partners"], false),
        ("Jefferies", &["Jefferies Financial", "Jefferies Group"], false),
        ("Piper Sandler", &["Piper Jaffray"], false),
        ("Raymond James", &[], false),
    ];

    let mut inserted = 0;
    for (name, aliases, is_bulge) in banks {
        let bank = Bank {
            id: 0,
            name: name.to_string(),
            name_normalized: name.to_lowercase().replace([',', '.'], ""),
            display_name: Some(name.to_string()),
            short_name: None,
            is_bulge_bracket: *is_bulge,
            is_regional: false,
            primary_market: None,
        };
        store.insert_bank(&bank, aliases)?;
        inserted += 1;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn test_normalize_strips_suffixes() {
        assert_eq!(normalize("JPMorgan Chase Bank, N.A."), "jpmorgan chase");
        assert_eq!(normalize("Goldman Sachs & Co. LLC"), "goldman sachs");
        assert_eq!(normalize("Barclays Capital Inc."), "barclays");
    }

    #[test]
    fn test_normalize_single_pass_keeps_rbc_capital_markets() {
        // One pass only: "markets" is not a suffix, and without it neither
        // " capital" nor anything else strips, so the name survives intact.
        assert_eq!(normalize("RBC Capital Markets"), "rbc capital markets");
    }

    #[test]
    fn test_seed_bank_exact_self_resolution() {
        let store = GraphStore::in_memory().unwrap();
        seed_banks(&store).unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config);

        // A canonical seed bank resolves against its own name at the exact
        // tier, not via an alias.
        let found = resolver.resolve("RBC Capital Markets").unwrap().unwrap();
        assert_eq!(found.bank_name, "RBC Capital Markets");
        assert_eq!(found.match_type, "exact");
        assert!((found.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_match() {
        let store = GraphStore::in_memory().unwrap();
        seed_banks(&store).unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config);

        let found = resolver.resolve("Goldman Sachs").unwrap().unwrap();
        assert_eq!(found.bank_name, "Goldman Sachs");
        assert_eq!(found.match_type, "exact");
        assert!((found.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_alias_match() {
        let store = GraphStore::in_memory().unwrap();
        seed_banks(&store).unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config);

        let found = resolver.resolve("BofA").unwrap().unwrap();
        assert_eq!(found.bank_name, "Bank of America");
        assert_eq!(found.match_type, "alias");
        assert!((found.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        let store = GraphStore::in_memory().unwrap();
        seed_banks(&store).unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config);

        // One-character typo against "goldman sachs".
        let found = resolver.resolve("Goldman Sachks").unwrap();
        assert!(found.is_some(), "typo should fuzzy-match");
        assert_eq!(found.unwrap().match_type, "fuzzy");
    }

    #[test]
    fn test_unknown_bank_unresolved() {
        let store = GraphStore::in_memory().unwrap();
        seed_banks(&store).unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config);

        let (id, normalized) = resolver.resolve_and_link("Completely Unknown Partners").unwrap();
        assert!(id.is_none());
        assert_eq!(normalized, "completely unknown partners");
    }

    #[test]
    fn test_auto_create_inserts_bank() {
        let store = GraphStore::in_memory().unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config).with_auto_create(true);

        let (id, _) = resolver.resolve_and_link("Fresh Boutique Advisors").unwrap();
        let id = id.expect("auto-create should insert");
        let bank = store.bank_by_id(id).unwrap().unwrap();
        assert_eq!(bank.name, "Fresh Boutique Advisors");

        // Second resolution hits the (rebuilt) catalog.
        let again = resolver.resolve("Fresh Boutique Advisors").unwrap().unwrap();
        assert_eq!(again.bank_id, id);
    }

    #[test]
    fn test_memoization_returns_same_result() {
        let store = GraphStore::in_memory().unwrap();
        seed_banks(&store).unwrap();
        let config = test_config();
        let mut resolver = BankResolver::new(&store, &config);

        let first = resolver.resolve("J.P. Morgan").unwrap().unwrap();
        let second = resolver.resolve("J.P. Morgan").unwrap().unwrap();
        assert_eq!(first.bank_id, second.bank_id);
        assert_eq!(first.match_type, second.match_type);
    }
}
