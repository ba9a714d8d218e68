//! Pattern pack for filing extraction.
//!
//! All patterns assume prior normalization of smart quotes/dashes to ASCII
//! (see `visual_text`). Patterns are named; every fact records which named
//! pattern matched it.
//!
//! A1: PREAMBLE_PARTY_LIST  - party list in agreement preambles
//! A2: DEFINED_TERM_ROLE    - defined-term role labels (Company, Parent, ...)
//! A3: SPONSOR_AFFILIATION  - sponsor linkage phrases
//! A4: CURRENCY_AMOUNT      - money amounts with scale words

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A1: `by and among/between` followed by the party span, ending at a
    /// sentence terminator or paragraph break.
    pub static ref PREAMBLE_PARTY_LIST: Regex = Regex::new(
        r"(?is)\bby\s+and\s+(?:among|between)\s+(?P<party_span>.+?)(?:\.\s*\n\n|\.\s*$|\n\n)"
    )
    .unwrap();

    /// A1 alternate: `entered into/made (by and) among/between ...`.
    pub static ref PREAMBLE_PARTIES_ALT: Regex = Regex::new(
        r"(?is)\b(?:entered\s+into|made)\s+(?:by\s+and\s+)?(?:among|between)\s+(?P<party_span>.+?)(?:\.\s*\n\n|\.\s*$|\n\n)"
    )
    .unwrap();

    pub static ref MERGER_AGREEMENT_HEADER: Regex =
        Regex::new(r"(?i)agreement\s+and\s+plan\s+of\s+merger").unwrap();

    /// A2: parenthesized quoted label, optionally preceded by
    /// `the` / `hereinafter (referred to as)`.
    pub static ref DEFINED_TERM_ROLE: Regex = Regex::new(
        r#"(?i)\(\s*(?:the\s+|hereinafter\s+(?:referred\s+to\s+as\s+)?(?:the\s+)?|referred\s+to\s+as\s+(?:the\s+)?)?"(?P<label>[A-Za-z][A-Za-z .\-]{0,40})"\s*\)"#
    )
    .unwrap();

    /// A3: affiliation phrase followed by a capitalized sponsor name.
    pub static ref SPONSOR_AFFILIATION: Regex = Regex::new(
        r"\b(?i:affiliates\s+of|funds\s+(?:and\s+accounts\s+)?managed\s+by|portfolio\s+compan(?:y|ies)\s+of|controlled\s+by)\s+(?P<sponsor>[A-Z][A-Za-z0-9&.'\- ]{1,60}?)(?:\.|,|;|\s+(?i:and)\b|\s+\(|$)"
    )
    .unwrap();

    /// Negative phrases that suppress a sponsor match in context.
    pub static ref SPONSOR_NEGATIVE_PHRASES: Regex = Regex::new(
        r"(?i)\b(?:not\s+a\s+financial\s+sponsor|no\s+sponsor|non[-\s]?sponsored|independent\s+of\s+any\s+sponsor)\b"
    )
    .unwrap();

    /// A4: `$` amount with optional scale word.
    pub static ref CURRENCY_AMOUNT: Regex = Regex::new(
        r"\$\s?(?P<number>\d+(?:,\d{3})*(?:\.\d+)?)\s*(?P<scale>(?i:million|billion|mil|mm|bn|m|b))?\b"
    )
    .unwrap();

    pub static ref ITEM_101_PATTERN: Regex = Regex::new(r"(?i)item\s+1\.01\b").unwrap();
    pub static ref ITEM_801_PATTERN: Regex = Regex::new(r"(?i)item\s+8\.01\b").unwrap();
    pub static ref DEFINITIVE_AGREEMENT_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:material\s+definitive\s+agreement|agreement\s+and\s+plan\s+of\s+merger|definitive\s+merger\s+agreement|merger\s+agreement)\b"
    )
    .unwrap();
    pub static ref PURCHASE_AGREEMENT_PATTERN: Regex =
        Regex::new(r"(?i)\b(?:purchase\s+agreement|underwriting\s+agreement)\b").unwrap();

    static ref DATE_DATED: Regex = Regex::new(
        r"(?i)\bdated\s+(?:as\s+of\s+)?(?P<date>(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4})"
    )
    .unwrap();
    static ref DATE_ENTERED: Regex = Regex::new(
        r"(?i)\bentered\s+into\s+(?:as\s+of\s+|on\s+)?(?P<date>(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4})"
    )
    .unwrap();
    static ref DATE_ORDINAL: Regex = Regex::new(
        r"(?i)\b(?:the\s+)?(?P<day>\d{1,2})(?:st|nd|rd|th)\s+day\s+of\s+(?P<month>January|February|March|April|May|June|July|August|September|October|November|December),?\s+(?P<year>\d{4})"
    )
    .unwrap();
    static ref DATE_ISO: Regex = Regex::new(r"\b(?P<date>\d{4}-\d{2}-\d{2})\b").unwrap();

    /// Debt instrument: amount + optional rate + instrument noun + optional
    /// maturity year.
    pub static ref DEBT_INSTRUMENT: Regex = Regex::new(
        r"(?x)(?i)
        (?P<amount>\$\s?\d+(?:,\d{3})*(?:\.\d+)?(?:\s*(?:million|billion|mil|mm|bn|m|b))?)\s+
        (?:aggregate\s+principal\s+amount\s+of\s+(?:its\s+)?)?
        (?:(?P<rate>\d+(?:\.\d+)?%)\s+)?
        (?P<instrument>
            senior\s+(?:secured\s+|unsecured\s+)?notes
            |subordinated\s+notes
            |convertible\s+(?:senior\s+)?notes
            |notes
            |debentures
            |term\s+loan\s+(?:a|b)\b
            |term\s+loan
            |revolving\s+credit\s+facility
            |revolver
            |bridge\s+(?:loan|facility)
            |credit\s+facilit(?:y|ies)
        )
        (?:\s+due\s+(?P<maturity>\d{4}))?"
    )
    .unwrap();

    /// Underwriter span with a role descriptor: `..., as joint bookrunning
    /// managers`, `... as representatives of the several underwriters`.
    pub static ref UNDERWRITER_ROLE: Regex = Regex::new(
        r"(?i)(?P<banks>[A-Z][^;\n]{2,400}?),?\s+as\s+(?:the\s+)?(?P<role>representatives?\s+of\s+the\s+several\s+underwriters|joint\s+book-?running\s+managers?|joint\s+bookrunners?|bookrunners?|lead\s+managers?|co-?managers?|initial\s+purchasers?|underwriters?)\b"
    )
    .unwrap();

    /// Simpler `the underwriters are ...` form.
    pub static ref UNDERWRITERS_ARE: Regex = Regex::new(
        r"(?i)\bunderwriters\s+(?:are|were|include[sd]?)\s+(?P<banks>[^.;\n]{5,300})"
    )
    .unwrap();

    /// Large global banks; used to spot bank names in free text and tables.
    pub static ref BANK_NAME: Regex = Regex::new(
        r"(?xi)
        \b(?:J\.?P\.?\s*Morgan|JPMorgan)\b
        |\b(?:Goldman\s*Sachs)\b
        |\b(?:Morgan\s*Stanley)\b
        |\b(?:Bank\s*of\s*America|BofA|BAML)\b
        |\b(?:Citi(?:group|bank)?)\b
        |\b(?:Wells\s*Fargo)\b
        |\b(?:Barclays)\b
        |\b(?:Deutsche\s*Bank)\b
        |\b(?:Credit\s*Suisse)\b
        |\b(?:UBS)\b
        |\b(?:HSBC)\b
        |\b(?:BNP\s*Paribas)\b
        |\b(?:Societe\s*Generale)\b
        |\b(?:RBC|Royal\s*Bank\s*of\s*Canada)\b
        |\b(?:TD\s*Securities)\b
        |\b(?:Mizuho)\b
        |\b(?:MUFG|Mitsubishi\s*UFJ)\b
        |\b(?:SMBC|Sumitomo\s*Mitsui)\b
        |\b(?:Jefferies)\b
        |\b(?:Lazard)\b
        |\b(?:Evercore)\b"
    )
    .unwrap();

    /// Common bank-entity suffixes, anchored at end of a cell or segment.
    pub static ref BANK_SUFFIX: Regex =
        Regex::new(r"(?i)\b(?:LLC|Inc\.?|N\.?A\.?|Bank|Securities|Capital|Markets)\s*$").unwrap();

    /// Purely numeric / dollar content; excluded from bank detection.
    pub static ref NUMERIC_ONLY: Regex = Regex::new(r"^[\$\d,.%\s\-]+$").unwrap();

    static ref PARENTHETICAL: Regex = Regex::new(r"\([^)]*\)").unwrap();

    /// Jurisdictional descriptor trailer: `, a Delaware corporation ...`.
    /// The tail class admits newlines (the normalizer keeps single line
    /// breaks) but not parens or quotes, so only the last descriptor of a
    /// window is stripped.
    static ref JURISDICTION_TRAILER: Regex = Regex::new(
        r"(?i),\s*an?\s+[^,]*(?:corporation|limited\s+liability\s+company|limited\s+partnership|company|partnership|entity|association|incorporated|organized)[\w\s.,'&\-]*$"
    )
    .unwrap();

    /// Suffixes stripped from party names unconditionally.
    static ref PARTY_SUFFIX_UNCONDITIONAL: Regex = Regex::new(
        r"(?i)[,\s]+(?:inc|incorporated|llc|l\.l\.c|ltd|limited|l\.p|lp|plc|s\.a|n\.v|ag|gmbh|bv|nv|sa)\.?\s*$"
    )
    .unwrap();

    /// `Corp.` / `Co.` stripped only when comma-preceded, so natural uses
    /// inside names survive.
    static ref PARTY_SUFFIX_COMMA: Regex =
        Regex::new(r"(?i),\s*(?:corp|corporation|co)\.?\s*$").unwrap();

    /// Trailing company-name run used to recover the party ahead of a
    /// defined-term label (the regex engine has no lookbehind).
    static ref TRAILING_PARTY: Regex = Regex::new(
        r"(?P<name>[A-Z][\w&.'\-]*(?: +(?:[A-Z][\w&.'\-]*|of|and|&|the|de|la|van|von))*(?:, *(?:Inc|Incorporated|LLC|L\.L\.C|Ltd|Limited|L\.P|LP|Corp|Corporation|Co|PLC|S\.A|N\.V|AG|Company)\.?)?),? *$"
    )
    .unwrap();

    /// Trailing bank-name run inside an underwriter segment.
    static ref TRAILING_BANK: Regex = Regex::new(
        r"(?P<name>[A-Z][\w&.'\-]*(?: +(?:[A-Z][\w&.'\-]*|of|and|&))* +(?:LLC|Inc\.?|N\.?A\.?|Bank|Securities|Capital|Markets))\.?,? *$"
    )
    .unwrap();
}

/// Known private-equity sponsors (normalized, lowercase). Tier-1 matches
/// get confidence 0.95.
pub const SPONSOR_SEED_LIST: &[&str] = &[
    "blackstone",
    "kkr",
    "kkr & co",
    "apollo",
    "apollo global management",
    "carlyle",
    "carlyle group",
    "thoma bravo",
    "tpg",
    "bain capital",
    "warburg pincus",
    "silver lake",
    "advent international",
    "advent",
    "vista equity partners",
    "vista",
    "permira",
    "cvc",
    "cvc capital partners",
    "eqt",
    "hellman & friedman",
    "leonard green",
    "clayton dubilier & rice",
    "cd&r",
    "3g capital",
    "sycamore",
    "sycamore partners",
    "platinum equity",
    "francisco partners",
    "general atlantic",
    "insight partners",
    "brookfield",
    "ares management",
    "ares",
    "apax partners",
    "onex",
    "gtcr",
    "madison dearborn",
    "roark capital",
    "l catterton",
    "bc partners",
    "cinven",
    "oaktree",
    "centerbridge",
    "clearlake capital",
    "clearlake",
    "veritas capital",
    "new mountain capital",
    "golden gate capital",
    "ta associates",
    "genstar",
    "berkshire partners",
    "summit partners",
    "towerbrook",
];

const CORPORATE_SUFFIX_TOKENS: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "l.l.c",
    "corp",
    "corporation",
    "co",
    "company",
    "ltd",
    "limited",
    "l.p",
    "lp",
    "plc",
    "n.a",
    "s.a",
    "n.v",
    "ag",
    "holdings",
    "partners",
    "group",
    "bank",
    "trust",
];

/// Map an A2 defined-term label to a canonical party role.
pub fn map_role_label(label: &str) -> Option<&'static str> {
    let label = label.trim().to_ascii_lowercase();
    match label.as_str() {
        "company" | "target" | "seller" => Some("target"),
        "parent" | "buyer" | "purchaser" | "acquirer" | "acquiror" => Some("acquirer"),
        "merger sub" | "merger subsidiary" | "sub" | "purchaser sub" | "acquisition sub" => {
            Some("merger_sub")
        }
        _ => None,
    }
}

fn ends_with_corporate_suffix(s: &str) -> bool {
    let trimmed = s.trim_end().trim_end_matches('.');
    let last = trimmed
        .rsplit(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or("");
    let last = last.trim_matches(|c: char| c == '.' || c == ',');
    !last.is_empty()
        && CORPORATE_SUFFIX_TOKENS
            .iter()
            .any(|t| last.eq_ignore_ascii_case(t))
}

fn first_word_is_suffix(s: &str) -> bool {
    let first = s
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(')
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| c == '.' || c == ',');
    !first.is_empty()
        && CORPORATE_SUFFIX_TOKENS
            .iter()
            .any(|t| first.eq_ignore_ascii_case(t))
}

/// Remainder after a leading `and` + whitespace, if present.
fn strip_leading_and(s: &str) -> Option<&str> {
    let rest = s.strip_prefix("and").or_else(|| s.strip_prefix("AND"))?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn flush_party(parts: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim().trim_matches(',').trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    current.clear();
}

/// Parenthesis-aware splitter for A1 party spans.
///
/// Separators, at parenthesis depth zero only:
/// - `, and `
/// - `, ` when the preceding segment ended on a corporate suffix, `)` or a
///   closing quote and the next word begins a new capitalized party (not a
///   suffix continuation, not a jurisdictional descriptor)
/// - standalone ` and ` when the preceding token ends in `)` or a quote
pub fn split_party_span(span: &str) -> Vec<String> {
    let s = span.trim();
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut skip_until: usize = 0;

    for (i, c) in s.char_indices() {
        if i < skip_until {
            continue;
        }
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = (depth - 1).max(0);
                current.push(c);
            }
            ',' if depth == 0 => {
                let rest = &s[i + 1..];
                let after_ws = rest.trim_start();
                let ws_len = rest.len() - after_ws.len();

                if let Some(_tail) = strip_leading_and(after_ws) {
                    // ", and " separator
                    flush_party(&mut parts, &mut current);
                    let and_len = after_ws.len() - after_ws[3..].trim_start().len();
                    skip_until = i + 1 + ws_len + and_len;
                } else if begins_new_party(after_ws, &current) {
                    flush_party(&mut parts, &mut current);
                    skip_until = i + 1 + ws_len;
                } else {
                    current.push(c);
                }
            }
            c if c.is_whitespace() && depth == 0 => {
                let rest = &s[i..];
                let after_ws = rest.trim_start();
                let ws_len = rest.len() - after_ws.len();
                let prev = current.trim_end();
                let prev_terminal = prev.ends_with(')') || prev.ends_with('"') || prev.ends_with('\'');
                match strip_leading_and(after_ws) {
                    Some(_) if prev_terminal => {
                        flush_party(&mut parts, &mut current);
                        let and_len = after_ws.len() - after_ws[3..].trim_start().len();
                        skip_until = i + ws_len + and_len;
                    }
                    _ => current.push(c),
                }
            }
            _ => current.push(c),
        }
    }
    flush_party(&mut parts, &mut current);
    parts
}

fn begins_new_party(after_comma: &str, current: &str) -> bool {
    let Some(first) = after_comma.chars().next() else {
        return false;
    };
    if !first.is_uppercase() {
        return false;
    }
    if first_word_is_suffix(after_comma) {
        return false;
    }
    let prev = current.trim_end();
    ends_with_corporate_suffix(prev)
        || prev.ends_with(')')
        || prev.ends_with('"')
        || prev.ends_with('\'')
}

/// Parties paired with their defined-term labels within a preamble.
///
/// For each A2 match, the party is recovered from the text window directly
/// ahead of the label.
pub fn extract_party_with_role(text: &str) -> Vec<(String, String, Option<&'static str>)> {
    let mut results = Vec::new();
    for caps in DEFINED_TERM_ROLE.captures_iter(text) {
        let label = caps.name("label").unwrap().as_str().trim().to_string();
        let full = caps.get(0).unwrap();
        if let Some(party) = party_before(text, full.start()) {
            let role = map_role_label(&label);
            results.push((party, label, role));
        }
    }
    results
}

/// Recover the company name that directly precedes position `pos`.
fn party_before(text: &str, pos: usize) -> Option<String> {
    let mut start = pos.saturating_sub(160);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut window = text[start..pos].trim_end().trim_end_matches(',').trim_end();

    let stripped;
    if let Some(m) = JURISDICTION_TRAILER.find(window) {
        stripped = window[..m.start()].trim_end().trim_end_matches(',');
        window = stripped;
    }

    TRAILING_PARTY
        .captures(window)
        .map(|c| c.name("name").unwrap().as_str().trim().to_string())
        .filter(|name| name.len() > 1)
}

/// Normalize a party name for comparison: drop parentheticals and
/// jurisdictional descriptors, strip corporate suffixes (`Corp.`/`Co.` only
/// when comma-preceded), collapse whitespace, lowercase.
pub fn normalize_party_name(raw: &str) -> String {
    let mut name = PARENTHETICAL.replace_all(raw, " ").to_string();
    if let Some(m) = JURISDICTION_TRAILER.find(&name) {
        name.truncate(m.start());
    }
    loop {
        let mut changed = false;
        if let Some(m) = PARTY_SUFFIX_UNCONDITIONAL.find(&name) {
            name.truncate(m.start());
            changed = true;
        }
        if let Some(m) = PARTY_SUFFIX_COMMA.find(&name) {
            name.truncate(m.start());
            changed = true;
        }
        if !changed {
            break;
        }
    }
    let name = name.trim().trim_matches(|c: char| c == ',' || c == '.');
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Display form: preserves casing, strips only parentheticals and
/// jurisdictional descriptors.
///
/// Note this also removes useful context like `(a Delaware corporation)`;
/// kept as-is pending review.
pub fn display_party_name(raw: &str) -> String {
    let mut name = PARENTHETICAL.replace_all(raw, " ").to_string();
    if let Some(m) = JURISDICTION_TRAILER.find(&name) {
        name.truncate(m.start());
    }
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(',')
        .to_string()
}

/// Normalize a bank name for participant matching.
pub fn normalize_bank_name(raw: &str) -> String {
    let mut name = raw.trim().to_lowercase();
    let suffixes = [
        ", n.a.", " n.a.", ", na", " na", ", inc.", " inc.", ", inc", " inc", ", llc", " llc",
        ", ltd", " ltd",
    ];
    loop {
        let mut changed = false;
        for suffix in suffixes {
            if name.ends_with(suffix) {
                name.truncate(name.len() - suffix.len());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A sponsor hit with its provenance tier.
#[derive(Debug, Clone)]
pub struct SponsorHit {
    pub sponsor_name_raw: String,
    pub sponsor_name_normalized: String,
    /// "seed_list" or "affiliation_pattern".
    pub source_pattern: String,
    pub context_snippet: String,
    pub confidence: f64,
    pub is_negated: bool,
}

fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let mut lo = start.saturating_sub(radius);
    while lo > 0 && !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + radius).min(text.len());
    while hi < text.len() && !text.is_char_boundary(hi) {
        hi += 1;
    }
    &text[lo..hi]
}

/// Extract sponsor mentions from text.
///
/// Tier 1 scans the seed list (0.95); tier 2 applies the A3 affiliation
/// pattern (0.85). Matches with a negative phrase in the ±150-char context
/// are flagged negated.
pub fn extract_sponsors(text: &str) -> Vec<SponsorHit> {
    let mut hits: Vec<SponsorHit> = Vec::new();
    let lower = text.to_ascii_lowercase();

    for seed in SPONSOR_SEED_LIST {
        for (pos, _) in lower.match_indices(seed) {
            let end = pos + seed.len();
            let prev_ok = pos == 0
                || !lower[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric());
            let next_ok = end == lower.len()
                || !lower[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
            if !prev_ok || !next_ok {
                continue;
            }
            let context = context_window(text, pos, end, 150);
            hits.push(SponsorHit {
                sponsor_name_raw: text[pos..end].to_string(),
                sponsor_name_normalized: seed.to_string(),
                source_pattern: "seed_list".to_string(),
                context_snippet: context.to_string(),
                confidence: 0.95,
                is_negated: SPONSOR_NEGATIVE_PHRASES.is_match(context),
            });
            // One hit per seed name is enough.
            break;
        }
    }

    for caps in SPONSOR_AFFILIATION.captures_iter(text) {
        let sponsor = caps.name("sponsor").unwrap();
        let raw = sponsor.as_str().trim();
        if raw.is_empty() {
            continue;
        }
        let normalized = normalize_sponsor_name(raw);
        let context = context_window(text, sponsor.start(), sponsor.end(), 150);
        hits.push(SponsorHit {
            sponsor_name_raw: raw.to_string(),
            sponsor_name_normalized: normalized,
            source_pattern: "affiliation_pattern".to_string(),
            context_snippet: context.to_string(),
            confidence: 0.85,
            is_negated: SPONSOR_NEGATIVE_PHRASES.is_match(context),
        });
    }

    // Dedup by normalized name, seed tier winning.
    let mut deduped: Vec<SponsorHit> = Vec::new();
    for hit in hits {
        match deduped
            .iter_mut()
            .find(|h| h.sponsor_name_normalized == hit.sponsor_name_normalized)
        {
            Some(existing) => {
                if hit.confidence > existing.confidence {
                    *existing = hit;
                }
            }
            None => deduped.push(hit),
        }
    }
    deduped
}

fn normalize_sponsor_name(raw: &str) -> String {
    let mut name = raw.trim().to_lowercase();
    let suffixes = [
        " inc.", " inc", ", inc.", ", inc", " llc", ", llc", " l.p.", " lp", " ltd", " & co.",
        " & co", " management",
    ];
    loop {
        let mut changed = false;
        for suffix in suffixes {
            if name.ends_with(suffix) {
                name.truncate(name.len() - suffix.len());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    name.trim_matches(|c: char| c == ',' || c == '.' || c == ' ')
        .to_string()
}

/// Parsed A4 amount.
#[derive(Debug, Clone)]
pub struct CurrencyAmount {
    pub raw: String,
    pub value_usd: f64,
}

/// Parse a single A4 capture into USD.
pub fn parse_currency_amount(caps: &regex::Captures<'_>) -> Option<CurrencyAmount> {
    let number: f64 = caps
        .name("number")?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()?;
    let multiplier = match caps
        .name("scale")
        .map(|m| m.as_str().to_ascii_lowercase())
        .as_deref()
    {
        Some("million") | Some("mil") | Some("mm") | Some("m") => 1_000_000.0,
        Some("billion") | Some("bn") | Some("b") => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(CurrencyAmount {
        raw: caps.get(0)?.as_str().trim().to_string(),
        value_usd: number * multiplier,
    })
}

/// All A4 amounts in a text.
pub fn extract_currency_amounts(text: &str) -> Vec<CurrencyAmount> {
    CURRENCY_AMOUNT
        .captures_iter(text)
        .filter_map(|caps| parse_currency_amount(&caps))
        .collect()
}

fn month_number(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "january" => Some(1),
        "february" => Some(2),
        "march" => Some(3),
        "april" => Some(4),
        "may" => Some(5),
        "june" => Some(6),
        "july" => Some(7),
        "august" => Some(8),
        "september" => Some(9),
        "october" => Some(10),
        "november" => Some(11),
        "december" => Some(12),
        _ => None,
    }
}

fn parse_month_day_year(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let (month_name, rest) = cleaned.split_once(' ')?;
    let (day, year) = rest.split_once(',')?;
    NaiveDate::from_ymd_opt(
        year.trim().parse().ok()?,
        month_number(month_name)?,
        day.trim().parse().ok()?,
    )
}

/// Extract the agreement date, trying the alternates in order.
///
/// Returns `(raw, iso)`. An unparseable match is dropped, never guessed.
pub fn extract_agreement_date(text: &str) -> Option<(String, String)> {
    for pattern in [&*DATE_DATED, &*DATE_ENTERED] {
        if let Some(caps) = pattern.captures(text) {
            let raw = caps.name("date").unwrap().as_str().to_string();
            if let Some(date) = parse_month_day_year(&raw) {
                return Some((raw, date.format("%Y-%m-%d").to_string()));
            }
        }
    }
    if let Some(caps) = DATE_ORDINAL.captures(text) {
        let day: u32 = caps.name("day").unwrap().as_str().parse().ok()?;
        let month = month_number(caps.name("month").unwrap().as_str())?;
        let year: i32 = caps.name("year").unwrap().as_str().parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            let raw = caps.get(0).unwrap().as_str().to_string();
            return Some((raw, date.format("%Y-%m-%d").to_string()));
        }
    }
    if let Some(caps) = DATE_ISO.captures(text) {
        let raw = caps.name("date").unwrap().as_str().to_string();
        if NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_ok() {
            let iso = raw.clone();
            return Some((raw, iso));
        }
    }
    None
}

/// A debt instrument captured from text.
#[derive(Debug, Clone)]
pub struct DebtInstrument {
    /// Coarse family: bond, loan, bridge.
    pub instrument_family: String,
    /// Finer type: term_loan_b, rcf, bridge, notes, ...
    pub instrument_subtype: String,
    pub instrument_raw: String,
    pub amount_usd: Option<f64>,
    pub amount_raw: Option<String>,
    pub interest_rate: Option<String>,
    pub maturity_year: Option<String>,
    pub evidence_snippet: String,
    pub confidence: f64,
}

fn classify_instrument(raw: &str) -> (&'static str, &'static str) {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("bridge") {
        ("bridge", "bridge")
    } else if lower.contains("term loan b") {
        ("loan", "term_loan_b")
    } else if lower.contains("term loan a") {
        ("loan", "term_loan_a")
    } else if lower.contains("term loan") {
        ("loan", "term_loan")
    } else if lower.contains("revolv") {
        ("loan", "rcf")
    } else if lower.contains("credit facilit") {
        ("loan", "credit_facility")
    } else if lower.contains("note") || lower.contains("debenture") {
        ("bond", "notes")
    } else {
        ("unknown", "unknown")
    }
}

/// All debt instruments mentioned in a text. The evidence snippet carries
/// surrounding context so reconciliation can see issuer and target names.
pub fn extract_debt_instruments(text: &str) -> Vec<DebtInstrument> {
    DEBT_INSTRUMENT
        .captures_iter(text)
        .map(|caps| {
            let instrument_raw = caps.name("instrument").unwrap().as_str().to_string();
            let (family, subtype) = classify_instrument(&instrument_raw);
            let amount_raw = caps.name("amount").map(|m| m.as_str().trim().to_string());
            let amount_usd = amount_raw.as_deref().and_then(|raw| {
                CURRENCY_AMOUNT
                    .captures(raw)
                    .and_then(|c| parse_currency_amount(&c))
                    .map(|a| a.value_usd)
            });
            let full = caps.get(0).unwrap();
            DebtInstrument {
                instrument_family: family.to_string(),
                instrument_subtype: subtype.to_string(),
                instrument_raw,
                amount_usd,
                amount_raw,
                interest_rate: caps.name("rate").map(|m| m.as_str().to_string()),
                maturity_year: caps.name("maturity").map(|m| m.as_str().to_string()),
                evidence_snippet: context_window(text, full.start(), full.end(), 250).to_string(),
                confidence: 0.85,
            }
        })
        .collect()
}

/// A bank extracted from an underwriter/lead-manager phrase.
#[derive(Debug, Clone)]
pub struct UnderwriterHit {
    pub name_raw: String,
    pub name_normalized: String,
    pub role: String,
    pub evidence_snippet: String,
    pub confidence: f64,
}

fn role_from_descriptor(descriptor: &str) -> &'static str {
    let lower = descriptor.to_ascii_lowercase();
    if lower.contains("bookrunn") || lower.contains("book-runn") {
        if lower.contains("joint") {
            "joint bookrunner"
        } else {
            "bookrunner"
        }
    } else if lower.contains("co-manager") || lower.contains("co manager") {
        "co-manager"
    } else if lower.contains("lead manager") {
        "lead manager"
    } else if lower.contains("initial purchaser") {
        "initial purchaser"
    } else {
        "underwriter"
    }
}

fn clean_bank_segment(segment: &str) -> Option<String> {
    let segment = segment.trim().trim_matches(|c: char| c == ',' || c == ';');
    if segment.len() < 3 || NUMERIC_ONLY.is_match(segment) {
        return None;
    }
    const STOPWORDS: &[&str] = &["the", "and", "several", "other", "certain", "each", "of"];
    if STOPWORDS.iter().any(|w| segment.eq_ignore_ascii_case(w)) {
        return None;
    }
    if let Some(m) = BANK_NAME.find(segment) {
        return Some(segment[m.start()..].trim().to_string());
    }
    if BANK_SUFFIX.is_match(segment) {
        if let Some(caps) = TRAILING_BANK.captures(segment) {
            return Some(caps.name("name").unwrap().as_str().trim().to_string());
        }
    }
    None
}

fn split_bank_span(span: &str) -> Vec<String> {
    span.split(',')
        .flat_map(|part| part.split(" and "))
        .filter_map(clean_bank_segment)
        .collect()
}

/// Extract underwriter/lead-manager banks with their role descriptors.
pub fn extract_underwriters(text: &str) -> Vec<UnderwriterHit> {
    let mut hits: Vec<UnderwriterHit> = Vec::new();

    for caps in UNDERWRITER_ROLE.captures_iter(text) {
        let role = role_from_descriptor(caps.name("role").unwrap().as_str());
        let evidence = caps.get(0).unwrap().as_str();
        for bank in split_bank_span(caps.name("banks").unwrap().as_str()) {
            hits.push(UnderwriterHit {
                name_normalized: normalize_bank_name(&bank),
                name_raw: bank,
                role: role.to_string(),
                evidence_snippet: evidence.chars().take(300).collect(),
                confidence: 0.8,
            });
        }
    }

    for caps in UNDERWRITERS_ARE.captures_iter(text) {
        let evidence = caps.get(0).unwrap().as_str();
        for bank in split_bank_span(caps.name("banks").unwrap().as_str()) {
            hits.push(UnderwriterHit {
                name_normalized: normalize_bank_name(&bank),
                name_raw: bank,
                role: "underwriter".to_string(),
                evidence_snippet: evidence.chars().take(300).collect(),
                confidence: 0.8,
            });
        }
    }

    // Dedup by normalized name, first descriptor wins.
    let mut deduped: Vec<UnderwriterHit> = Vec::new();
    for hit in hits {
        if !deduped.iter().any(|h| h.name_normalized == hit.name_normalized) {
            deduped.push(hit);
        }
    }
    deduped
}
