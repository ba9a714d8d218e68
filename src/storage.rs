//! SQLite-backed graph store.
//!
//! One connection behind a mutex, WAL mode, prepared-statement cache.
//! Transactional boundaries follow pipeline units of work: one filing with
//! its facts and alerts is one transaction, one clustering batch is one
//! transaction.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{
    Alert, AlertKind, AtomicFact, Bank, BankAlias, Deal, DealState, Exhibit, ExtractionQuality,
    FactPayload, FactType, Filing, FinancingEvent, FinancingParticipant, ManualInput,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS filings (
    id INTEGER PRIMARY KEY,
    accession_number TEXT NOT NULL UNIQUE,
    cik TEXT NOT NULL,
    form_type TEXT NOT NULL,
    filing_date TEXT NOT NULL,
    company_name TEXT,
    filing_url TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT,
    raw_html TEXT,
    visual_text TEXT
);

CREATE INDEX IF NOT EXISTS idx_filings_cik_form ON filings(cik, form_type);
CREATE INDEX IF NOT EXISTS idx_filings_date ON filings(filing_date DESC);

CREATE TABLE IF NOT EXISTS exhibits (
    id INTEGER PRIMARY KEY,
    filing_id INTEGER NOT NULL REFERENCES filings(id),
    exhibit_type TEXT NOT NULL,
    description TEXT,
    filename TEXT,
    url TEXT,
    is_pdf INTEGER NOT NULL DEFAULT 0,
    is_material INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    extraction_quality TEXT,
    raw_content TEXT,
    visual_text TEXT
);

CREATE INDEX IF NOT EXISTS idx_exhibits_filing_type ON exhibits(filing_id, exhibit_type);

CREATE TABLE IF NOT EXISTS deals (
    id INTEGER PRIMARY KEY,
    state TEXT NOT NULL,
    acquirer_cik TEXT,
    acquirer_name_raw TEXT,
    acquirer_name_display TEXT,
    acquirer_name_normalized TEXT,
    target_cik TEXT,
    target_name_raw TEXT,
    target_name_display TEXT,
    target_name_normalized TEXT,
    deal_key TEXT NOT NULL,
    announcement_date TEXT,
    agreement_date TEXT,
    expected_close_date TEXT,
    actual_close_date TEXT,
    deal_value_usd REAL,
    deal_value_evidence TEXT,
    is_sponsor_backed INTEGER,
    sponsor_name_raw TEXT,
    sponsor_name_normalized TEXT,
    sponsor_confidence REAL,
    sponsor_evidence TEXT,
    sponsor_entity_id INTEGER,
    unresolved_sponsor_entity INTEGER NOT NULL DEFAULT 0,
    market_tag TEXT,
    is_cross_border INTEGER NOT NULL DEFAULT 0,
    advisory_fee_estimated REAL,
    underwriting_fee_estimated REAL,
    created_at TEXT NOT NULL
);

-- deal_key is unique across non-LOCKED deals only: locking a deal frees
-- its key for a follow-on transaction between the same parties.
CREATE UNIQUE INDEX IF NOT EXISTS idx_deals_key_active ON deals(deal_key) WHERE state != 'LOCKED';
CREATE INDEX IF NOT EXISTS idx_deals_key ON deals(deal_key);
CREATE INDEX IF NOT EXISTS idx_deals_state ON deals(state);
CREATE INDEX IF NOT EXISTS idx_deals_target_name ON deals(target_name_normalized);
CREATE INDEX IF NOT EXISTS idx_deals_acquirer_target ON deals(acquirer_cik, target_cik);

CREATE TABLE IF NOT EXISTS atomic_facts (
    id INTEGER PRIMARY KEY,
    fact_type TEXT NOT NULL,
    filing_id INTEGER REFERENCES filings(id),
    exhibit_id INTEGER REFERENCES exhibits(id),
    deal_id INTEGER REFERENCES deals(id),
    evidence_snippet TEXT NOT NULL CHECK (length(evidence_snippet) > 0),
    evidence_start_offset INTEGER,
    evidence_end_offset INTEGER,
    source_section TEXT,
    extraction_method TEXT NOT NULL,
    extraction_pattern TEXT,
    confidence REAL NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facts_deal_type ON atomic_facts(deal_id, fact_type);
CREATE INDEX IF NOT EXISTS idx_facts_filing_type ON atomic_facts(filing_id, fact_type);
CREATE INDEX IF NOT EXISTS idx_facts_exhibit ON atomic_facts(exhibit_id);
CREATE INDEX IF NOT EXISTS idx_facts_unclustered ON atomic_facts(fact_type) WHERE deal_id IS NULL;

CREATE TABLE IF NOT EXISTS financing_events (
    id INTEGER PRIMARY KEY,
    deal_id INTEGER NOT NULL REFERENCES deals(id),
    instrument_family TEXT NOT NULL,
    instrument_type TEXT,
    market_tag TEXT,
    amount_usd REAL,
    amount_raw TEXT,
    currency TEXT NOT NULL DEFAULT 'USD',
    maturity TEXT,
    interest_rate TEXT,
    spread_bps INTEGER,
    purpose TEXT,
    reconciliation_confidence REAL NOT NULL,
    reconciliation_explanation TEXT,
    source_exhibit_id INTEGER REFERENCES exhibits(id),
    source_fact_ids TEXT NOT NULL,
    estimated_fee_usd REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_deal ON financing_events(deal_id, instrument_family);

CREATE TABLE IF NOT EXISTS financing_participants (
    id INTEGER PRIMARY KEY,
    financing_event_id INTEGER NOT NULL REFERENCES financing_events(id),
    bank_id INTEGER REFERENCES banks(id),
    bank_name_raw TEXT NOT NULL,
    bank_name_normalized TEXT,
    role TEXT NOT NULL,
    role_normalized TEXT NOT NULL,
    evidence_snippet TEXT,
    evidence_source TEXT,
    table_cell_coords TEXT,
    role_weight REAL,
    estimated_fee_usd REAL
);

CREATE INDEX IF NOT EXISTS idx_participants_event ON financing_participants(financing_event_id);
CREATE INDEX IF NOT EXISTS idx_participants_bank ON financing_participants(bank_id);

CREATE TABLE IF NOT EXISTS banks (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    name_normalized TEXT,
    display_name TEXT,
    short_name TEXT,
    is_bulge_bracket INTEGER NOT NULL DEFAULT 0,
    is_regional INTEGER NOT NULL DEFAULT 0,
    primary_market TEXT
);

CREATE INDEX IF NOT EXISTS idx_banks_normalized ON banks(name_normalized);

CREATE TABLE IF NOT EXISTS bank_aliases (
    id INTEGER PRIMARY KEY,
    bank_id INTEGER NOT NULL REFERENCES banks(id),
    alias TEXT NOT NULL UNIQUE,
    alias_normalized TEXT
);

CREATE INDEX IF NOT EXISTS idx_bank_aliases_normalized ON bank_aliases(alias_normalized);

CREATE TABLE IF NOT EXISTS processing_alerts (
    id INTEGER PRIMARY KEY,
    alert_type TEXT NOT NULL,
    filing_id INTEGER REFERENCES filings(id),
    exhibit_id INTEGER REFERENCES exhibits(id),
    deal_id INTEGER REFERENCES deals(id),
    title TEXT NOT NULL,
    description TEXT,
    exhibit_link TEXT,
    fields_needed TEXT,
    preamble_hash TEXT,
    preamble_preview TEXT,
    is_resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at TEXT,
    resolved_by TEXT,
    resolution_notes TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_unresolved ON processing_alerts(alert_type) WHERE is_resolved = 0;
CREATE INDEX IF NOT EXISTS idx_alerts_preamble_hash ON processing_alerts(preamble_hash);

CREATE TABLE IF NOT EXISTS manual_inputs (
    id INTEGER PRIMARY KEY,
    alert_id INTEGER REFERENCES processing_alerts(id),
    deal_id INTEGER REFERENCES deals(id),
    financing_event_id INTEGER REFERENCES financing_events(id),
    input_type TEXT NOT NULL,
    data TEXT NOT NULL,
    entered_by TEXT NOT NULL,
    entered_at TEXT NOT NULL,
    notes TEXT
);
"#;

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_date(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

fn fmt_date(d: Option<NaiveDate>) -> Option<String> {
    d.map(|v| v.format("%Y-%m-%d").to_string())
}

/// Summary counters for the read interface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphSummary {
    pub filings: i64,
    pub facts: i64,
    pub deals: i64,
    pub deals_needs_review: i64,
    pub financing_events: i64,
    pub alerts_total: i64,
    pub alerts_unresolved: i64,
}

/// Deal search filters for the paginated read interface.
#[derive(Debug, Clone, Default)]
pub struct DealFilter {
    pub query: Option<String>,
    pub is_sponsor_backed: Option<bool>,
    pub market_tag: Option<String>,
    pub state: Option<DealState>,
    pub limit: usize,
    pub offset: usize,
}

pub struct GraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl GraphStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        Self::init(conn, db_path)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, db_path: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Graph store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Filings & exhibits

    pub fn filing_by_accession(&self, accession: &str) -> Result<Option<Filing>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, accession_number, cik, form_type, filing_date, company_name, filing_url, \
                    processed, processed_at, raw_html, visual_text \
             FROM filings WHERE accession_number = ?1",
        )?;
        let mut rows = stmt.query_map([accession], Self::row_to_filing)?;
        Ok(rows.next().transpose()?)
    }

    pub fn filing_by_id(&self, id: i64) -> Result<Option<Filing>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, accession_number, cik, form_type, filing_date, company_name, filing_url, \
                    processed, processed_at, raw_html, visual_text \
             FROM filings WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], Self::row_to_filing)?;
        Ok(rows.next().transpose()?)
    }

    fn row_to_filing(row: &Row<'_>) -> rusqlite::Result<Filing> {
        Ok(Filing {
            id: row.get(0)?,
            accession_number: row.get(1)?,
            cik: row.get(2)?,
            form_type: row.get(3)?,
            filing_date: parse_date(row.get(4)?).unwrap_or_default(),
            company_name: row.get(5)?,
            filing_url: row.get(6)?,
            processed: row.get::<_, i64>(7)? != 0,
            processed_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(&s)),
            raw_html: row.get(9)?,
            visual_text: row.get(10)?,
        })
    }

    fn insert_filing_tx(tx: &Connection, filing: &Filing) -> Result<i64> {
        tx.prepare_cached(
            "INSERT INTO filings (accession_number, cik, form_type, filing_date, company_name, \
                                  filing_url, processed, processed_at, raw_html, visual_text) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?
        .execute(params![
            filing.accession_number,
            filing.cik,
            filing.form_type,
            filing.filing_date.format("%Y-%m-%d").to_string(),
            filing.company_name,
            filing.filing_url,
            filing.processed as i64,
            filing.processed_at.map(|d| d.to_rfc3339()),
            filing.raw_html,
            filing.visual_text,
        ])?;
        Ok(tx.last_insert_rowid())
    }

    fn insert_exhibit_tx(tx: &Connection, exhibit: &Exhibit) -> Result<i64> {
        tx.prepare_cached(
            "INSERT INTO exhibits (filing_id, exhibit_type, description, filename, url, is_pdf, \
                                   is_material, processed, extraction_quality, raw_content, visual_text) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?
        .execute(params![
            exhibit.filing_id,
            exhibit.exhibit_type,
            exhibit.description,
            exhibit.filename,
            exhibit.url,
            exhibit.is_pdf as i64,
            exhibit.is_material as i64,
            exhibit.processed as i64,
            exhibit.extraction_quality.map(|q| q.as_str()),
            exhibit.raw_content,
            exhibit.visual_text,
        ])?;
        Ok(tx.last_insert_rowid())
    }

    pub fn exhibits_by_filing(&self, filing_id: i64) -> Result<Vec<Exhibit>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, filing_id, exhibit_type, description, filename, url, is_pdf, is_material, \
                    processed, extraction_quality, raw_content, visual_text \
             FROM exhibits WHERE filing_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([filing_id], Self::row_to_exhibit)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn row_to_exhibit(row: &Row<'_>) -> rusqlite::Result<Exhibit> {
        Ok(Exhibit {
            id: row.get(0)?,
            filing_id: row.get(1)?,
            exhibit_type: row.get(2)?,
            description: row.get(3)?,
            filename: row.get(4)?,
            url: row.get(5)?,
            is_pdf: row.get::<_, i64>(6)? != 0,
            is_material: row.get::<_, i64>(7)? != 0,
            processed: row.get::<_, i64>(8)? != 0,
            extraction_quality: row
                .get::<_, Option<String>>(9)?
                .and_then(|s| ExtractionQuality::parse(&s)),
            raw_content: row.get(10)?,
            visual_text: row.get(11)?,
        })
    }

    /// Persist one filing, its exhibits, facts and alerts as a single unit
    /// of work. Fact/alert references to the in-memory ids are rewritten to
    /// the assigned row ids.
    ///
    /// Returns the stored filing id.
    pub fn persist_filing_bundle(
        &self,
        filing: &mut Filing,
        exhibits: &mut [Exhibit],
        facts: &mut [AtomicFact],
        alerts: &mut [Alert],
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let old_filing_id = filing.id;
        let filing_id = Self::insert_filing_tx(&tx, filing)?;
        filing.id = filing_id;

        for exhibit in exhibits.iter_mut() {
            let old_exhibit_id = exhibit.id;
            exhibit.filing_id = filing_id;
            let exhibit_id = Self::insert_exhibit_tx(&tx, exhibit)?;

            for fact in facts.iter_mut() {
                if fact.exhibit_id == Some(old_exhibit_id) {
                    fact.exhibit_id = Some(exhibit_id);
                }
            }
            for alert in alerts.iter_mut() {
                if alert.exhibit_id == Some(old_exhibit_id) {
                    alert.exhibit_id = Some(exhibit_id);
                }
            }
            exhibit.id = exhibit_id;
        }

        for fact in facts.iter_mut() {
            if fact.filing_id == Some(old_filing_id) || fact.filing_id.is_none() {
                fact.filing_id = Some(filing_id);
            }
            let id = Self::insert_fact_tx(&tx, fact)?;
            fact.id = id;
        }
        for alert in alerts.iter_mut() {
            if alert.filing_id == Some(old_filing_id) || alert.filing_id.is_none() {
                alert.filing_id = Some(filing_id);
            }
            let id = Self::insert_alert_tx(&tx, alert)?;
            alert.id = id;
        }

        tx.commit()?;
        Ok(filing_id)
    }

    // ------------------------------------------------------------------
    // Facts

    fn insert_fact_tx(tx: &Connection, fact: &AtomicFact) -> Result<i64> {
        if fact.evidence_snippet.is_empty() {
            bail!("fact has empty evidence snippet");
        }

        // Idempotence: repeat extraction runs must not duplicate facts.
        let fingerprint: String = fact.evidence_snippet.chars().take(100).collect();
        let existing: Option<i64> = tx
            .prepare_cached(
                "SELECT id FROM atomic_facts \
                 WHERE fact_type = ?1 \
                   AND COALESCE(filing_id, 0) = COALESCE(?2, 0) \
                   AND COALESCE(exhibit_id, 0) = COALESCE(?3, 0) \
                   AND COALESCE(extraction_pattern, '') = COALESCE(?4, '') \
                   AND substr(evidence_snippet, 1, 100) = ?5 \
                 LIMIT 1",
            )?
            .query_row(
                params![
                    fact.fact_type().as_str(),
                    fact.filing_id,
                    fact.exhibit_id,
                    fact.extraction_pattern,
                    fingerprint,
                ],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(id) = existing {
            return Ok(id);
        }

        tx.prepare_cached(
            "INSERT INTO atomic_facts (fact_type, filing_id, exhibit_id, deal_id, evidence_snippet, \
                                       evidence_start_offset, evidence_end_offset, source_section, \
                                       extraction_method, extraction_pattern, confidence, payload, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?
        .execute(params![
            fact.fact_type().as_str(),
            fact.filing_id,
            fact.exhibit_id,
            fact.deal_id,
            fact.evidence_snippet,
            fact.evidence_start_offset,
            fact.evidence_end_offset,
            fact.source_section,
            fact.extraction_method,
            fact.extraction_pattern,
            fact.confidence,
            serde_json::to_string(&fact.payload)?,
            fact.created_at.to_rfc3339(),
        ])?;
        Ok(tx.last_insert_rowid())
    }

    pub fn insert_fact(&self, fact: &mut AtomicFact) -> Result<i64> {
        let conn = self.conn.lock();
        let id = Self::insert_fact_tx(&conn, fact)?;
        fact.id = id;
        Ok(id)
    }

    fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<AtomicFact> {
        let payload_json: String = row.get(12)?;
        let payload: FactPayload = serde_json::from_str(&payload_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                12,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
        Ok(AtomicFact {
            id: row.get(0)?,
            filing_id: row.get(2)?,
            exhibit_id: row.get(3)?,
            deal_id: row.get(4)?,
            evidence_snippet: row.get(5)?,
            evidence_start_offset: row.get(6)?,
            evidence_end_offset: row.get(7)?,
            source_section: row.get(8)?,
            extraction_method: row.get(9)?,
            extraction_pattern: row.get(10)?,
            confidence: row.get(11)?,
            payload,
            created_at: parse_ts(&row.get::<_, String>(13)?),
        })
    }

    const FACT_COLUMNS: &'static str =
        "id, fact_type, filing_id, exhibit_id, deal_id, evidence_snippet, evidence_start_offset, \
         evidence_end_offset, source_section, extraction_method, extraction_pattern, confidence, \
         payload, created_at";

    pub fn fact_by_id(&self, id: i64) -> Result<Option<AtomicFact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM atomic_facts WHERE id = ?1",
            Self::FACT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map([id], Self::row_to_fact)?;
        Ok(rows.next().transpose()?)
    }

    /// Unclustered facts of the given types, oldest first.
    pub fn unclustered_facts(&self, types: &[FactType]) -> Result<Vec<AtomicFact>> {
        let conn = self.conn.lock();
        let placeholders = types.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {} FROM atomic_facts WHERE deal_id IS NULL AND fact_type IN ({}) ORDER BY id",
            Self::FACT_COLUMNS,
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(types.iter().map(|t| t.as_str())),
            Self::row_to_fact,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Clustered facts of one type (deal_id assigned).
    pub fn clustered_facts(&self, fact_type: FactType) -> Result<Vec<AtomicFact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM atomic_facts WHERE deal_id IS NOT NULL AND fact_type = ?1 ORDER BY id",
            Self::FACT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([fact_type.as_str()], Self::row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Party facts sharing an exhibit with the given fact, falling back to
    /// the filing when the exhibit has none.
    pub fn sibling_party_facts(&self, fact: &AtomicFact) -> Result<Vec<AtomicFact>> {
        if let Some(exhibit_id) = fact.exhibit_id {
            let found = self.party_facts_where(fact.id, "exhibit_id = ?1", exhibit_id)?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        if let Some(filing_id) = fact.filing_id {
            return self.party_facts_where(fact.id, "filing_id = ?1", filing_id);
        }
        Ok(Vec::new())
    }

    fn party_facts_where(
        &self,
        fact_id: i64,
        clause: &str,
        key: i64,
    ) -> Result<Vec<AtomicFact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM atomic_facts \
             WHERE {} AND id != ?2 AND fact_type IN ('PARTY_DEFINITION', 'PARTY_MENTION') \
             ORDER BY id",
            Self::FACT_COLUMNS,
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![key, fact_id], Self::row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Deal id of any clustered party fact sharing the given fact's exhibit,
    /// falling back to the filing.
    pub fn deal_of_sibling_party_facts(&self, fact: &AtomicFact) -> Result<Option<i64>> {
        if let Some(exhibit_id) = fact.exhibit_id {
            if let Some(deal_id) = self.clustered_party_deal_where("exhibit_id = ?1", exhibit_id)? {
                return Ok(Some(deal_id));
            }
        }
        if let Some(filing_id) = fact.filing_id {
            return self.clustered_party_deal_where("filing_id = ?1", filing_id);
        }
        Ok(None)
    }

    fn clustered_party_deal_where(&self, clause: &str, key: i64) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT deal_id FROM atomic_facts \
             WHERE {} AND deal_id IS NOT NULL \
               AND fact_type IN ('PARTY_DEFINITION', 'PARTY_MENTION') \
             LIMIT 1",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([key], |row| row.get::<_, i64>(0))?;
        Ok(rows.next().transpose()?)
    }

    /// Write-once deal assignment: succeeds only while `deal_id` is NULL.
    pub fn assign_fact_to_deal(&self, fact_id: i64, deal_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached(
                "UPDATE atomic_facts SET deal_id = ?1 WHERE id = ?2 AND deal_id IS NULL",
            )?
            .execute(params![deal_id, fact_id])?;
        Ok(changed > 0)
    }

    pub fn move_facts_between_deals(&self, from_deal: i64, to_deal: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached("UPDATE atomic_facts SET deal_id = ?1 WHERE deal_id = ?2")?
            .execute(params![to_deal, from_deal])?;
        Ok(changed)
    }

    pub fn facts_by_deal(&self, deal_id: i64) -> Result<Vec<AtomicFact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM atomic_facts WHERE deal_id = ?1 ORDER BY id",
            Self::FACT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([deal_id], Self::row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn facts_by_ids(&self, ids: &[i64]) -> Result<Vec<AtomicFact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {} FROM atomic_facts WHERE id IN ({})",
            Self::FACT_COLUMNS,
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), Self::row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ------------------------------------------------------------------
    // Deals

    fn row_to_deal(row: &Row<'_>) -> rusqlite::Result<Deal> {
        Ok(Deal {
            id: row.get(0)?,
            state: DealState::parse(&row.get::<_, String>(1)?).unwrap_or(DealState::Candidate),
            acquirer_cik: row.get(2)?,
            acquirer_name_raw: row.get(3)?,
            acquirer_name_display: row.get(4)?,
            acquirer_name_normalized: row.get(5)?,
            target_cik: row.get(6)?,
            target_name_raw: row.get(7)?,
            target_name_display: row.get(8)?,
            target_name_normalized: row.get(9)?,
            deal_key: row.get(10)?,
            announcement_date: parse_date(row.get(11)?),
            agreement_date: parse_date(row.get(12)?),
            expected_close_date: parse_date(row.get(13)?),
            actual_close_date: parse_date(row.get(14)?),
            deal_value_usd: row.get(15)?,
            deal_value_evidence: row.get(16)?,
            is_sponsor_backed: row.get::<_, Option<i64>>(17)?.map(|v| v != 0),
            sponsor_name_raw: row.get(18)?,
            sponsor_name_normalized: row.get(19)?,
            sponsor_confidence: row.get(20)?,
            sponsor_evidence: row
                .get::<_, Option<String>>(21)?
                .and_then(|s| serde_json::from_str(&s).ok()),
            sponsor_entity_id: row.get(22)?,
            unresolved_sponsor_entity: row.get::<_, i64>(23)? != 0,
            market_tag: row.get(24)?,
            is_cross_border: row.get::<_, i64>(25)? != 0,
            advisory_fee_estimated: row.get(26)?,
            underwriting_fee_estimated: row.get(27)?,
            created_at: parse_ts(&row.get::<_, String>(28)?),
        })
    }

    const DEAL_COLUMNS: &'static str =
        "id, state, acquirer_cik, acquirer_name_raw, acquirer_name_display, acquirer_name_normalized, \
         target_cik, target_name_raw, target_name_display, target_name_normalized, deal_key, \
         announcement_date, agreement_date, expected_close_date, actual_close_date, deal_value_usd, \
         deal_value_evidence, is_sponsor_backed, sponsor_name_raw, sponsor_name_normalized, \
         sponsor_confidence, sponsor_evidence, sponsor_entity_id, unresolved_sponsor_entity, \
         market_tag, is_cross_border, advisory_fee_estimated, underwriting_fee_estimated, created_at";

    /// Insert a deal, serialized by the partial UNIQUE index on deal_key.
    /// Only a non-LOCKED row counts as a conflict; when another writer won
    /// the race, that row is returned instead.
    ///
    /// Returns `(deal, created)`.
    pub fn create_deal(&self, deal: &Deal) -> Result<(Deal, bool)> {
        {
            let conn = self.conn.lock();
            let inserted = conn
                .prepare_cached(
                    "INSERT OR IGNORE INTO deals (state, acquirer_cik, acquirer_name_raw, \
                         acquirer_name_display, acquirer_name_normalized, target_cik, target_name_raw, \
                         target_name_display, target_name_normalized, deal_key, announcement_date, \
                         agreement_date, expected_close_date, actual_close_date, deal_value_usd, \
                         deal_value_evidence, is_sponsor_backed, sponsor_name_raw, sponsor_name_normalized, \
                         sponsor_confidence, sponsor_evidence, sponsor_entity_id, unresolved_sponsor_entity, \
                         market_tag, is_cross_border, advisory_fee_estimated, underwriting_fee_estimated, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
                )?
                .execute(params![
                    deal.state.as_str(),
                    deal.acquirer_cik,
                    deal.acquirer_name_raw,
                    deal.acquirer_name_display,
                    deal.acquirer_name_normalized,
                    deal.target_cik,
                    deal.target_name_raw,
                    deal.target_name_display,
                    deal.target_name_normalized,
                    deal.deal_key,
                    fmt_date(deal.announcement_date),
                    fmt_date(deal.agreement_date),
                    fmt_date(deal.expected_close_date),
                    fmt_date(deal.actual_close_date),
                    deal.deal_value_usd,
                    deal.deal_value_evidence,
                    deal.is_sponsor_backed.map(|v| v as i64),
                    deal.sponsor_name_raw,
                    deal.sponsor_name_normalized,
                    deal.sponsor_confidence,
                    deal.sponsor_evidence
                        .as_ref()
                        .map(|v| v.to_string()),
                    deal.sponsor_entity_id,
                    deal.unresolved_sponsor_entity as i64,
                    deal.market_tag,
                    deal.is_cross_border as i64,
                    deal.advisory_fee_estimated,
                    deal.underwriting_fee_estimated,
                    deal.created_at.to_rfc3339(),
                ])?;
            if inserted > 0 {
                let id = conn.last_insert_rowid();
                drop(conn);
                let stored = self.deal_by_id(id)?.context("created deal vanished")?;
                return Ok((stored, true));
            }
        }
        // Lost the race (or a non-LOCKED deal already owns the key):
        // refetch the active owner.
        let existing = self
            .deal_by_key(&deal.deal_key)?
            .context("deal_key conflict but no active deal")?;
        Ok((existing, false))
    }

    pub fn deal_by_id(&self, id: i64) -> Result<Option<Deal>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM deals WHERE id = ?1", Self::DEAL_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map([id], Self::row_to_deal)?;
        Ok(rows.next().transpose()?)
    }

    /// The non-LOCKED deal owning a key, if any. LOCKED deals keep their
    /// key for history but no longer own it.
    pub fn deal_by_key(&self, deal_key: &str) -> Result<Option<Deal>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM deals WHERE deal_key = ?1 AND state != 'LOCKED'",
            Self::DEAL_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map([deal_key], Self::row_to_deal)?;
        Ok(rows.next().transpose()?)
    }

    /// The most recent LOCKED deal under a key; new matching facts raise
    /// alerts against it instead of updates.
    pub fn locked_deal_by_key(&self, deal_key: &str) -> Result<Option<Deal>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM deals WHERE deal_key = ?1 AND state = 'LOCKED' ORDER BY id DESC",
            Self::DEAL_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map([deal_key], Self::row_to_deal)?;
        Ok(rows.next().transpose()?)
    }

    pub fn deals_by_states(&self, states: &[DealState]) -> Result<Vec<Deal>> {
        let conn = self.conn.lock();
        let placeholders = states.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {} FROM deals WHERE state IN ({}) ORDER BY id",
            Self::DEAL_COLUMNS,
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(states.iter().map(|s| s.as_str())),
            Self::row_to_deal,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn all_deals(&self) -> Result<Vec<Deal>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM deals ORDER BY id", Self::DEAL_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], Self::row_to_deal)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Paginated deal search over display names with optional filters.
    pub fn search_deals(&self, filter: &DealFilter) -> Result<Vec<Deal>> {
        let conn = self.conn.lock();
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(q) = &filter.query {
            let like = format!("%{}%", q.to_lowercase());
            clauses.push(
                "(LOWER(COALESCE(target_name_display, '')) LIKE ? \
                  OR LOWER(COALESCE(acquirer_name_display, '')) LIKE ? \
                  OR LOWER(COALESCE(sponsor_name_raw, '')) LIKE ?)"
                    .to_string(),
            );
            args.push(Box::new(like.clone()));
            args.push(Box::new(like.clone()));
            args.push(Box::new(like));
        }
        if let Some(sponsor_backed) = filter.is_sponsor_backed {
            clauses.push("is_sponsor_backed = ?".to_string());
            args.push(Box::new(sponsor_backed as i64));
        }
        if let Some(tag) = &filter.market_tag {
            clauses.push("market_tag = ?".to_string());
            args.push(Box::new(tag.clone()));
        }
        if let Some(state) = filter.state {
            clauses.push("state = ?".to_string());
            args.push(Box::new(state.as_str().to_string()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let sql = format!(
            "SELECT {} FROM deals {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
            Self::DEAL_COLUMNS,
            where_clause,
            limit,
            filter.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            Self::row_to_deal,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_deal(&self, deal: &Deal) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE deals SET state = ?2, acquirer_cik = ?3, acquirer_name_raw = ?4, \
                 acquirer_name_display = ?5, acquirer_name_normalized = ?6, target_cik = ?7, \
                 target_name_raw = ?8, target_name_display = ?9, target_name_normalized = ?10, \
                 announcement_date = ?11, agreement_date = ?12, expected_close_date = ?13, \
                 actual_close_date = ?14, deal_value_usd = ?15, deal_value_evidence = ?16, \
                 is_sponsor_backed = ?17, sponsor_name_raw = ?18, sponsor_name_normalized = ?19, \
                 sponsor_confidence = ?20, sponsor_evidence = ?21, sponsor_entity_id = ?22, \
                 unresolved_sponsor_entity = ?23, market_tag = ?24, is_cross_border = ?25, \
                 advisory_fee_estimated = ?26, underwriting_fee_estimated = ?27 \
             WHERE id = ?1",
        )?
        .execute(params![
            deal.id,
            deal.state.as_str(),
            deal.acquirer_cik,
            deal.acquirer_name_raw,
            deal.acquirer_name_display,
            deal.acquirer_name_normalized,
            deal.target_cik,
            deal.target_name_raw,
            deal.target_name_display,
            deal.target_name_normalized,
            fmt_date(deal.announcement_date),
            fmt_date(deal.agreement_date),
            fmt_date(deal.expected_close_date),
            fmt_date(deal.actual_close_date),
            deal.deal_value_usd,
            deal.deal_value_evidence,
            deal.is_sponsor_backed.map(|v| v as i64),
            deal.sponsor_name_raw,
            deal.sponsor_name_normalized,
            deal.sponsor_confidence,
            deal.sponsor_evidence.as_ref().map(|v| v.to_string()),
            deal.sponsor_entity_id,
            deal.unresolved_sponsor_entity as i64,
            deal.market_tag,
            deal.is_cross_border as i64,
            deal.advisory_fee_estimated,
            deal.underwriting_fee_estimated,
        ])?;
        Ok(())
    }

    pub fn delete_deal(&self, deal_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("DELETE FROM deals WHERE id = ?1")?
            .execute([deal_id])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Financing events

    fn row_to_event(row: &Row<'_>) -> rusqlite::Result<FinancingEvent> {
        let fact_ids_json: String = row.get(14)?;
        Ok(FinancingEvent {
            id: row.get(0)?,
            deal_id: row.get(1)?,
            instrument_family: row.get(2)?,
            instrument_type: row.get(3)?,
            market_tag: row.get(4)?,
            amount_usd: row.get(5)?,
            amount_raw: row.get(6)?,
            currency: row.get(7)?,
            maturity: row.get(8)?,
            interest_rate: row.get(9)?,
            spread_bps: row.get(10)?,
            purpose: row.get(11)?,
            reconciliation_confidence: row.get(12)?,
            reconciliation_explanation: row.get(13)?,
            source_fact_ids: serde_json::from_str(&fact_ids_json).unwrap_or_default(),
            source_exhibit_id: row.get(15)?,
            estimated_fee_usd: row.get(16)?,
            created_at: parse_ts(&row.get::<_, String>(17)?),
        })
    }

    const EVENT_COLUMNS: &'static str =
        "id, deal_id, instrument_family, instrument_type, market_tag, amount_usd, amount_raw, \
         currency, maturity, interest_rate, spread_bps, purpose, reconciliation_confidence, \
         reconciliation_explanation, source_fact_ids, source_exhibit_id, estimated_fee_usd, created_at";

    /// Persist an event with its participants in one transaction.
    pub fn insert_financing_event(
        &self,
        event: &mut FinancingEvent,
        participants: &mut [FinancingParticipant],
    ) -> Result<i64> {
        if event.source_fact_ids.is_empty() {
            bail!("financing event has no source facts");
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.prepare_cached(
            "INSERT INTO financing_events (deal_id, instrument_family, instrument_type, market_tag, \
                 amount_usd, amount_raw, currency, maturity, interest_rate, spread_bps, purpose, \
                 reconciliation_confidence, reconciliation_explanation, source_fact_ids, \
                 source_exhibit_id, estimated_fee_usd, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )?
        .execute(params![
            event.deal_id,
            event.instrument_family,
            event.instrument_type,
            event.market_tag,
            event.amount_usd,
            event.amount_raw,
            event.currency,
            event.maturity,
            event.interest_rate,
            event.spread_bps,
            event.purpose,
            event.reconciliation_confidence,
            event.reconciliation_explanation,
            serde_json::to_string(&event.source_fact_ids)?,
            event.source_exhibit_id,
            event.estimated_fee_usd,
            event.created_at.to_rfc3339(),
        ])?;
        let event_id = tx.last_insert_rowid();
        event.id = event_id;

        for participant in participants.iter_mut() {
            participant.financing_event_id = event_id;
            tx.prepare_cached(
                "INSERT INTO financing_participants (financing_event_id, bank_id, bank_name_raw, \
                     bank_name_normalized, role, role_normalized, evidence_snippet, evidence_source, \
                     table_cell_coords, role_weight, estimated_fee_usd) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?
            .execute(params![
                event_id,
                participant.bank_id,
                participant.bank_name_raw,
                participant.bank_name_normalized,
                participant.role,
                participant.role_normalized,
                participant.evidence_snippet,
                participant.evidence_source,
                participant
                    .table_cell_coords
                    .as_ref()
                    .map(|v| v.to_string()),
                participant.role_weight,
                participant.estimated_fee_usd,
            ])?;
            participant.id = tx.last_insert_rowid();
        }

        tx.commit()?;
        Ok(event_id)
    }

    /// Whether any event was already materialized from the given fact.
    pub fn event_exists_for_fact(&self, fact_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT source_fact_ids FROM financing_events")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows.filter_map(|r| r.ok()) {
            let ids: Vec<i64> = serde_json::from_str(&row).unwrap_or_default();
            if ids.contains(&fact_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn events_by_deal(&self, deal_id: i64) -> Result<Vec<FinancingEvent>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM financing_events WHERE deal_id = ?1 ORDER BY id",
            Self::EVENT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([deal_id], Self::row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn all_events(&self) -> Result<Vec<FinancingEvent>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM financing_events ORDER BY id", Self::EVENT_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], Self::row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_event(&self, event: &FinancingEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE financing_events SET deal_id = ?2, instrument_family = ?3, instrument_type = ?4, \
                 market_tag = ?5, estimated_fee_usd = ?6 WHERE id = ?1",
        )?
        .execute(params![
            event.id,
            event.deal_id,
            event.instrument_family,
            event.instrument_type,
            event.market_tag,
            event.estimated_fee_usd,
        ])?;
        Ok(())
    }

    pub fn move_events_between_deals(&self, from_deal: i64, to_deal: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached("UPDATE financing_events SET deal_id = ?1 WHERE deal_id = ?2")?
            .execute(params![to_deal, from_deal])?;
        Ok(changed)
    }

    fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<FinancingParticipant> {
        Ok(FinancingParticipant {
            id: row.get(0)?,
            financing_event_id: row.get(1)?,
            bank_id: row.get(2)?,
            bank_name_raw: row.get(3)?,
            bank_name_normalized: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            role: row.get(5)?,
            role_normalized: row.get(6)?,
            evidence_snippet: row.get(7)?,
            evidence_source: row.get(8)?,
            table_cell_coords: row
                .get::<_, Option<String>>(9)?
                .and_then(|s| serde_json::from_str(&s).ok()),
            role_weight: row.get(10)?,
            estimated_fee_usd: row.get(11)?,
        })
    }

    pub fn participants_by_event(&self, event_id: i64) -> Result<Vec<FinancingParticipant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, financing_event_id, bank_id, bank_name_raw, bank_name_normalized, role, \
                    role_normalized, evidence_snippet, evidence_source, table_cell_coords, \
                    role_weight, estimated_fee_usd \
             FROM financing_participants WHERE financing_event_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([event_id], Self::row_to_participant)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_participant(&self, participant: &FinancingParticipant) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE financing_participants SET bank_id = ?2, role_weight = ?3, \
                 estimated_fee_usd = ?4, role_normalized = ?5 WHERE id = ?1",
        )?
        .execute(params![
            participant.id,
            participant.bank_id,
            participant.role_weight,
            participant.estimated_fee_usd,
            participant.role_normalized,
        ])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Banks

    pub fn insert_bank(&self, bank: &Bank, aliases: &[&str]) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.prepare_cached(
            "INSERT OR IGNORE INTO banks (name, name_normalized, display_name, short_name, \
                 is_bulge_bracket, is_regional, primary_market) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            bank.name,
            bank.name_normalized,
            bank.display_name,
            bank.short_name,
            bank.is_bulge_bracket as i64,
            bank.is_regional as i64,
            bank.primary_market,
        ])?;
        let bank_id: i64 = tx.query_row(
            "SELECT id FROM banks WHERE name = ?1",
            [&bank.name],
            |row| row.get(0),
        )?;
        for alias in aliases {
            let normalized = alias.to_lowercase().replace([',', '.'], "");
            tx.prepare_cached(
                "INSERT OR IGNORE INTO bank_aliases (bank_id, alias, alias_normalized) \
                 VALUES (?1, ?2, ?3)",
            )?
            .execute(params![bank_id, alias, normalized])?;
        }
        tx.commit()?;
        Ok(bank_id)
    }

    fn row_to_bank(row: &Row<'_>) -> rusqlite::Result<Bank> {
        Ok(Bank {
            id: row.get(0)?,
            name: row.get(1)?,
            name_normalized: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            display_name: row.get(3)?,
            short_name: row.get(4)?,
            is_bulge_bracket: row.get::<_, i64>(5)? != 0,
            is_regional: row.get::<_, i64>(6)? != 0,
            primary_market: row.get(7)?,
        })
    }

    pub fn all_banks(&self) -> Result<Vec<Bank>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, name_normalized, display_name, short_name, is_bulge_bracket, \
                    is_regional, primary_market FROM banks ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::row_to_bank)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn bank_by_id(&self, id: i64) -> Result<Option<Bank>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, name_normalized, display_name, short_name, is_bulge_bracket, \
                    is_regional, primary_market FROM banks WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], Self::row_to_bank)?;
        Ok(rows.next().transpose()?)
    }

    pub fn aliases_by_bank(&self, bank_id: i64) -> Result<Vec<BankAlias>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, bank_id, alias, alias_normalized FROM bank_aliases WHERE bank_id = ?1",
        )?;
        let rows = stmt.query_map([bank_id], |row| {
            Ok(BankAlias {
                id: row.get(0)?,
                bank_id: row.get(1)?,
                alias: row.get(2)?,
                alias_normalized: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn all_aliases(&self) -> Result<Vec<BankAlias>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, bank_id, alias, alias_normalized FROM bank_aliases ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BankAlias {
                id: row.get(0)?,
                bank_id: row.get(1)?,
                alias: row.get(2)?,
                alias_normalized: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ------------------------------------------------------------------
    // Alerts

    fn insert_alert_tx(tx: &Connection, alert: &Alert) -> Result<i64> {
        // Deduplicate repeated extraction failures on the preamble hash.
        if let Some(hash) = &alert.preamble_hash {
            let existing: Option<i64> = tx
                .prepare_cached(
                    "SELECT id FROM processing_alerts \
                     WHERE alert_type = ?1 AND preamble_hash = ?2 LIMIT 1",
                )?
                .query_row(params![alert.kind.as_str(), hash], |row| row.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        tx.prepare_cached(
            "INSERT INTO processing_alerts (alert_type, filing_id, exhibit_id, deal_id, title, \
                 description, exhibit_link, fields_needed, preamble_hash, preamble_preview, \
                 is_resolved, resolved_at, resolved_by, resolution_notes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?
        .execute(params![
            alert.kind.as_str(),
            alert.filing_id,
            alert.exhibit_id,
            alert.deal_id,
            alert.title,
            alert.description,
            alert.exhibit_link,
            alert
                .fields_needed
                .as_ref()
                .map(|f| serde_json::to_string(f).unwrap_or_default()),
            alert.preamble_hash,
            alert.preamble_preview,
            alert.is_resolved as i64,
            alert.resolved_at.map(|d| d.to_rfc3339()),
            alert.resolved_by,
            alert.resolution_notes,
            alert.created_at.to_rfc3339(),
        ])?;
        Ok(tx.last_insert_rowid())
    }

    pub fn insert_alert(&self, alert: &mut Alert) -> Result<i64> {
        let conn = self.conn.lock();
        let id = Self::insert_alert_tx(&conn, alert)?;
        alert.id = id;
        Ok(id)
    }

    fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
        Ok(Alert {
            id: row.get(0)?,
            kind: AlertKind::parse(&row.get::<_, String>(1)?)
                .unwrap_or(AlertKind::LowConfidenceMatch),
            filing_id: row.get(2)?,
            exhibit_id: row.get(3)?,
            deal_id: row.get(4)?,
            title: row.get(5)?,
            description: row.get(6)?,
            exhibit_link: row.get(7)?,
            fields_needed: row
                .get::<_, Option<String>>(8)?
                .and_then(|s| serde_json::from_str(&s).ok()),
            preamble_hash: row.get(9)?,
            preamble_preview: row.get(10)?,
            is_resolved: row.get::<_, i64>(11)? != 0,
            resolved_at: row.get::<_, Option<String>>(12)?.map(|s| parse_ts(&s)),
            resolved_by: row.get(13)?,
            resolution_notes: row.get(14)?,
            created_at: parse_ts(&row.get::<_, String>(15)?),
        })
    }

    const ALERT_COLUMNS: &'static str =
        "id, alert_type, filing_id, exhibit_id, deal_id, title, description, exhibit_link, \
         fields_needed, preamble_hash, preamble_preview, is_resolved, resolved_at, resolved_by, \
         resolution_notes, created_at";

    pub fn alert_by_id(&self, id: i64) -> Result<Option<Alert>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM processing_alerts WHERE id = ?1",
            Self::ALERT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map([id], Self::row_to_alert)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_alerts(
        &self,
        kind: Option<AlertKind>,
        is_resolved: Option<bool>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut clauses = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(kind) = kind {
            clauses.push("alert_type = ?");
            args.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(resolved) = is_resolved {
            clauses.push("is_resolved = ?");
            args.push(Box::new(resolved as i64));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM processing_alerts {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
            Self::ALERT_COLUMNS,
            where_clause,
            limit.max(1),
            offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            Self::row_to_alert,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn resolve_alert(
        &self,
        alert_id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached(
                "UPDATE processing_alerts SET is_resolved = 1, resolved_at = ?2, resolved_by = ?3, \
                     resolution_notes = COALESCE(?4, resolution_notes) WHERE id = ?1",
            )?
            .execute(params![
                alert_id,
                Utc::now().to_rfc3339(),
                resolved_by,
                notes
            ])?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Manual inputs

    pub fn insert_manual_input(&self, input: &ManualInput) -> Result<i64> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO manual_inputs (alert_id, deal_id, financing_event_id, input_type, data, \
                 entered_by, entered_at, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(params![
            input.alert_id,
            input.deal_id,
            input.financing_event_id,
            input.input_type,
            input.data.to_string(),
            input.entered_by,
            input.entered_at.to_rfc3339(),
            input.notes,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    // ------------------------------------------------------------------
    // Counters

    pub fn summary(&self) -> Result<GraphSummary> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(GraphSummary {
            filings: count("SELECT COUNT(*) FROM filings")?,
            facts: count("SELECT COUNT(*) FROM atomic_facts")?,
            deals: count("SELECT COUNT(*) FROM deals")?,
            deals_needs_review: count(
                "SELECT COUNT(*) FROM deals WHERE state = 'NEEDS_REVIEW'",
            )?,
            financing_events: count("SELECT COUNT(*) FROM financing_events")?,
            alerts_total: count("SELECT COUNT(*) FROM processing_alerts")?,
            alerts_unresolved: count(
                "SELECT COUNT(*) FROM processing_alerts WHERE is_resolved = 0",
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatePayload, PartyPayload};

    fn party_fact(filing_id: i64, evidence: &str) -> AtomicFact {
        AtomicFact::new(
            FactPayload::PartyDefinition(PartyPayload {
                party_name_raw: "Target Co., Inc.".to_string(),
                party_name_normalized: "target co".to_string(),
                party_name_display: "Target Co., Inc.".to_string(),
                role_label: "Company".to_string(),
                cik: None,
            }),
            evidence,
        )
        .with_filing(filing_id)
        .with_pattern("PREAMBLE_PARTY_LIST")
    }

    #[test]
    fn test_empty_evidence_rejected() {
        let store = GraphStore::in_memory().unwrap();
        let mut fact = party_fact(1, "x");
        fact.evidence_snippet = String::new();
        assert!(store.insert_fact(&mut fact).is_err());
    }

    #[test]
    fn test_fact_insert_is_idempotent() {
        let store = GraphStore::in_memory().unwrap();
        let mut first = party_fact(1, "by and among Target Co., Inc.");
        let mut second = party_fact(1, "by and among Target Co., Inc.");
        let a = store.insert_fact(&mut first).unwrap();
        let b = store.insert_fact(&mut second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_deal_id_assignment_is_write_once() {
        let store = GraphStore::in_memory().unwrap();
        let mut fact = party_fact(1, "evidence text");
        let fact_id = store.insert_fact(&mut fact).unwrap();

        let (deal_a, _) = store.create_deal(&Deal::new("cik:1:name:alpha")).unwrap();
        let (deal_b, _) = store.create_deal(&Deal::new("cik:2:name:beta")).unwrap();

        assert!(store.assign_fact_to_deal(fact_id, deal_a.id).unwrap());
        assert!(!store.assign_fact_to_deal(fact_id, deal_b.id).unwrap());

        let stored = store.fact_by_id(fact_id).unwrap().unwrap();
        assert_eq!(stored.deal_id, Some(deal_a.id));
    }

    #[test]
    fn test_deal_key_unique_race_returns_existing() {
        let store = GraphStore::in_memory().unwrap();
        let (first, created_first) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        let (second, created_second) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_locked_deal_frees_its_key() {
        let store = GraphStore::in_memory().unwrap();
        let (mut old, _) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        old.state = DealState::Locked;
        store.update_deal(&old).unwrap();

        // The locked deal no longer owns the key.
        assert!(store.deal_by_key("cik:1:cik:2").unwrap().is_none());
        assert_eq!(
            store.locked_deal_by_key("cik:1:cik:2").unwrap().unwrap().id,
            old.id
        );

        // A follow-on transaction between the same parties gets a new deal.
        let (fresh, created) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        assert!(created);
        assert_ne!(fresh.id, old.id);
        assert_eq!(store.deal_by_key("cik:1:cik:2").unwrap().unwrap().id, fresh.id);

        // Uniqueness still holds among non-LOCKED deals.
        let (again, created_again) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        assert!(!created_again);
        assert_eq!(again.id, fresh.id);
    }

    #[test]
    fn test_event_requires_source_facts() {
        let store = GraphStore::in_memory().unwrap();
        let (deal, _) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        let mut event = FinancingEvent::new(deal.id, "bond");
        assert!(store
            .insert_financing_event(&mut event, &mut [])
            .is_err());
    }

    #[test]
    fn test_event_exists_for_fact() {
        let store = GraphStore::in_memory().unwrap();
        let (deal, _) = store.create_deal(&Deal::new("cik:1:cik:2")).unwrap();
        let mut fact = AtomicFact::new(
            FactPayload::DealDate(DatePayload {
                date_type: "agreement_date".to_string(),
                date_value: "2024-01-15".to_string(),
                date_raw: "January 15, 2024".to_string(),
            }),
            "dated January 15, 2024",
        );
        let fact_id = store.insert_fact(&mut fact).unwrap();

        let mut event = FinancingEvent::new(deal.id, "bond");
        event.source_fact_ids = vec![fact_id];
        store.insert_financing_event(&mut event, &mut []).unwrap();

        assert!(store.event_exists_for_fact(fact_id).unwrap());
        assert!(!store.event_exists_for_fact(fact_id + 1000).unwrap());
    }

    #[test]
    fn test_alert_dedup_on_preamble_hash() {
        let store = GraphStore::in_memory().unwrap();
        let mut a = Alert::new(AlertKind::FailedPrivateTargetExtraction, "failure");
        a.preamble_hash = Some("abc123".to_string());
        let mut b = Alert::new(AlertKind::FailedPrivateTargetExtraction, "failure again");
        b.preamble_hash = Some("abc123".to_string());
        let first = store.insert_alert(&mut a).unwrap();
        let second = store.insert_alert(&mut b).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_search_deals_filters() {
        let store = GraphStore::in_memory().unwrap();
        let mut deal = Deal::new("cik:1:name:target company");
        deal.target_name_display = Some("Target Company, Inc.".to_string());
        deal.market_tag = Some("HY_Bond".to_string());
        deal.is_sponsor_backed = Some(true);
        store.create_deal(&deal).unwrap();

        let found = store
            .search_deals(&DealFilter {
                query: Some("target".to_string()),
                is_sponsor_backed: Some(true),
                market_tag: Some("HY_Bond".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found.len(), 1);

        let missed = store
            .search_deals(&DealFilter {
                query: Some("unrelated".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(missed.is_empty());
    }
}
