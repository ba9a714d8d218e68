//! HTML table parsing into a canonical Table IR.
//!
//! 1. Two-pass build expanding rowspan/colspan into a dense grid
//! 2. Header-row heuristics
//! 3. Role-column detection for bank/role mapping
//! 4. Bank-column detection
//! 5. (bank, role, evidence) extraction per data row

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};

use super::patterns::{BANK_NAME, BANK_SUFFIX, NUMERIC_ONLY};

/// Role keywords for column detection.
const ROLE_KEYWORDS: &[&str] = &[
    // Bond underwriting roles
    "bookrunner",
    "joint bookrunner",
    "active bookrunner",
    "passive bookrunner",
    "co-manager",
    "co manager",
    "lead manager",
    "manager",
    "underwriter",
    "senior underwriter",
    "lead underwriter",
    // Loan arranging roles
    "arranger",
    "lead arranger",
    "joint lead arranger",
    "mandated lead arranger",
    "administrative agent",
    "admin agent",
    "syndication agent",
    "documentation agent",
    "collateral agent",
    "paying agent",
    // Advisory roles
    "financial advisor",
    "financial adviser",
    "advisor",
    "adviser",
    "fairness opinion",
];

const HEADER_KEYWORDS: &[&str] = &[
    "name",
    "lender",
    "underwriter",
    "role",
    "institution",
    "amount",
    "commitment",
];

lazy_static! {
    static ref TABLE_SEL: Selector = Selector::parse("table").unwrap();
    static ref TR_SEL: Selector = Selector::parse("tr").unwrap();
    static ref CELL_SEL: Selector = Selector::parse("td, th").unwrap();
}

/// One cell in the table IR. Span-covered positions hold copies with the
/// origin coordinates preserved.
#[derive(Debug, Clone)]
pub struct TableCell {
    pub text: String,
    pub row: usize,
    pub col: usize,
    pub rowspan: usize,
    pub colspan: usize,
    pub is_header: bool,
}

impl TableCell {
    fn empty(row: usize, col: usize) -> Self {
        Self {
            text: String::new(),
            row,
            col,
            rowspan: 1,
            colspan: 1,
            is_header: false,
        }
    }
}

/// Dense grid representation of one parsed table.
#[derive(Debug, Clone)]
pub struct TableIr {
    pub cells: Vec<Vec<TableCell>>,
    pub header_rows: usize,
    pub role_column: Option<usize>,
    pub bank_columns: Vec<usize>,
    pub num_rows: usize,
    pub num_cols: usize,
}

/// Extracted bank-role pair with its row evidence.
#[derive(Debug, Clone)]
pub struct BankRoleExtraction {
    pub bank_name: String,
    pub role: String,
    pub row: usize,
    pub col: usize,
    pub evidence_text: String,
}

/// Parses HTML tables into structured IRs.
pub struct TableParser {
    document: Html,
}

impl TableParser {
    pub fn new(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
        }
    }

    /// Parse every table in the document.
    pub fn parse_all_tables(&self) -> Vec<TableIr> {
        let mut tables = Vec::new();
        for table_el in self.document.select(&TABLE_SEL) {
            if let Some(mut ir) = parse_table_element(table_el) {
                if ir.num_rows > 0 {
                    detect_headers(&mut ir);
                    detect_role_column(&mut ir);
                    detect_bank_columns(&mut ir);
                    tables.push(ir);
                }
            }
        }
        tables
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    let text: String = cell.text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn span_attr(cell: ElementRef<'_>, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v >= 1)
        .unwrap_or(1)
}

fn parse_table_element(table: ElementRef<'_>) -> Option<TableIr> {
    // First pass: raw cells per row with their spans.
    let mut raw_rows: Vec<Vec<(String, usize, usize, bool)>> = Vec::new();
    for row in table.select(&TR_SEL) {
        let mut row_data = Vec::new();
        for cell in row.select(&CELL_SEL) {
            let is_header = cell.value().name() == "th";
            row_data.push((
                cell_text(cell),
                span_attr(cell, "rowspan"),
                span_attr(cell, "colspan"),
                is_header,
            ));
        }
        raw_rows.push(row_data);
    }
    if raw_rows.is_empty() {
        return None;
    }

    let num_rows = raw_rows.len();
    let max_cols = raw_rows
        .iter()
        .map(|row| row.iter().map(|c| c.2).sum::<usize>())
        .max()
        .unwrap_or(0);
    if max_cols == 0 {
        return None;
    }

    // Second pass: place each cell at the next empty column, copying it
    // across all covered positions.
    let mut grid: Vec<Vec<Option<TableCell>>> = vec![vec![None; max_cols]; num_rows];
    for (row_idx, row) in raw_rows.iter().enumerate() {
        let mut col_idx = 0usize;
        for (text, rowspan, colspan, is_header) in row {
            while col_idx < max_cols && grid[row_idx][col_idx].is_some() {
                col_idx += 1;
            }
            if col_idx >= max_cols {
                break;
            }
            let cell = TableCell {
                text: text.clone(),
                row: row_idx,
                col: col_idx,
                rowspan: *rowspan,
                colspan: *colspan,
                is_header: *is_header,
            };
            for r in row_idx..(row_idx + rowspan).min(num_rows) {
                for c in col_idx..(col_idx + colspan).min(max_cols) {
                    grid[r][c] = Some(cell.clone());
                }
            }
            col_idx += colspan;
        }
    }

    let cells: Vec<Vec<TableCell>> = grid
        .into_iter()
        .enumerate()
        .map(|(r, row)| {
            row.into_iter()
                .enumerate()
                .map(|(c, cell)| cell.unwrap_or_else(|| TableCell::empty(r, c)))
                .collect()
        })
        .collect();

    Some(TableIr {
        cells,
        header_rows: 0,
        role_column: None,
        bank_columns: Vec::new(),
        num_rows,
        num_cols: max_cols,
    })
}

/// Header heuristics: `<th>` rows count; the first row also qualifies when
/// all its non-empty cells are short and contain a header keyword. Only the
/// first three rows are considered.
fn detect_headers(table: &mut TableIr) {
    let mut header_count = 0;

    for (row_idx, row) in table.cells.iter().enumerate() {
        if row_idx > 2 {
            break;
        }

        let non_empty: Vec<&TableCell> =
            row.iter().filter(|c| !c.text.trim().is_empty()).collect();
        if non_empty.is_empty() {
            continue;
        }

        if non_empty.iter().all(|c| c.is_header) {
            header_count = row_idx + 1;
            continue;
        }

        if row_idx == 0 {
            let all_short = non_empty.iter().all(|c| c.text.trim().len() < 30);
            if all_short {
                let row_text = non_empty
                    .iter()
                    .map(|c| c.text.to_lowercase())
                    .collect::<Vec<_>>()
                    .join(" ");
                if HEADER_KEYWORDS.iter().any(|kw| row_text.contains(kw)) {
                    header_count = 1;
                }
            }
        }
    }

    table.header_rows = header_count;
}

fn cell_has_role_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    ROLE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Mark the column whose data rows carry role keywords at >= 30% density.
fn detect_role_column(table: &mut TableIr) {
    if table.num_cols == 0 || table.num_rows <= table.header_rows {
        return;
    }

    let data_rows = table.num_rows - table.header_rows;
    let mut role_counts = vec![0usize; table.num_cols];
    for row in &table.cells[table.header_rows..] {
        for (col_idx, cell) in row.iter().enumerate() {
            if cell_has_role_keyword(&cell.text) {
                role_counts[col_idx] += 1;
            }
        }
    }

    for (col_idx, count) in role_counts.iter().enumerate() {
        if *count as f64 / data_rows as f64 > 0.3 {
            table.role_column = Some(col_idx);
            break;
        }
    }
}

/// Mark columns whose data rows hit the bank-name regex at >= 20% density.
fn detect_bank_columns(table: &mut TableIr) {
    if table.num_cols == 0 || table.num_rows <= table.header_rows {
        return;
    }

    let data_rows = table.num_rows - table.header_rows;
    let mut bank_counts = vec![0usize; table.num_cols];
    for row in &table.cells[table.header_rows..] {
        for (col_idx, cell) in row.iter().enumerate() {
            if BANK_NAME.is_match(&cell.text) {
                bank_counts[col_idx] += 1;
            }
        }
    }

    for (col_idx, count) in bank_counts.iter().enumerate() {
        if *count as f64 / data_rows as f64 > 0.2 {
            table.bank_columns.push(col_idx);
        }
    }
}

fn header_inferred_role(table: &TableIr) -> Option<&'static str> {
    for row in table.cells.iter().take(table.header_rows) {
        for cell in row {
            let lower = cell.text.to_lowercase();
            if lower.contains("underwriter") {
                return Some("underwriter");
            }
            if lower.contains("lender") {
                return Some("lender");
            }
            if lower.contains("arranger") {
                return Some("arranger");
            }
            if lower.contains("bank") || lower.contains("institution") {
                return Some("participant");
            }
        }
    }
    None
}

fn find_bank_cell(row: &[TableCell]) -> Option<(usize, String)> {
    for (col_idx, cell) in row.iter().enumerate() {
        let text = cell.text.trim();
        if text.is_empty() {
            continue;
        }
        if BANK_NAME.is_match(text) {
            return Some((col_idx, text.to_string()));
        }
        if BANK_SUFFIX.is_match(text) && !NUMERIC_ONLY.is_match(text) {
            return Some((col_idx, text.to_string()));
        }
    }
    None
}

/// Extract bank-role pairs from a parsed table.
///
/// Role resolution order: role column, then role keywords in sibling cells,
/// then the header-inferred role.
pub fn extract_bank_roles(table: &TableIr) -> Vec<BankRoleExtraction> {
    let header_role = header_inferred_role(table);
    let mut extractions = Vec::new();

    for row_idx in table.header_rows..table.num_rows {
        let row = &table.cells[row_idx];

        let Some((bank_col, bank_name)) = find_bank_cell(row) else {
            continue;
        };

        let mut role: Option<String> = None;
        if let Some(role_col) = table.role_column {
            let text = row[role_col].text.trim();
            if !text.is_empty() {
                role = Some(text.to_string());
            }
        }
        if role.is_none() {
            for (col_idx, cell) in row.iter().enumerate() {
                if col_idx == bank_col {
                    continue;
                }
                if cell_has_role_keyword(&cell.text) {
                    role = Some(cell.text.trim().to_string());
                    break;
                }
            }
        }
        if role.is_none() {
            role = header_role.map(|r| r.to_string());
        }

        if let Some(role) = role {
            let evidence = row
                .iter()
                .map(|c| c.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" | ");
            extractions.push(BankRoleExtraction {
                bank_name,
                role,
                row: row_idx,
                col: bank_col,
                evidence_text: evidence,
            });
        }
    }

    extractions
}

/// Bank-role pairs from every table in an HTML document.
pub fn extract_financing_participants(html: &str) -> Vec<BankRoleExtraction> {
    let parser = TableParser::new(html);
    parser
        .parse_all_tables()
        .iter()
        .flat_map(extract_bank_roles)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNDERWRITER_TABLE: &str = r#"
        <table>
            <tr><th>Underwriter</th><th>Principal Amount</th></tr>
            <tr><td>J.P. Morgan Securities LLC</td><td>$200,000,000</td></tr>
            <tr><td>Goldman Sachs &amp; Co. LLC</td><td>$200,000,000</td></tr>
            <tr><td>Barclays Capital Inc.</td><td>$100,000,000</td></tr>
        </table>
    "#;

    const LENDER_TABLE: &str = r#"
        <table>
            <tr><td>Lender</td><td>Commitment</td><td>Role</td></tr>
            <tr><td>JPMorgan Chase Bank, N.A.</td><td>$1,000,000,000</td><td>Administrative Agent and Joint Lead Arranger</td></tr>
            <tr><td>Bank of America, N.A.</td><td>$750,000,000</td><td>Syndication Agent</td></tr>
            <tr><td>Wells Fargo Bank, N.A.</td><td>$500,000,000</td><td>Joint Lead Arranger</td></tr>
        </table>
    "#;

    #[test]
    fn test_grid_dimensions() {
        let parser = TableParser::new(UNDERWRITER_TABLE);
        let tables = parser.parse_all_tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].num_rows, 4);
        assert_eq!(tables[0].num_cols, 2);
    }

    #[test]
    fn test_th_row_detected_as_header() {
        let parser = TableParser::new(UNDERWRITER_TABLE);
        let tables = parser.parse_all_tables();
        assert_eq!(tables[0].header_rows, 1);
    }

    #[test]
    fn test_keyword_header_without_th() {
        let parser = TableParser::new(LENDER_TABLE);
        let tables = parser.parse_all_tables();
        assert_eq!(tables[0].header_rows, 1);
    }

    #[test]
    fn test_role_column_detected() {
        let parser = TableParser::new(LENDER_TABLE);
        let tables = parser.parse_all_tables();
        assert_eq!(tables[0].role_column, Some(2));
    }

    #[test]
    fn test_bank_column_detected() {
        let parser = TableParser::new(LENDER_TABLE);
        let tables = parser.parse_all_tables();
        assert!(tables[0].bank_columns.contains(&0));
    }

    #[test]
    fn test_colspan_expansion() {
        let html = r#"
            <table>
                <tr><td colspan="2">Spanning</td><td>C</td></tr>
                <tr><td>A</td><td>B</td><td>C</td></tr>
            </table>
        "#;
        let parser = TableParser::new(html);
        let tables = parser.parse_all_tables();
        assert_eq!(tables[0].num_cols, 3);
        assert_eq!(tables[0].cells[0][0].text, "Spanning");
        assert_eq!(tables[0].cells[0][1].text, "Spanning");
        assert_eq!(tables[0].cells[0][1].col, 0);
    }

    #[test]
    fn test_rowspan_expansion() {
        let html = r#"
            <table>
                <tr><td rowspan="2">Tall</td><td>R1</td></tr>
                <tr><td>R2</td></tr>
            </table>
        "#;
        let parser = TableParser::new(html);
        let tables = parser.parse_all_tables();
        assert_eq!(tables[0].cells[1][0].text, "Tall");
        assert_eq!(tables[0].cells[1][1].text, "R2");
    }

    #[test]
    fn test_underwriter_extraction_header_inferred_role() {
        let participants = extract_financing_participants(UNDERWRITER_TABLE);
        assert_eq!(participants.len(), 3, "{:?}", participants);
        assert!(participants.iter().all(|p| p.role == "underwriter"));
        assert!(participants.iter().any(|p| p.bank_name.contains("Goldman")));
    }

    #[test]
    fn test_lender_extraction_uses_role_column() {
        let participants = extract_financing_participants(LENDER_TABLE);
        assert_eq!(participants.len(), 3);
        let jpm = participants
            .iter()
            .find(|p| p.bank_name.contains("JPMorgan"))
            .unwrap();
        assert!(jpm.role.contains("Joint Lead Arranger"));
        assert!(jpm.evidence_text.contains("$1,000,000,000"));
    }

    #[test]
    fn test_numeric_cells_not_banks() {
        let html = r#"
            <table>
                <tr><th>Amount</th><th>Total</th></tr>
                <tr><td>$1,000,000</td><td>$2,000,000</td></tr>
            </table>
        "#;
        let participants = extract_financing_participants(html);
        assert!(participants.is_empty());
    }
}
