//! Visual text extraction from registry HTML documents.
//!
//! Filing HTML is often non-semantic (`<div>`, `<font>`, `<br><br>` soup),
//! so extraction walks the DOM instead of trusting `<p>` tags:
//! - block-level boundaries become paragraph breaks
//! - table cells get a guard separator so words cannot fuse across cells
//! - smart quotes/dashes/spaces fold to the ASCII forms the pattern pack
//!   assumes

use lazy_static::lazy_static;
use regex::Regex;
use scraper::node::Node;
use scraper::Html;

/// Block-level elements that create visual breaks.
const BLOCK_TAGS: &[&str] = &[
    "div", "p", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "table", "thead", "tbody",
    "tfoot", "section", "article", "header", "footer", "aside", "nav", "blockquote", "pre",
    "hr", "address", "figcaption", "figure", "main", "dd", "dt", "dl",
];

/// Elements skipped entirely, descendants included.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "head", "meta", "link", "title"];

/// Characters that already terminate a cell; no guard separator after them.
const CELL_TERMINATORS: &str = ".!?;:\n|";

lazy_static! {
    static ref SPACE_RUN: Regex = Regex::new(r"[ \t]+").unwrap();
    static ref SPACE_AROUND_NEWLINE: Regex = Regex::new(r" *\n *").unwrap();
    static ref NEWLINE_RUN: Regex = Regex::new(r"\n{3,}").unwrap();
}

struct Walker {
    buffer: String,
    last_was_block: bool,
}

impl Walker {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            last_was_block: false,
        }
    }

    fn walk(&mut self, node: ego_tree::NodeRef<'_, Node>) {
        match node.value() {
            Node::Text(text) => {
                if !text.trim().is_empty() {
                    self.buffer.push_str(text);
                    self.last_was_block = false;
                }
            }
            Node::Element(element) => {
                let tag = element.name().to_ascii_lowercase();
                if SKIP_TAGS.contains(&tag.as_str()) {
                    return;
                }

                let is_block = BLOCK_TAGS.contains(&tag.as_str());
                if is_block && !self.last_was_block {
                    self.buffer.push_str("\n\n");
                    self.last_was_block = true;
                }

                match tag.as_str() {
                    "td" | "th" => {
                        for child in node.children() {
                            self.walk(child);
                        }
                        self.push_cell_guard();
                        return;
                    }
                    "br" => {
                        self.buffer.push('\n');
                        self.last_was_block = false;
                        return;
                    }
                    "tr" => {
                        for child in node.children() {
                            self.walk(child);
                        }
                        self.buffer.push('\n');
                        self.last_was_block = true;
                        return;
                    }
                    _ => {}
                }

                for child in node.children() {
                    self.walk(child);
                }

                if is_block && !self.last_was_block {
                    self.buffer.push_str("\n\n");
                    self.last_was_block = true;
                }
            }
            // Document / fragment roots: descend. Comments and doctypes
            // contribute nothing.
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.walk(child);
                }
            }
            _ => {}
        }
    }

    /// Append the ` | ` guard unless the cell already ended on terminal
    /// punctuation or a newline. The guard prevents regex-visible word
    /// fusion across adjacent cells.
    fn push_cell_guard(&mut self) {
        let trimmed = self.buffer.trim_end_matches(' ');
        match trimmed.chars().last() {
            Some(last) if !CELL_TERMINATORS.contains(last) => {
                self.buffer.push_str(" | ");
            }
            _ => {}
        }
    }
}

/// Extract the normalized visual text buffer from raw markup.
///
/// Malformed markup is recovered best-effort by the html5ever parser; this
/// never panics on bad input.
pub fn extract_visual_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut walker = Walker::new();
    walker.walk(document.tree.root());
    normalize_text(&walker.buffer)
}

/// Normalize already-extracted text: fold smart punctuation to ASCII and
/// collapse whitespace. Idempotent.
pub fn normalize_text(text: &str) -> String {
    let folded = substitute_chars(text);
    let collapsed = SPACE_RUN.replace_all(&folded, " ");
    let collapsed = SPACE_AROUND_NEWLINE.replace_all(&collapsed, "\n");
    let collapsed = NEWLINE_RUN.replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}

fn substitute_chars(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            // Smart double quotes
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{201f}' => Some('"'),
            // Smart single quotes / apostrophes
            '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{201b}' => Some('\''),
            // En/em/figure dashes and horizontal bar
            '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2012}' => Some('-'),
            // Non-breaking and special spaces
            '\u{a0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{200a}' => Some(' '),
            // Zero-width space and BOM
            '\u{200b}' | '\u{feff}' => None,
            c => Some(c),
        })
        .collect()
}

/// First `max_chars` characters of the buffer; preamble-anchored patterns
/// operate within this window.
pub fn preamble(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Default preamble window.
pub const PREAMBLE_CHARS: usize = 5_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_elements_create_paragraph_breaks() {
        let html = "<html><body><div>First paragraph</div><div>Second paragraph</div></body></html>";
        let text = extract_visual_text(html);
        assert_eq!(text, "First paragraph\n\nSecond paragraph");
    }

    #[test]
    fn test_formatting_tags_are_inlined() {
        let html = "<div>The <b>Agreement</b> and <font color=\"red\">Plan</font> of <span>Merger</span></div>";
        let text = extract_visual_text(html);
        assert_eq!(text, "The Agreement and Plan of Merger");
    }

    #[test]
    fn test_table_cells_get_guard_separator() {
        let html = "<table><tr><td>PartyA</td><td>PartyB</td></tr></table>";
        let text = extract_visual_text(html);
        assert!(text.contains("PartyA | PartyB"), "got: {}", text);
        assert!(!text.contains("PartyAPartyB"));
    }

    #[test]
    fn test_no_guard_after_terminal_punctuation() {
        let html = "<table><tr><td>Sentence ends.</td><td>Next</td></tr></table>";
        let text = extract_visual_text(html);
        assert!(!text.contains(". |"), "got: {}", text);
    }

    #[test]
    fn test_br_emits_single_newline() {
        let html = "<div>line one<br>line two</div>";
        let text = extract_visual_text(html);
        assert!(text.contains("line one\nline two"), "got: {}", text);
    }

    #[test]
    fn test_smart_quotes_and_dashes_fold_to_ascii() {
        let html = "<div>\u{201c}Company\u{201d} \u{2014} the \u{2018}Parent\u{2019}\u{a0}entity</div>";
        let text = extract_visual_text(html);
        assert_eq!(text, "\"Company\" - the 'Parent' entity");
    }

    #[test]
    fn test_zero_width_chars_removed() {
        let text = normalize_text("Tar\u{200b}get\u{feff} Inc.");
        assert_eq!(text, "Target Inc.");
    }

    #[test]
    fn test_script_and_style_skipped() {
        let html = "<html><head><style>p{color:red}</style></head><body><script>var x=1;</script><div>Visible</div></body></html>";
        let text = extract_visual_text(html);
        assert_eq!(text, "Visible");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "a  \n  \n \n b",
            "Alpha\u{2014}Beta   with\u{a0}spaces\n\n\n\nand newlines",
            "already clean text",
        ];
        for input in inputs {
            let once = normalize_text(input);
            let twice = normalize_text(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_malformed_html_does_not_panic() {
        let html = "<div><b>unclosed <td>orphan cell</div></b><p>tail";
        let text = extract_visual_text(html);
        assert!(text.contains("orphan cell"));
        assert!(text.contains("tail"));
    }

    #[test]
    fn test_preamble_is_prefix() {
        let text = "abcdef";
        assert_eq!(preamble(text, 3), "abc");
        assert_eq!(preamble(text, 100), "abcdef");
    }
}
