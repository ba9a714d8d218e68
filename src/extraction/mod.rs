//! Document extraction: visual text normalization, the regex pattern pack,
//! HTML table parsing, and atomic fact emission.

pub mod facts;
pub mod patterns;
pub mod tables;
pub mod visual_text;

pub use facts::{extract_from_exhibit, extract_from_filing, ExtractionOutcome};
pub use visual_text::{extract_visual_text, normalize_text, preamble, PREAMBLE_CHARS};
