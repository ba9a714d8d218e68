//! Canonical bank entities and their aliases.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub id: i64,
    pub name: String,
    pub name_normalized: String,
    pub display_name: Option<String>,
    pub short_name: Option<String>,
    /// Global-scale full-service institution (metadata only).
    pub is_bulge_bracket: bool,
    pub is_regional: bool,
    pub primary_market: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAlias {
    pub id: i64,
    pub bank_id: i64,
    pub alias: String,
    pub alias_normalized: String,
}
