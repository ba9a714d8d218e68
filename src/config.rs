//! Application and attribution configuration.
//!
//! Both load once at process start and fail fast when missing or invalid;
//! the attribution config is immutable for the process lifetime.

use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("attribution config not found: {0}. This file is required for fee calculations.")]
    NotFound(String),
    #[error("invalid JSON in attribution config: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing required field in attribution config: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Invalid(String),
}

/// Application configuration from the environment.
///
/// The registry requires an identification header of the form
/// `<application-name> <contact-email>`, so both parts are mandatory.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub admin_email: String,
    pub database_path: String,
    pub attribution_config_path: String,
    pub port: u16,
    pub edgar_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let app_name =
            std::env::var("APP_NAME").unwrap_or_else(|_| "MAFinancingGraph".to_string());
        let admin_email = std::env::var("ADMIN_EMAIL")
            .map_err(|_| ConfigError::Invalid("ADMIN_EMAIL is required for registry compliance".into()))?;
        if !EMAIL.is_match(&admin_email) {
            return Err(ConfigError::Invalid(format!(
                "ADMIN_EMAIL must be a valid email address: {}",
                admin_email
            )));
        }

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./mafg.db".to_string());
        let attribution_config_path = std::env::var("ATTRIBUTION_CONFIG_PATH")
            .unwrap_or_else(|_| "config/attribution_config.json".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);
        let edgar_base_url = std::env::var("EDGAR_BASE_URL")
            .unwrap_or_else(|_| "https://www.sec.gov".to_string());

        Ok(Self {
            app_name,
            admin_email,
            database_path,
            attribution_config_path,
            port,
            edgar_base_url,
        })
    }

    /// Registry identification header: `<application-name> <contact-email>`.
    pub fn user_agent(&self) -> String {
        format!("{} {}", self.app_name, self.admin_email)
    }
}

/// Advisory fee bps tiered by deal value.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisoryFeeBps {
    pub default: f64,
    #[serde(rename = "deal_size_over_1B")]
    pub deal_size_over_1b: Option<f64>,
    #[serde(rename = "deal_size_over_5B")]
    pub deal_size_over_5b: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    pub fuzzy_bank_match_min: f64,
    #[serde(default)]
    pub reconcile_min_confidence: Option<f64>,
}

/// Attribution configuration (JSON file, all top-level fields required).
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    pub advisory_fee_bps: AdvisoryFeeBps,
    /// Keyed by market tag; must carry an `Unknown` fallback.
    pub underwriting_fee_bps: HashMap<String, f64>,
    /// instrument family -> canonical role -> weight.
    pub role_splits: HashMap<String, HashMap<String, f64>>,
    pub thresholds: Thresholds,
}

/// Load and validate the attribution configuration. Fails fast.
pub fn load_attribution_config(path: &str) -> Result<AttributionConfig, ConfigError> {
    let path_ref = Path::new(path);
    if !path_ref.exists() {
        return Err(ConfigError::NotFound(path.to_string()));
    }
    let raw = std::fs::read_to_string(path_ref)
        .map_err(|e| ConfigError::Invalid(format!("cannot read {}: {}", path, e)))?;

    // Surface which required field is missing before serde's error.
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    for field in [
        "advisory_fee_bps",
        "underwriting_fee_bps",
        "role_splits",
        "thresholds",
    ] {
        if value.get(field).is_none() {
            return Err(ConfigError::MissingField(field));
        }
    }

    let config: AttributionConfig = serde_json::from_value(value)?;
    if !config.underwriting_fee_bps.contains_key("Unknown") {
        return Err(ConfigError::Invalid(
            "underwriting_fee_bps must define an 'Unknown' fallback".into(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// The attribution config used across unit tests; construct and inject,
    /// never read from ambient process state.
    pub fn test_config() -> AttributionConfig {
        serde_json::from_value(serde_json::json!({
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
                    "bookrunner": 1.0,
                    "joint_bookrunner": 1.0,
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
                "bridge": {
                    "lead_arranger": 1.0,
                    "other": 0.2
                },
                "unknown": {
                    "underwriter": 0.5,
                    "other": 0.1
                }
            },
            "thresholds": {
                "fuzzy_bank_match_min": 92.0
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_missing_file_fails() {
        let err = load_attribution_config("/nonexistent/attribution.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_missing_field_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attribution.json");
        std::fs::write(&path, r#"{"advisory_fee_bps": {"default": 50}}"#).unwrap();
        let err = load_attribution_config(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_unknown_fallback_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attribution.json");
        std::fs::write(
            &path,
            r#"{
                "advisory_fee_bps": {"default": 50},
                "underwriting_fee_bps": {"HY_Bond": 180},
                "role_splits": {},
                "thresholds": {"fuzzy_bank_match_min": 92}
            }"#,
        )
        .unwrap();
        let err = load_attribution_config(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_valid_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attribution.json");
        std::fs::write(
            &path,
            serde_json::to_string(&serde_json::json!({
                "advisory_fee_bps": {"default": 50, "deal_size_over_1B": 30},
                "underwriting_fee_bps": {"HY_Bond": 180, "Unknown": 100},
                "role_splits": {"bond": {"joint_bookrunner": 1.0, "other": 0.1}},
                "thresholds": {"fuzzy_bank_match_min": 92}
            }))
            .unwrap(),
        )
        .unwrap();
        let config = load_attribution_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.advisory_fee_bps.default, 50.0);
        assert_eq!(config.underwriting_fee_bps["Unknown"], 100.0);
        assert_eq!(config.thresholds.fuzzy_bank_match_min, 92.0);
    }
}
