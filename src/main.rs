//! M&A Financing Graph backend.
//!
//! Ingests public securities filings, extracts evidence-backed atomic
//! facts, clusters them into deals, reconciles financing events, and
//! estimates advisory and underwriting fees.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mafg_backend::api::{router, AppState};
use mafg_backend::config::{load_attribution_config, AppConfig};
use mafg_backend::edgar::EdgarClient;
use mafg_backend::ingest::ingest_company_filings;
use mafg_backend::pipeline::{bank_resolver::seed_banks, run_pipeline};
use mafg_backend::storage::GraphStore;

#[derive(Parser)]
#[command(name = "mafg", about = "M&A financing graph backend", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Ingest a company's filings from the registry.
    Ingest {
        /// Company CIK.
        #[arg(long)]
        cik: String,
        /// Form types to include (comma-separated). Defaults to the M&A set.
        #[arg(long, value_delimiter = ',')]
        forms: Vec<String>,
        /// YYYY-MM-DD.
        #[arg(long)]
        start_date: Option<String>,
        /// YYYY-MM-DD.
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Run cluster -> reconcile -> classify -> attribute over the store.
    Pipeline,
    /// Seed the canonical bank table.
    SeedBanks,
}

/// Default form set for M&A ingestion.
const DEFAULT_FORMS: &[&str] = &[
    "8-K", "8-K/A", "S-4", "S-4/A", "DEFM14A", "DEFA14A", "SC 14D9", "SC 14D9/A", "SC TO-T",
    "SC TO-T/A",
];

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mafg_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    // Fail fast: both the app config and the attribution config are
    // required before anything runs.
    let config = AppConfig::from_env().context("invalid application configuration")?;
    let attribution = load_attribution_config(&config.attribution_config_path)
        .context("attribution configuration is required at startup")?;

    info!("🚀 M&A Financing Graph backend starting");
    info!("🪪 Registry identification header: {}", config.user_agent());

    let store = Arc::new(GraphStore::new(&config.database_path)?);
    let edgar = Arc::new(EdgarClient::new(
        &config.edgar_base_url,
        &config.app_name,
        &config.admin_email,
    )?);
    let attribution = Arc::new(attribution);

    match cli.command {
        Command::Serve { port } => {
            let state = AppState {
                store,
                edgar,
                attribution,
            };
            let app = router(state);
            let addr = format!("0.0.0.0:{}", port);
            let listener = TcpListener::bind(&addr).await?;
            info!("🎯 API server listening on {}", addr);
            axum::serve(listener, app).await.context("server error")?;
        }
        Command::Ingest {
            cik,
            forms,
            start_date,
            end_date,
        } => {
            let forms = if forms.is_empty() {
                DEFAULT_FORMS.iter().map(|s| s.to_string()).collect()
            } else {
                forms
            };
            let report = ingest_company_filings(
                &store,
                &edgar,
                &cik,
                &forms,
                start_date.as_deref(),
                end_date.as_deref(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Pipeline => {
            let report = run_pipeline(&store, &attribution)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SeedBanks => {
            let inserted = seed_banks(&store)?;
            info!("🏦 Seeded {} banks", inserted);
        }
    }

    Ok(())
}
