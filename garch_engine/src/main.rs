/// main.rs — Volatility forecasting entry point
///
/// Runs one analysis:
///   1. Load config from .env (CLI flags override)
///   2. Read an adjusted-close price CSV
///   3. Fit the chosen GARCH-family model, forecast, run diagnostics
///   4. Print the report, export CSV frames (and JSON on request)
///
/// Usage:
///   cargo run --release --bin volcast -- --prices data/SPY.csv --model egarch --dist t
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use garch_engine::data::load_price_csv;
use garch_engine::export::{export_session, text_report, write_json};
use garch_engine::{
    AnalysisRequest, AnalysisSession, Distribution, EngineConfig, FitOptions, VolModel,
    VolatilityModelSpec,
};

#[derive(Parser)]
#[command(name = "volcast")]
#[command(about = "Estimate, forecast and diagnose GARCH-family volatility models")]
#[command(version)]
struct Cli {
    /// CSV with a date column and an (adjusted) close column
    #[arg(short, long)]
    prices: PathBuf,

    /// Label used in the report and output file names (default: file stem)
    #[arg(short, long)]
    ticker: Option<String>,

    /// garch | egarch | gjr
    #[arg(short, long)]
    model: Option<VolModel>,

    /// normal | t | skewt
    #[arg(short, long)]
    dist: Option<Distribution>,

    /// Forecast horizon in days (1-30)
    #[arg(long)]
    horizon: Option<usize>,

    /// Also fit every model × distribution and rank by AIC
    #[arg(long)]
    compare: bool,

    /// Directory for CSV / JSON output
    #[arg(short, long, default_value = "output")]
    out_dir: PathBuf,

    /// Write the full session as JSON next to the CSV files
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ── Config ───────────────────────────────────────────────────────────
    let mut cfg = EngineConfig::from_env()?;
    if let Some(model) = cli.model {
        cfg.model = model;
    }
    if let Some(dist) = cli.dist {
        cfg.distribution = dist;
    }
    if let Some(h) = cli.horizon {
        cfg.forecast_horizon = h;
    }
    cfg.validate()?;
    info!(
        "Config: model={} dist={} horizon={} paths={} seed={}",
        cfg.model, cfg.distribution, cfg.forecast_horizon, cfg.simulation_paths, cfg.simulation_seed
    );

    // ── Data ─────────────────────────────────────────────────────────────
    let prices = load_price_csv(&cli.prices)?;
    let identifier = cli.ticker.clone().unwrap_or_else(|| {
        cli.prices
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "series".to_string())
    });

    // ── Analysis ─────────────────────────────────────────────────────────
    let request = AnalysisRequest {
        identifier,
        prices,
        spec: VolatilityModelSpec::new(cfg.model, cfg.distribution),
        horizon: cfg.forecast_horizon,
        compare: cli.compare,
    };
    let session = AnalysisSession::run(request, &cfg, &FitOptions::from(&cfg))
        .context("volatility analysis failed")?;

    println!("{}", text_report(&session));

    // ── Export ───────────────────────────────────────────────────────────
    let written = export_session(&session, &cli.out_dir)?;
    if cli.json {
        write_json(&session, &cli.out_dir)?;
    }
    info!("Done. {} CSV files in {}", written.len(), cli.out_dir.display());
    Ok(())
}
