/// export.rs — Tabular and text output of an analysis session
///
/// Frames:
///   historical   Date, Price, Log_Returns, Conditional_Volatility
///   forecast     Forecast_Day, Forecasted_Volatility, Forecasted_Variance
///   comparison   Model, Distribution, AIC, BIC, LogLik  ("Failed" cells)
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::info;

use crate::forecast::ForecastResult;
use crate::selection::{rank_by_aic, CellOutcome, ComparisonRow};
use crate::session::AnalysisSession;

const FAILED: &str = "Failed";

pub fn historical_frame(session: &AnalysisSession) -> Result<DataFrame> {
    let series = &session.series;
    let df = df!(
        "Date" => series.timestamps().iter()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .collect::<Vec<_>>(),
        "Price" => series.prices().to_vec(),
        "Log_Returns" => series.returns().to_vec(),
        "Conditional_Volatility" => session.model.conditional_volatility(),
    )?;
    Ok(df)
}

pub fn forecast_frame(forecast: &ForecastResult) -> Result<DataFrame> {
    let df = df!(
        "Forecast_Day" => (1..=forecast.horizon as u32).collect::<Vec<_>>(),
        "Forecasted_Volatility" => forecast.volatility.clone(),
        "Forecasted_Variance" => forecast.variance.clone(),
    )?;
    Ok(df)
}

pub fn comparison_frame(rows: &[ComparisonRow]) -> Result<DataFrame> {
    let cell = |row: &ComparisonRow, pick: fn(f64, f64, f64) -> f64| match row.outcome {
        CellOutcome::Fitted { aic, bic, log_likelihood, .. } => {
            format!("{:.4}", pick(aic, bic, log_likelihood))
        }
        CellOutcome::Failed(_) => FAILED.to_string(),
    };
    let df = df!(
        "Model" => rows.iter().map(|r| r.model.label().to_string()).collect::<Vec<_>>(),
        "Distribution" => rows.iter().map(|r| r.distribution.label().to_string()).collect::<Vec<_>>(),
        "AIC" => rows.iter().map(|r| cell(r, |a, _, _| a)).collect::<Vec<_>>(),
        "BIC" => rows.iter().map(|r| cell(r, |_, b, _| b)).collect::<Vec<_>>(),
        "LogLik" => rows.iter().map(|r| cell(r, |_, _, l| l)).collect::<Vec<_>>(),
    )?;
    Ok(df)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("CSV exported to: {}", path.display());
    Ok(())
}

/// Write every frame of the session into `dir`; returns the paths written.
pub fn export_session(session: &AnalysisSession, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stem = sanitize(&session.identifier);
    let mut written = Vec::new();

    let path = dir.join(format!("{stem}_garch_results.csv"));
    write_csv(&mut historical_frame(session)?, &path)?;
    written.push(path);

    let path = dir.join(format!("{stem}_volatility_forecast.csv"));
    write_csv(&mut forecast_frame(&session.forecast)?, &path)?;
    written.push(path);

    if let Some(rows) = &session.comparison {
        let path = dir.join(format!("{stem}_model_comparison.csv"));
        write_csv(&mut comparison_frame(rows)?, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Serialise the whole session as pretty JSON into `dir`.
pub fn write_json(session: &AnalysisSession, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}_session.json", sanitize(&session.identifier)));
    let json = serde_json::to_string_pretty(session)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    info!("JSON report exported to: {}", path.display());
    Ok(path)
}

fn sanitize(identifier: &str) -> String {
    let s: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if s.is_empty() { "series".to_string() } else { s }
}

/// Human-readable summary in the style of the console report.
pub fn text_report(session: &AnalysisSession) -> String {
    let mut out = String::new();
    let spec = session.model.spec();
    let _ = writeln!(out, "════════════════════════════════════════════");
    let _ = writeln!(out, "  {} VOLATILITY MODEL REPORT", spec.model.label());
    let _ = writeln!(out, "════════════════════════════════════════════");
    let _ = writeln!(out, "  Identifier     : {}", session.identifier);
    let _ = writeln!(out, "  Model          : {}", spec);
    let _ = writeln!(out, "  Distribution   : {}", spec.distribution.label());
    if let Some((first, last)) = session.series.period() {
        let _ = writeln!(
            out,
            "  Sample period  : {} to {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        );
    }
    let _ = writeln!(out, "  Observations   : {}", session.model.n_obs());

    if let Some(stats) = &session.statistics {
        let _ = writeln!(out, "────────────────────────────────────────────");
        let _ = writeln!(out, "  Mean return    : {:.6}", stats.mean);
        let _ = writeln!(out, "  Std deviation  : {:.6}", stats.std);
        let _ = writeln!(out, "  Skewness       : {:.4}", stats.skewness);
        let _ = writeln!(out, "  Excess kurt.   : {:.4}", stats.kurtosis);
        let _ = writeln!(
            out,
            "  Jarque-Bera    : {:.4} (p={:.4})",
            stats.jarque_bera, stats.jarque_bera_p
        );
        let _ = writeln!(out, "  Annual vol     : {:.2}%", stats.annual_std * 100.0);
    }

    let _ = writeln!(out, "────────────────────────────────────────────");
    for (name, value) in session.model.params().named() {
        let _ = writeln!(out, "  {:<15}: {:.6e}", name, value);
    }
    let _ = writeln!(out, "  Log-likelihood : {:.4}", session.model.log_likelihood());
    let _ = writeln!(out, "  AIC            : {:.4}", session.model.aic());
    let _ = writeln!(out, "  BIC            : {:.4}", session.model.bic());
    if let Some(longrun) = session.model.unconditional_variance() {
        let _ = writeln!(out, "  Long-run vol   : {:.6}", longrun.sqrt());
    }

    let _ = writeln!(out, "────────────────────────────────────────────");
    let _ = writeln!(out, "{}", session.diagnostics);

    let _ = writeln!(out, "────────────────────────────────────────────");
    let _ = writeln!(out, "  Forecast ({:?})", session.forecast.method);
    for (day, (vol, annual)) in session
        .forecast
        .volatility
        .iter()
        .zip(session.annualised_forecast())
        .enumerate()
    {
        let _ = writeln!(out, "  Day {:>2}         : {:.6}  ({:.2}% annual)", day + 1, vol, annual * 100.0);
    }

    if let Some(rows) = &session.comparison {
        let _ = writeln!(out, "────────────────────────────────────────────");
        let _ = writeln!(out, "  Model comparison (by AIC)");
        for row in rank_by_aic(rows) {
            match &row.outcome {
                CellOutcome::Fitted { aic, bic, .. } => {
                    let _ = writeln!(
                        out,
                        "  {:<10} {:<18} AIC={:.4}  BIC={:.4}",
                        row.model.label(),
                        row.distribution.label(),
                        aic,
                        bic
                    );
                }
                CellOutcome::Failed(reason) => {
                    let _ = writeln!(
                        out,
                        "  {:<10} {:<18} {FAILED}: {reason}",
                        row.model.label(),
                        row.distribution.label()
                    );
                }
            }
        }
    }
    let _ = write!(out, "════════════════════════════════════════════");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastMethod;
    use crate::models::{Distribution, VolModel};

    #[test]
    fn forecast_columns() {
        let f = ForecastResult {
            horizon: 3,
            variance: vec![1e-4, 1.1e-4, 1.2e-4],
            volatility: vec![0.01, 1.1e-4f64.sqrt(), 1.2e-4f64.sqrt()],
            method: ForecastMethod::Analytic,
        };
        let df = forecast_frame(&f).unwrap();
        assert_eq!(
            df.get_column_names_str(),
            vec!["Forecast_Day", "Forecasted_Volatility", "Forecasted_Variance"]
        );
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn comparison_marks_failed_cells() {
        let rows = vec![
            ComparisonRow {
                model: VolModel::Standard,
                distribution: Distribution::Normal,
                outcome: CellOutcome::Fitted { aic: -10.0, bic: -8.0, log_likelihood: 8.0, k: 3 },
            },
            ComparisonRow {
                model: VolModel::Exponential,
                distribution: Distribution::StudentT,
                outcome: CellOutcome::Failed("boom".into()),
            },
        ];
        let df = comparison_frame(&rows).unwrap();
        assert_eq!(
            df.get_column_names_str(),
            vec!["Model", "Distribution", "AIC", "BIC", "LogLik"]
        );
        let aic = df.column("AIC").unwrap().str().unwrap();
        assert_eq!(aic.get(0), Some("-10.0000"));
        assert_eq!(aic.get(1), Some(FAILED));
    }

    #[test]
    fn identifiers_become_file_stems() {
        assert_eq!(sanitize("^GSPC"), "_GSPC");
        assert_eq!(sanitize("BRK.B"), "BRK_B");
        assert_eq!(sanitize(""), "series");
    }
}
