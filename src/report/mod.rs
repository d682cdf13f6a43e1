//! Terminal rendering and CSV export of valuation results.

use crate::models::{Analysis, Holding, PortfolioResult, ValuationRun};
use crate::utils::{fmt_amount, fmt_change, fmt_usd};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

const RULE: &str = "────────────────────────────────────────────────────────────────────────────────";

pub fn render_portfolio(result: &PortfolioResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "  {:<8} {:<18} {:>14} {:>14} {:>16} {:>9} {:>9} {:>10}",
        "Symbol", "Name", "Amount", "Price", "Value", "24h", "7d", "Total"
    );
    let _ = writeln!(out, "{}", RULE);

    if result.is_empty() {
        let _ = writeln!(out, "  No holding could be valued.");
    }
    for l in &result.lines {
        let _ = writeln!(
            out,
            "  {:<8} {:<18} {:>14} {:>14} {:>16} {:>9} {:>9} {:>10}",
            l.symbol,
            truncate(&l.name, 18),
            fmt_amount(l.amount),
            fmt_usd(l.current_price_usd),
            fmt_usd(l.value_usd),
            fmt_change(l.change_percent_24h),
            fmt_change(l.change_percent_7d),
            fmt_change(l.change_percent_total),
        );
    }

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Total value : {}", fmt_usd(result.total_value_usd));
    let _ = writeln!(out, "  Total change: {}", fmt_change(result.total_change_percent));
    if !result.unmatched.is_empty() {
        let _ = writeln!(out, "  No market data for: {}", result.unmatched.join(", "));
    }
    if !result.out_of_range.is_empty() {
        let _ = writeln!(out, "  Value out of range for: {}", result.out_of_range.join(", "));
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

pub fn render_holdings(holdings: &[Holding]) -> String {
    if holdings.is_empty() {
        return "No holdings stored, run `coinfolio upload <FILE>` first.\n".to_string();
    }
    let mut out = format!("{} holdings:\n", holdings.len());
    for h in holdings {
        let _ = writeln!(
            out,
            "  {:<8} {:>16} @ {}",
            h.symbol,
            fmt_amount(h.amount),
            fmt_usd(h.purchase_price_usd)
        );
    }
    out
}

pub fn render_runs(runs: &[ValuationRun]) -> String {
    if runs.is_empty() {
        return "No valuation runs yet.\n".to_string();
    }
    let mut out = String::new();
    for r in runs {
        let _ = writeln!(
            out,
            "  #{:<4} {:<8} {}  {:<8} {:>3}/{:<3} {}",
            r.id,
            r.kind,
            r.started_at.format("%Y-%m-%d %H:%M:%S"),
            r.status,
            r.lines,
            r.holdings,
            match (&r.total_value_usd, &r.error_msg) {
                (_, Some(err)) => err.clone(),
                (Some(total), None) => format!("total {}", total),
                (None, None) => String::new(),
            }
        );
    }
    out
}

pub fn render_analysis(analysis: &Analysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  {} sentiment: {}", analysis.coin, analysis.sentiment);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Prediction     : {}", analysis.insight.prediction);
    let _ = writeln!(out, "  Monthly returns: {}", analysis.insight.monthly_returns.join(" "));
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max - 1).collect();
        t.push('…');
        t
    }
}

// ── CSV export ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CsvLine<'a> {
    symbol: &'a str,
    id: &'a str,
    name: &'a str,
    amount: String,
    current_price_usd: String,
    buy_price_usd: String,
    value_usd: String,
    change_percent_24h: String,
    change_percent_7d: String,
    change_percent_total: String,
}

pub fn write_csv<W: std::io::Write>(result: &PortfolioResult, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for l in &result.lines {
        wtr.serialize(CsvLine {
            symbol: &l.symbol,
            id: &l.id,
            name: &l.name,
            amount: l.amount.to_string(),
            current_price_usd: l.current_price_usd.to_string(),
            buy_price_usd: l.buy_price_usd.to_string(),
            value_usd: l.value_usd.to_string(),
            change_percent_24h: l.change_percent_24h.to_string(),
            change_percent_7d: l.change_percent_7d.to_string(),
            change_percent_total: l.change_percent_total.to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_csv(result: &PortfolioResult, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Could not create {:?}", path))?;
    write_csv(result, file).with_context(|| format!("CSV export to {:?} failed", path))?;
    info!("Exported {} lines to {:?}", result.lines.len(), path);
    Ok(())
}
