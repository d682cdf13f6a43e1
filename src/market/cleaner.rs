use crate::models::{RawTicker, Ticker};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::warn;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a CoinLore number: plain or scientific, with stray `$ , %` removed.
/// "64,250.12" → 64250.12 | "1.2e-5" → 0.000012 | "-0.53%" → -0.53
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%') && !c.is_whitespace())
        .collect();

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// ── Raw ticker → Ticker ───────────────────────────────────────────────────────

/// Rows without id, symbol or a readable price are dropped.
/// Unreadable percent changes count as 0.
pub fn raw_to_ticker(row: &RawTicker) -> Option<Ticker> {
    let id = non_empty(row.id.as_deref())?;
    let symbol = non_empty(row.symbol.as_deref())?;

    let Some(price_usd) = row.price_usd.as_deref().and_then(parse_decimal) else {
        warn!("{} ({}): unreadable price {:?}", symbol, id, row.price_usd);
        return None;
    };

    let pct = |v: &Option<String>| v.as_deref().and_then(parse_decimal).unwrap_or(Decimal::ZERO);

    Some(Ticker {
        id: id.to_string(),
        symbol: normalise_symbol(symbol),
        name: row.name.as_deref().unwrap_or_default().trim().to_string(),
        price_usd,
        change_percent_24h: pct(&row.percent_change_24h),
        change_percent_7d: pct(&row.percent_change_7d),
    })
}

pub fn clean_tickers(rows: &[RawTicker]) -> Vec<Ticker> {
    rows.iter().filter_map(raw_to_ticker).collect()
}

/// Record ids for still-needed symbols found in one listing page.
/// A symbol is resolved by the first row that carries it.
pub fn resolve_ids(
    rows: &[RawTicker],
    needed: &mut HashSet<String>,
    resolved: &mut HashMap<String, String>,
) -> usize {
    let mut found = 0;
    for row in rows {
        let (Some(symbol), Some(id)) = (non_empty(row.symbol.as_deref()), non_empty(row.id.as_deref()))
        else {
            continue;
        };
        let key = normalise_symbol(symbol);
        if needed.remove(&key) {
            resolved.insert(key, id.to_string());
            found += 1;
        }
    }
    found
}

// ── Tests ─────────────────────────────────────────────────────────────────────
