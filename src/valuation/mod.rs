//! Portfolio valuation: holdings × live tickers → line items and totals.
//!
//! Pure and synchronous. A holding without a ticker is left out of the lines
//! (its symbol is reported in `unmatched`), and a zero cost basis yields a
//! 0% change instead of a division error. Arithmetic is checked: a holding
//! whose value does not fit a `Decimal` is reported in `out_of_range`.

use crate::models::{Holding, PortfolioResult, Ticker, ValuationLine};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

pub fn calculate(holdings: &[Holding], tickers: &[Ticker]) -> PortfolioResult {
    // First ticker per symbol wins.
    let mut by_symbol: HashMap<String, &Ticker> = HashMap::with_capacity(tickers.len());
    for t in tickers {
        by_symbol.entry(t.symbol.trim().to_uppercase()).or_insert(t);
    }

    let mut result = PortfolioResult::default();
    let mut total_buy = Decimal::ZERO;
    let mut total_current = Decimal::ZERO;

    for holding in holdings {
        let symbol = holding.lookup_key();
        let Some(ticker) = by_symbol.get(&symbol) else {
            warn!("{}: no ticker available, left out of valuation", symbol);
            result.unmatched.push(symbol);
            continue;
        };

        let totals = value_line(symbol.clone(), holding, ticker).and_then(|line| {
            let buy = total_buy.checked_add(line.amount.checked_mul(line.buy_price_usd)?)?;
            let current = total_current.checked_add(line.value_usd)?;
            percent_change(buy, current)?;
            Some((line, buy, current))
        });
        let Some((line, buy, current)) = totals else {
            warn!("{}: value exceeds the decimal range, left out of valuation", symbol);
            result.out_of_range.push(symbol);
            continue;
        };
        debug!("{}: {} × {} = {}", line.symbol, line.amount, line.current_price_usd, line.value_usd);

        total_buy = buy;
        total_current = current;
        result.lines.push(line);
    }

    result.total_value_usd = total_current;
    result.total_change_percent = percent_change(total_buy, total_current).unwrap_or_default();
    result
}

fn value_line(symbol: String, holding: &Holding, ticker: &Ticker) -> Option<ValuationLine> {
    let price = ticker.price_usd;
    let buy = holding.purchase_price_usd;

    Some(ValuationLine {
        symbol,
        id: ticker.id.clone(),
        name: ticker.name.clone(),
        amount: holding.amount,
        current_price_usd: price,
        buy_price_usd: buy,
        value_usd: holding.amount.checked_mul(price)?,
        change_percent_24h: ticker.change_percent_24h,
        change_percent_7d: ticker.change_percent_7d,
        change_percent_total: percent_change(buy, price)?,
    })
}

/// (current − base) / base × 100, or 0 when base is not positive.
/// `None` when the result does not fit a `Decimal`.
pub fn percent_change(base: Decimal, current: Decimal) -> Option<Decimal> {
    if base <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    let diff = current.checked_sub(base)?;
    diff.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|d| d.checked_div(base))
        .or_else(|| diff.checked_div(base)?.checked_mul(Decimal::ONE_HUNDRED))
        .map(|p| p.normalize())
}
