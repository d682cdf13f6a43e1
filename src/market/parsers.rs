use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

pub const NO_PREDICTION: &str = "No price prediction element found on this site!";
const EMPTY_PREDICTION: &str = "No prediction found.";

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Element text with whitespace runs collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Coin page ─────────────────────────────────────────────────────────────────

/// The "about" card of a coin page, which carries the day's commentary.
pub fn extract_analysis(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Some(sel) = selector("div.coin_page_about") else { return String::new() };

    doc.select(&sel)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// Cells of the monthly returns row whose first cell is `year`, e.g.
/// `["2025", "9.5%", "-17.6%", ...]`. Empty when the table or row is missing.
pub fn extract_monthly_returns(html: &str, year: i32) -> Vec<String> {
    let doc = Html::parse_document(html);
    let (Some(table_sel), Some(tr_sel), Some(cell_sel)) = (
        selector("table#monthly-historical-stats"),
        selector("tr"),
        selector("td, th"),
    ) else {
        return vec![];
    };

    let Some(table) = doc.select(&table_sel).next() else {
        debug!("No monthly returns table on page");
        return vec![];
    };

    let year = year.to_string();
    for tr in table.select(&tr_sel) {
        let cells: Vec<String> = tr.select(&cell_sel).map(element_text).collect();
        if cells.first() == Some(&year) {
            return cells.into_iter().filter(|c| !c.is_empty()).collect();
        }
    }

    warn!("No {} row in monthly returns table", year);
    vec![]
}

// ── Forecast page ─────────────────────────────────────────────────────────────

/// First element inside `div#price` on the price-prediction page.
pub fn extract_price_prediction(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Some(sel) = selector("div#price") else { return NO_PREDICTION.to_string() };

    let Some(parent) = doc.select(&sel).next() else {
        return NO_PREDICTION.to_string();
    };

    let text = parent
        .children()
        .filter_map(ElementRef::wrap)
        .map(element_text)
        .find(|t| !t.is_empty())
        .unwrap_or_else(|| element_text(parent));

    if text.is_empty() {
        EMPTY_PREDICTION.to_string()
    } else {
        text
    }
}
