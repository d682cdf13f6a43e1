use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ── Holding ───────────────────────────────────────────────────────────────────

/// One recorded position: amount held and the USD cost basis per unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub amount: Decimal,
    pub purchase_price_usd: Decimal,
}

impl Holding {
    /// Uppercased symbol used when matching against tickers.
    pub fn lookup_key(&self) -> String {
        self.symbol.trim().to_uppercase()
    }
}

// ── Ticker ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub price_usd: Decimal,
    pub change_percent_24h: Decimal,
    pub change_percent_7d: Decimal,
}

// ── Valuation output ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationLine {
    pub symbol: String,
    pub id: String,
    pub name: String,
    pub amount: Decimal,
    pub current_price_usd: Decimal,
    pub buy_price_usd: Decimal,
    pub value_usd: Decimal,
    pub change_percent_24h: Decimal,
    pub change_percent_7d: Decimal,
    pub change_percent_total: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioResult {
    pub lines: Vec<ValuationLine>,
    pub total_value_usd: Decimal,
    pub total_change_percent: Decimal,
    /// Holding symbols that had no ticker and were left out of `lines`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched: Vec<String>,
    /// Holding symbols whose value or change does not fit a `Decimal`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_of_range: Vec<String>,
}

impl PortfolioResult {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ── Sentiment ─────────────────────────────────────────────────────────────────

/// Text scraped from the coin pages, fed to the sentiment classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoinInsight {
    pub today_analysis: String,
    pub prediction: String,
    pub monthly_returns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub coin: String,
    pub sentiment: Sentiment,
    pub insight: CoinInsight,
}

// ── Valuation run log ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ValuationRun {
    pub id: i64,
    pub kind: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub holdings: i64,
    pub lines: i64,
    pub total_value_usd: Option<String>,
    pub total_change_percent: Option<String>,
    pub error_msg: Option<String>,
}

// ── Raw CoinLore rows ─────────────────────────────────────────────────────────

/// CoinLore ticker as served by `/tickers/` and `/ticker/?id=`.
/// Numbers arrive as strings most of the time, occasionally as JSON numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTicker {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price_usd: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub percent_change_24h: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub percent_change_7d: Option<String>,
}

/// Envelope of the paginated `/tickers/` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickersPage {
    #[serde(default)]
    pub data: Vec<RawTicker>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(Option::<Loose>::deserialize(deserializer)?.map(|v| match v {
        Loose::Str(s) => s,
        Loose::Num(n) => n.to_string(),
    }))
}
