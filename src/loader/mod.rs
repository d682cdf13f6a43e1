//! Upload loader for portfolio files.
//!
//! One holding per line, `|`-separated: `amount|symbol[|purchasePrice]`.
//! Blank lines and `#` comments are ignored.

use crate::models::Holding;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

const DELIMITER: char = '|';

/// Largest accepted amount and purchase price. Keeps amount × price well
/// inside the `Decimal` range.
const MAX_AMOUNT: i64 = 1_000_000_000_000_000;
const MAX_PURCHASE_PRICE: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected `amount|symbol[|purchasePrice]`, got {fields} field(s) in {line:?}")]
    TooFewFields { line: String, fields: usize },

    #[error("amount {value:?} is not a decimal number in {line:?}")]
    InvalidAmount { line: String, value: String },

    #[error("amount {value:?} is negative in {line:?}")]
    NegativeAmount { line: String, value: String },

    #[error("amount {value:?} exceeds {max} in {line:?}")]
    AmountTooLarge { line: String, value: String, max: i64 },

    #[error("symbol is empty in {line:?}")]
    EmptySymbol { line: String },

    #[error("purchase price {value:?} is not a decimal number in {line:?}")]
    InvalidPurchasePrice { line: String, value: String },

    #[error("purchase price {value:?} is negative in {line:?}")]
    NegativePurchasePrice { line: String, value: String },

    #[error("purchase price {value:?} exceeds {max} in {line:?}")]
    PurchasePriceTooLarge { line: String, value: String, max: i64 },
}

/// Field of the upload line an error points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Line,
    Amount,
    Symbol,
    PurchasePrice,
}

impl ParseError {
    pub fn field(&self) -> Field {
        match self {
            ParseError::TooFewFields { .. } => Field::Line,
            ParseError::InvalidAmount { .. }
            | ParseError::NegativeAmount { .. }
            | ParseError::AmountTooLarge { .. } => Field::Amount,
            ParseError::EmptySymbol { .. } => Field::Symbol,
            ParseError::InvalidPurchasePrice { .. }
            | ParseError::NegativePurchasePrice { .. }
            | ParseError::PurchasePriceTooLarge { .. } => Field::PurchasePrice,
        }
    }
}

/// A rejected line of an upload document.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line_no}: {error}")]
pub struct LineError {
    /// 1-based
    pub line_no: usize,
    pub line: String,
    #[source]
    pub error: ParseError,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedUpload {
    pub holdings: Vec<Holding>,
    pub rejected: Vec<LineError>,
}

impl ParsedUpload {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

// ── Line parser ───────────────────────────────────────────────────────────────

/// Parse a single upload line into a [`Holding`].
/// "1.5|BTC|50000" → BTC 1.5 @ 50000 | "2.5|ETH" → ETH 2.5 @ 0
pub fn parse_line(line: &str) -> Result<Holding, ParseError> {
    let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
    if fields.len() < 2 {
        return Err(ParseError::TooFewFields {
            line: line.to_string(),
            fields: fields.len(),
        });
    }

    let raw_amount = fields[0];
    let amount = parse_decimal(raw_amount).ok_or_else(|| ParseError::InvalidAmount {
        line: line.to_string(),
        value: raw_amount.to_string(),
    })?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ParseError::NegativeAmount {
            line: line.to_string(),
            value: raw_amount.to_string(),
        });
    }
    if amount > Decimal::from(MAX_AMOUNT) {
        return Err(ParseError::AmountTooLarge {
            line: line.to_string(),
            value: raw_amount.to_string(),
            max: MAX_AMOUNT,
        });
    }

    let symbol = fields[1];
    if symbol.is_empty() {
        return Err(ParseError::EmptySymbol { line: line.to_string() });
    }

    let purchase_price_usd = match fields.get(2).copied() {
        None | Some("") => Decimal::ZERO,
        Some(raw) => {
            let price = parse_decimal(raw).ok_or_else(|| ParseError::InvalidPurchasePrice {
                line: line.to_string(),
                value: raw.to_string(),
            })?;
            if price.is_sign_negative() && !price.is_zero() {
                return Err(ParseError::NegativePurchasePrice {
                    line: line.to_string(),
                    value: raw.to_string(),
                });
            }
            if price > Decimal::from(MAX_PURCHASE_PRICE) {
                return Err(ParseError::PurchasePriceTooLarge {
                    line: line.to_string(),
                    value: raw.to_string(),
                    max: MAX_PURCHASE_PRICE,
                });
            }
            price
        }
    };

    Ok(Holding {
        symbol: symbol.to_string(),
        amount: amount.normalize(),
        purchase_price_usd: purchase_price_usd.normalize(),
    })
}

/// Plain decimal notation only; `Decimal::from_str` also takes `1_000`.
fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() || s.contains('_') {
        return None;
    }
    Decimal::from_str(s).ok()
}

// ── Documents ─────────────────────────────────────────────────────────────────

/// Parse a whole upload. Bad lines are collected, not fatal.
pub fn parse_document(text: &str) -> ParsedUpload {
    let mut parsed = ParsedUpload::default();

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Ok(holding) => parsed.holdings.push(holding),
            Err(error) => {
                let err = LineError {
                    line_no: i + 1,
                    line: line.to_string(),
                    error,
                };
                debug!("Rejected {}", err);
                parsed.rejected.push(err);
            }
        }
    }

    parsed
}

pub fn load_file(path: &Path) -> Result<ParsedUpload> {
    debug!("Loading portfolio from {:?}", path);

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read portfolio file {:?}", path))?;
    let parsed = parse_document(&text);

    info!(
        "{:?}: {} holdings parsed, {} lines rejected",
        path.file_name().unwrap_or(path.as_os_str()),
        parsed.holdings.len(),
        parsed.rejected.len()
    );
    Ok(parsed)
}
