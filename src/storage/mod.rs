use crate::models::{Holding, PortfolioResult, ValuationRun};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use duckdb::{Connection, params};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

// Decimals are stored as canonical text so they round-trip exactly.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS holdings (
    position            BIGINT    NOT NULL,
    symbol              VARCHAR   NOT NULL,
    amount              VARCHAR   NOT NULL,
    purchase_price_usd  VARCHAR   NOT NULL,
    uploaded_at         TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS valuation_run_seq START 1;

CREATE TABLE IF NOT EXISTS valuation_runs (
    id                    BIGINT PRIMARY KEY DEFAULT nextval('valuation_run_seq'),
    kind                  VARCHAR NOT NULL,
    started_at            TIMESTAMP NOT NULL,
    finished_at           TIMESTAMP,
    status                VARCHAR NOT NULL DEFAULT 'running',
    holdings              BIGINT DEFAULT 0,
    lines                 BIGINT DEFAULT 0,
    total_value_usd       VARCHAR,
    total_change_percent  VARCHAR,
    error_msg             VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_holdings_position ON holdings (position);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        debug!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        debug!("Migrations done.");
        Ok(())
    }

    // ── Holdings ──────────────────────────────────────────────────────────────

    /// Replace the stored portfolio with `holdings`, keeping their order.
    pub fn save_holdings(&self, holdings: &[Holding]) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM holdings", [])?;
        for (position, h) in holdings.iter().enumerate() {
            tx.execute(
                r#"INSERT INTO holdings (position, symbol, amount, purchase_price_usd, uploaded_at)
                   VALUES (?, ?, ?, ?, ?)"#,
                params![
                    position as i64,
                    h.symbol,
                    h.amount.to_string(),
                    h.purchase_price_usd.to_string(),
                    now,
                ],
            ).with_context(|| format!("insert holding {}", h.symbol))?;
        }

        tx.commit()?;
        info!("Stored {} holdings", holdings.len());
        Ok(holdings.len())
    }

    /// Stored holdings in upload order; empty when nothing was uploaded yet.
    pub fn load_holdings(&self) -> Result<Vec<Holding>> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, amount, purchase_price_usd FROM holdings ORDER BY position",
        )?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(symbol, amount, price)| -> Result<Holding> {
                Ok(Holding {
                    amount: decode_decimal(&amount)
                        .with_context(|| format!("stored amount for {}", symbol))?,
                    purchase_price_usd: decode_decimal(&price)
                        .with_context(|| format!("stored purchase price for {}", symbol))?,
                    symbol,
                })
            })
            .collect()
    }

    pub fn holding_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM holdings")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Valuation run log ─────────────────────────────────────────────────────

    pub fn begin_valuation_run(&self, kind: &str, holdings: usize) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            r#"INSERT INTO valuation_runs (kind, started_at, status, holdings)
               VALUES (?, ?, 'running', ?)
               RETURNING id"#,
            params![kind, Utc::now().naive_utc(), holdings as i64],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_valuation_run(
        &self, run_id: i64, result: Option<&PortfolioResult>, error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE valuation_runs SET
               finished_at = ?, status = ?, lines = ?,
               total_value_usd = ?, total_change_percent = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                result.map(|r| r.lines.len() as i64).unwrap_or(0),
                result.map(|r| r.total_value_usd.to_string()),
                result.map(|r| r.total_change_percent.to_string()),
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ValuationRun>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, kind, started_at, finished_at, status, holdings, lines,
                      total_value_usd, total_change_percent, error_msg
               FROM valuation_runs ORDER BY id DESC LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(ValuationRun {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    started_at: r.get(2)?,
                    finished_at: r.get(3)?,
                    status: r.get(4)?,
                    holdings: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    lines: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
                    total_value_usd: r.get(7)?,
                    total_change_percent: r.get(8)?,
                    error_msg: r.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

fn decode_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| anyhow!("invalid decimal {:?}: {}", s, e))
}
