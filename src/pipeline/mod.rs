//! Portfolio service: ties market data → valuation → storage together.
//!
//! ## Commands
//!
//! `upload()`: value a freshly parsed portfolio and, when it prices, store
//!   the holdings that valued as the current portfolio.
//! `refresh()`: load the stored portfolio and value it against live tickers.
//! `analyse()`: scrape a coin's pages and classify the sentiment.
//!
//! Every valuation is logged in the `valuation_runs` table. Nothing is kept
//! in memory between commands; the stored holdings are the only state.

use crate::config::AppConfig;
use crate::market::{CoinLoreClient, MarketDataSource};
use crate::models::{Analysis, Holding, PortfolioResult, ValuationRun};
use crate::sentiment::{OpenAiClassifier, SentimentClassifier, SentimentError};
use crate::storage::Repository;
use crate::valuation;
use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

pub struct PortfolioService {
    repo: Repository,
    market: Box<dyn MarketDataSource>,
    sentiment: Option<Box<dyn SentimentClassifier>>,
}

impl PortfolioService {
    pub fn new(
        repo: Repository,
        market: Box<dyn MarketDataSource>,
        sentiment: Option<Box<dyn SentimentClassifier>>,
    ) -> Self {
        Self { repo, market, sentiment }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let repo = Repository::open(&config.storage.db_path)
            .context("Failed to open DuckDB")?;
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let market = CoinLoreClient::new(&config.market)
            .context("Failed to build market data client")?;

        let sentiment: Option<Box<dyn SentimentClassifier>> =
            match OpenAiClassifier::new(&config.sentiment) {
                Ok(c) => Some(Box::new(c)),
                Err(SentimentError::MissingApiKey) => {
                    debug!("No sentiment API key, `analyse` disabled");
                    None
                }
                Err(e) => return Err(e).context("Failed to build sentiment classifier"),
            };

        Ok(Self::new(repo, Box::new(market), sentiment))
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    pub async fn upload(&self, holdings: Vec<Holding>) -> Result<PortfolioResult> {
        if holdings.is_empty() {
            bail!("Upload contains no holdings");
        }
        info!("=== Valuing uploaded portfolio ({} holdings) ===", holdings.len());

        let result = self.value("upload", &holdings).await?;
        if result.is_empty() {
            bail!("None of the {} uploaded holdings could be valued", holdings.len());
        }

        let priced: Vec<Holding> = holdings
            .iter()
            .filter(|h| result.lines.iter().any(|l| l.symbol == h.lookup_key()))
            .map(|h| Holding { symbol: h.lookup_key(), ..h.clone() })
            .collect();
        self.repo.save_holdings(&priced)?;

        Ok(result)
    }

    pub async fn refresh(&self) -> Result<PortfolioResult> {
        let holdings = self.repo.load_holdings()?;
        if holdings.is_empty() {
            bail!("No portfolio stored, run `coinfolio upload <FILE>` first");
        }
        info!("=== Refreshing portfolio ({} holdings) ===", holdings.len());

        self.value("refresh", &holdings).await
    }

    pub async fn analyse(&self, coin: &str) -> Result<Analysis> {
        let classifier = self.sentiment.as_deref().ok_or(SentimentError::MissingApiKey)?;
        let coin = coin.trim().to_lowercase();
        info!("=== Sentiment for {} ===", coin);

        let insight = self.market.fetch_coin_insight(&coin).await
            .with_context(|| format!("Could not gather data for {}", coin))?;
        if insight.today_analysis.is_empty() {
            warn!("{}: no analysis text found on coin page", coin);
        }

        let sentiment = classifier
            .classify(
                &coin,
                &insight.today_analysis,
                &insight.monthly_returns.join(","),
                &insight.prediction,
            )
            .await
            .with_context(|| format!("Sentiment classification failed for {}", coin))?;

        Ok(Analysis { coin, sentiment, insight })
    }

    pub fn holdings(&self) -> Result<Vec<Holding>> {
        self.repo.load_holdings()
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ValuationRun>> {
        self.repo.recent_runs(limit)
    }

    // ── Valuation ─────────────────────────────────────────────────────────────

    async fn value(&self, kind: &str, holdings: &[Holding]) -> Result<PortfolioResult> {
        let run_id = match self.repo.begin_valuation_run(kind, holdings.len()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not log {} run: {:#}", kind, e);
                None
            }
        };

        let outcome = self.price(holdings).await;

        if let Some(run_id) = run_id {
            let logged = match &outcome {
                Ok(result) => self.repo.finish_valuation_run(run_id, Some(result), None),
                Err(e) => self.repo.finish_valuation_run(run_id, None, Some(&format!("{:#}", e))),
            };
            if let Err(e) = logged {
                warn!("Could not log valuation run {}: {:#}", run_id, e);
            }
        }

        let result = outcome?;
        info!(
            "=== Done: {} of {} holdings valued | total ${} | change {}% ===",
            result.lines.len(), holdings.len(),
            result.total_value_usd.round_dp(2), result.total_change_percent.round_dp(2),
        );
        Ok(result)
    }

    async fn price(&self, holdings: &[Holding]) -> Result<PortfolioResult> {
        let mut symbols: Vec<String> = Vec::with_capacity(holdings.len());
        for h in holdings {
            let key = h.lookup_key();
            if !symbols.contains(&key) {
                symbols.push(key);
            }
        }

        let map = self.market.map_symbols_to_ids(&symbols).await
            .context("Symbol lookup failed")?;

        let mut ids: Vec<String> = Vec::with_capacity(map.len());
        for id in symbols.iter().filter_map(|s| map.get(s)) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        debug!("{} symbols → {} ids", symbols.len(), ids.len());

        if ids.is_empty() {
            bail!("None of the {} symbols is listed by the market data provider", symbols.len());
        }

        let tickers = self.market.get_tickers(&ids).await
            .context("Ticker fetch failed")?;
        if tickers.is_empty() {
            bail!("No tickers available for {} ids", ids.len());
        }

        Ok(valuation::calculate(holdings, &tickers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoinInsight, Sentiment, Ticker};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeMarket {
        tickers: Vec<Ticker>,
        /// Extra symbol → id entries served by the lookup.
        aliases: HashMap<String, String>,
        requested_ids: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MarketDataSource for FakeMarket {
        async fn map_symbols_to_ids(&self, symbols: &[String]) -> Result<HashMap<String, String>> {
            Ok(self
                .tickers
                .iter()
                .map(|t| (&t.symbol, &t.id))
                .chain(self.aliases.iter())
                .filter(|(symbol, _)| symbols.contains(symbol))
                .map(|(symbol, id)| (symbol.clone(), id.clone()))
                .collect())
        }

        async fn get_tickers(&self, ids: &[String]) -> Result<Vec<Ticker>> {
            self.requested_ids.lock().unwrap().extend(ids.iter().cloned());
            Ok(self.tickers.iter().filter(|t| ids.contains(&t.id)).cloned().collect())
        }

        async fn fetch_coin_insight(&self, coin: &str) -> Result<CoinInsight> {
            Ok(CoinInsight {
                today_analysis: format!("{} looks strong", coin),
                prediction: "up".into(),
                monthly_returns: vec!["2025".into(), "9.5%".into()],
            })
        }
    }

    struct FakeClassifier {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SentimentClassifier for FakeClassifier {
        async fn classify(
            &self,
            coin: &str,
            _daily_analysis: &str,
            monthly_returns: &str,
            _prediction: &str,
        ) -> Result<Sentiment, SentimentError> {
            self.seen.lock().unwrap().push(format!("{}|{}", coin, monthly_returns));
            Ok(Sentiment::Positive)
        }
    }

    fn ticker(id: &str, symbol: &str, price: Decimal) -> Ticker {
        Ticker {
            id: id.into(),
            symbol: symbol.into(),
            name: symbol.into(),
            price_usd: price,
            change_percent_24h: dec!(1),
            change_percent_7d: dec!(2),
        }
    }

    fn holding(symbol: &str, amount: Decimal, buy: Decimal) -> Holding {
        Holding { symbol: symbol.into(), amount, purchase_price_usd: buy }
    }

    fn service(market: FakeMarket, classifier: Option<FakeClassifier>) -> PortfolioService {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        PortfolioService::new(
            repo,
            Box::new(market),
            classifier.map(|c| Box::new(c) as Box<dyn SentimentClassifier>),
        )
    }

    fn market() -> FakeMarket {
        FakeMarket {
            tickers: vec![ticker("90", "BTC", dec!(12000)), ticker("80", "ETH", dec!(2500))],
            ..FakeMarket::default()
        }
    }

    #[test]
    fn test_upload_values_and_stores_priced_holdings() {
        let svc = service(market(), None);
        let uploaded = vec![
            holding("btc", dec!(2), dec!(10000)),
            holding("XRP", dec!(100), dec!(0.5)),
            holding("ETH", dec!(10), dec!(2000)),
        ];

        let result = tokio_test::block_on(svc.upload(uploaded)).unwrap();

        assert_eq!(result.total_value_usd, dec!(49000));
        assert_eq!(result.total_change_percent, dec!(22.5));
        assert_eq!(result.unmatched, vec!["XRP".to_string()]);

        let stored = svc.holdings().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].symbol, "BTC");
        assert_eq!(stored[1].symbol, "ETH");

        let runs = svc.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].kind, "upload");
        assert_eq!(runs[0].lines, 2);
    }

    #[test]
    fn test_refresh_uses_stored_holdings() {
        let svc = service(market(), None);
        svc.repo
            .save_holdings(&[holding("ETH", dec!(1), dec!(0)), holding("eth", dec!(1), dec!(0))])
            .unwrap();

        let result = tokio_test::block_on(svc.refresh()).unwrap();

        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.total_value_usd, dec!(5000));
        assert_eq!(result.total_change_percent, Decimal::ZERO);
        assert_eq!(svc.recent_runs(1).unwrap()[0].kind, "refresh");
    }

    #[test]
    fn test_refresh_requests_each_id_once() {
        let m = market();
        let ids = Arc::clone(&m.requested_ids);
        let svc = service(m, None);
        svc.repo
            .save_holdings(&[holding("BTC", dec!(1), dec!(1)), holding("btc", dec!(2), dec!(1))])
            .unwrap();

        tokio_test::block_on(svc.refresh()).unwrap();
        assert_eq!(*ids.lock().unwrap(), vec!["90".to_string()]);
    }

    #[test]
    fn test_refresh_without_holdings_fails() {
        let svc = service(market(), None);
        let err = tokio_test::block_on(svc.refresh()).unwrap_err();
        assert!(err.to_string().contains("No portfolio stored"));
    }

    #[test]
    fn test_upload_with_no_listed_symbol_fails_and_keeps_store() {
        let svc = service(market(), None);
        svc.repo.save_holdings(&[holding("BTC", dec!(1), dec!(1))]).unwrap();

        let err = tokio_test::block_on(svc.upload(vec![holding("NOPE", dec!(1), dec!(1))]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("listed"));

        assert_eq!(svc.holdings().unwrap()[0].symbol, "BTC");
        let runs = svc.recent_runs(1).unwrap();
        assert_eq!(runs[0].status, "error");
    }

    #[test]
    fn test_upload_with_no_matching_ticker_keeps_store() {
        let m = FakeMarket {
            aliases: HashMap::from([("XRP".to_string(), "90".to_string())]),
            ..market()
        };
        let svc = service(m, None);
        svc.repo.save_holdings(&[holding("ETH", dec!(1), dec!(1))]).unwrap();

        let err = tokio_test::block_on(svc.upload(vec![holding("XRP", dec!(100), dec!(0.5))]))
            .unwrap_err();
        assert!(err.to_string().contains("could be valued"));

        let stored = svc.holdings().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].symbol, "ETH");
    }

    #[test]
    fn test_valuation_proceeds_without_run_log() {
        let svc = PortfolioService::new(Repository::open_in_memory().unwrap(), Box::new(market()), None);

        let result =
            tokio_test::block_on(svc.value("refresh", &[holding("BTC", dec!(1), dec!(10000))])).unwrap();

        assert_eq!(result.total_value_usd, dec!(12000));
        assert!(svc.recent_runs(1).is_err());
    }

    #[test]
    fn test_empty_upload_fails() {
        let svc = service(market(), None);
        assert!(tokio_test::block_on(svc.upload(vec![])).is_err());
    }

    #[test]
    fn test_analyse_feeds_scraped_data_to_classifier() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let svc = service(market(), Some(FakeClassifier { seen: Arc::clone(&seen) }));

        let analysis = tokio_test::block_on(svc.analyse(" Bitcoin ")).unwrap();

        assert_eq!(analysis.coin, "bitcoin");
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert_eq!(analysis.insight.today_analysis, "bitcoin looks strong");
        assert_eq!(*seen.lock().unwrap(), vec!["bitcoin|2025,9.5%".to_string()]);
    }

    #[test]
    fn test_analyse_without_classifier_fails() {
        let svc = service(market(), None);
        let err = tokio_test::block_on(svc.analyse("bitcoin")).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
