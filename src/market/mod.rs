pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::MarketConfig;
use crate::models::{CoinInsight, RawTicker, Ticker, TickersPage};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use url::Url;

use self::cleaner::{clean_tickers, normalise_symbol, resolve_ids};
use self::http_client::HttpClient;
use self::parsers::{NO_PREDICTION, extract_analysis, extract_monthly_returns, extract_price_prediction};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable market data source.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Uppercased symbol → provider id, for the symbols the provider lists.
    async fn map_symbols_to_ids(&self, symbols: &[String]) -> Result<HashMap<String, String>>;
    async fn get_tickers(&self, ids: &[String]) -> Result<Vec<Ticker>>;
    /// Scraped commentary, monthly returns and forecast for a coin slug.
    async fn fetch_coin_insight(&self, coin: &str) -> Result<CoinInsight>;
}

// ── CoinLore ──────────────────────────────────────────────────────────────────

pub struct CoinLoreClient {
    client: HttpClient,
    api_base: String,
    site_base: String,
    page_size: usize,
    max_pages: usize,
    returns_year: i32,
}

/// `/ticker/?id=` answers with an array, or with something else for unknown ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum TickerResponse {
    List(Vec<RawTicker>),
    Other(serde_json::Value),
}

impl CoinLoreClient {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            site_base: config.site_base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            returns_year: config.returns_year.unwrap_or_else(|| Utc::now().year()),
        })
    }

    /// Listing page: `/tickers/?start=0&limit=100`
    fn tickers_url(&self, start: usize) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}/tickers/", self.api_base),
            &[("start", start.to_string()), ("limit", self.page_size.to_string())],
        )
        .context("Invalid CoinLore API base URL")
    }

    /// Quote lookup: `/ticker/?id=90,80`
    fn ticker_url(&self, ids: &[String]) -> Result<Url> {
        Url::parse_with_params(&format!("{}/ticker/", self.api_base), &[("id", ids.join(","))])
            .context("Invalid CoinLore API base URL")
    }

    /// Site page for a coin slug, e.g. `/coin/bitcoin` or
    /// `/coin/bitcoin/forecast/price-prediction`.
    fn coin_url(&self, coin: &str, rest: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.site_base).context("Invalid CoinLore site URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("CoinLore site URL cannot take a path"))?
            .pop_if_empty()
            .push("coin")
            .push(coin)
            .extend(rest);
        Ok(url)
    }
}

#[async_trait]
impl MarketDataSource for CoinLoreClient {
    async fn map_symbols_to_ids(&self, symbols: &[String]) -> Result<HashMap<String, String>> {
        let mut needed: HashSet<String> = symbols
            .iter()
            .map(|s| normalise_symbol(s))
            .filter(|s| !s.is_empty())
            .collect();
        let mut resolved = HashMap::new();
        let mut start = 0usize;

        for page in 1..=self.max_pages {
            if needed.is_empty() {
                break;
            }

            let url = self.tickers_url(start)?;
            info!("Resolving {} symbols, listing page {} ({})", needed.len(), page, url);

            let body: TickersPage = self.client.get_json(&url).await
                .with_context(|| format!("Failed to fetch listing page {}", page))?;

            if body.data.is_empty() {
                debug!("Empty page {}, stopping pagination", page);
                break;
            }

            let found = resolve_ids(&body.data, &mut needed, &mut resolved);
            debug!("  Page {}: {} rows, {} symbols resolved", page, body.data.len(), found);

            if body.data.len() < self.page_size {
                break;
            }
            start += self.page_size;
        }

        if !needed.is_empty() {
            let mut missing: Vec<_> = needed.into_iter().collect();
            missing.sort();
            warn!("Not listed on CoinLore: {}", missing.join(", "));
        }

        Ok(resolved)
    }

    async fn get_tickers(&self, ids: &[String]) -> Result<Vec<Ticker>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let url = self.ticker_url(ids)?;
        info!("Fetching {} tickers ({})", ids.len(), url);

        let rows = match self.client.get_json::<TickerResponse>(&url).await
            .context("Ticker fetch failed")?
        {
            TickerResponse::List(rows) => rows,
            TickerResponse::Other(v) => {
                warn!("Ticker endpoint returned no list: {}", v);
                vec![]
            }
        };

        let tickers = clean_tickers(&rows);
        info!("{} of {} tickers usable", tickers.len(), rows.len());
        Ok(tickers)
    }

    async fn fetch_coin_insight(&self, coin: &str) -> Result<CoinInsight> {
        let coin = coin.trim().to_lowercase();
        if coin.is_empty() {
            return Err(anyhow!("Coin name is empty"));
        }

        let page_url = self.coin_url(&coin, &[])?;
        info!("Fetching coin page {}", page_url);
        let html = self.client.get_text(&page_url).await
            .with_context(|| format!("Failed to fetch coin page for {}", coin))?;
        debug!("{}: coin page {} bytes", coin, html.len());

        let today_analysis = extract_analysis(&html);
        let monthly_returns = extract_monthly_returns(&html, self.returns_year);

        let forecast_url = self.coin_url(&coin, &["forecast", "price-prediction"])?;
        let prediction = match self.client.get_text(&forecast_url).await {
            Ok(html) => extract_price_prediction(&html),
            Err(e) => {
                warn!("{}: forecast page unavailable: {}", coin, e);
                NO_PREDICTION.to_string()
            }
        };

        Ok(CoinInsight {
            today_analysis,
            prediction,
            monthly_returns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn client() -> CoinLoreClient {
        let config = MarketConfig {
            api_base_url: "https://api.coinlore.net/api/".into(),
            site_base_url: "https://www.coinlore.com".into(),
            page_size: 100,
            returns_year: Some(2025),
            ..MarketConfig::default()
        };
        CoinLoreClient::new(&config).unwrap()
    }

    #[test]
    fn test_urls() {
        let c = client();
        assert_eq!(
            c.tickers_url(200).unwrap().as_str(),
            "https://api.coinlore.net/api/tickers/?start=200&limit=100"
        );
        assert_eq!(
            c.ticker_url(&["90".into(), "80".into()]).unwrap().as_str(),
            "https://api.coinlore.net/api/ticker/?id=90%2C80"
        );
        assert_eq!(
            c.coin_url("bitcoin", &["forecast", "price-prediction"]).unwrap().as_str(),
            "https://www.coinlore.com/coin/bitcoin/forecast/price-prediction"
        );
        assert_eq!(
            c.coin_url("bitcoin cash", &[]).unwrap().as_str(),
            "https://www.coinlore.com/coin/bitcoin%20cash"
        );
    }

    #[test]
    fn test_ticker_response_shapes() {
        let list: TickerResponse =
            serde_json::from_str(r#"[{"id":"90","symbol":"BTC","price_usd":"1"}]"#).unwrap();
        assert!(matches!(list, TickerResponse::List(ref v) if v.len() == 1));

        let other: TickerResponse = serde_json::from_str(r#""""#).unwrap();
        assert!(matches!(other, TickerResponse::Other(_)));
    }

    #[test]
    fn test_get_tickers_empty_ids_makes_no_request() {
        let tickers = tokio_test::block_on(client().get_tickers(&[])).unwrap();
        assert!(tickers.is_empty());
    }

    // ── Against a local HTTP server ───────────────────────────────────────────

    fn local_client(server: &ServerGuard, page_size: usize, max_pages: usize) -> CoinLoreClient {
        let config = MarketConfig {
            api_base_url: server.url(),
            site_base_url: server.url(),
            request_delay_ms: 0,
            jitter_ms: 0,
            max_retries: 0,
            page_size,
            max_pages,
            returns_year: Some(2025),
            ..MarketConfig::default()
        };
        CoinLoreClient::new(&config).unwrap()
    }

    fn listing(rows: &[(&str, &str)]) -> String {
        let data: Vec<_> = rows
            .iter()
            .map(|(id, symbol)| json!({ "id": id, "symbol": symbol, "name": symbol, "price_usd": "1.0" }))
            .collect();
        json!({ "data": data }).to_string()
    }

    async fn listing_page(server: &mut ServerGuard, start: usize, rows: &[(&str, &str)], hits: usize) -> Mock {
        server
            .mock("GET", "/tickers/")
            .match_query(Matcher::UrlEncoded("start".into(), start.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(listing(rows))
            .expect(hits)
            .create_async()
            .await
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_mapping_stops_once_every_symbol_is_found() {
        let mut server = Server::new_async().await;
        let first = listing_page(&mut server, 0, &[("90", "BTC"), ("80", "ETH")], 1).await;
        let second = listing_page(&mut server, 2, &[("58", "XRP"), ("2", "DOGE")], 0).await;

        let map = local_client(&server, 2, 5)
            .map_symbols_to_ids(&symbols(&["btc", "ETH"]))
            .await
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map["BTC"], "90");
        assert_eq!(map["ETH"], "80");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_mapping_stops_on_short_page() {
        let mut server = Server::new_async().await;
        let first = listing_page(&mut server, 0, &[("90", "BTC"), ("80", "ETH")], 1).await;
        let second = listing_page(&mut server, 2, &[("257", "ADA")], 1).await;
        let third = listing_page(&mut server, 4, &[("58", "XRP")], 0).await;

        let map = local_client(&server, 2, 5)
            .map_symbols_to_ids(&symbols(&["ADA", "XRP"]))
            .await
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map["ADA"], "257");
        first.assert_async().await;
        second.assert_async().await;
        third.assert_async().await;
    }

    #[tokio::test]
    async fn test_mapping_stops_on_empty_page() {
        let mut server = Server::new_async().await;
        let first = listing_page(&mut server, 0, &[("90", "BTC"), ("80", "ETH")], 1).await;
        let second = listing_page(&mut server, 2, &[], 1).await;
        let third = listing_page(&mut server, 4, &[("58", "XRP")], 0).await;

        let map = local_client(&server, 2, 5)
            .map_symbols_to_ids(&symbols(&["XRP"]))
            .await
            .unwrap();

        assert!(map.is_empty());
        first.assert_async().await;
        second.assert_async().await;
        third.assert_async().await;
    }

    #[tokio::test]
    async fn test_mapping_stops_at_page_limit() {
        let mut server = Server::new_async().await;
        let pages = server
            .mock("GET", "/tickers/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(listing(&[("90", "BTC"), ("80", "ETH")]))
            .expect(3)
            .create_async()
            .await;

        let map = local_client(&server, 2, 3)
            .map_symbols_to_ids(&symbols(&["XRP"]))
            .await
            .unwrap();

        assert!(map.is_empty());
        pages.assert_async().await;
    }

    #[tokio::test]
    async fn test_first_listed_id_wins_across_pages() {
        let mut server = Server::new_async().await;
        let _first = listing_page(&mut server, 0, &[("90", "BTC"), ("2", "DOGE")], 1).await;
        let _second = listing_page(&mut server, 2, &[("99999", "BTC"), ("80", "ETH")], 1).await;

        let map = local_client(&server, 2, 5)
            .map_symbols_to_ids(&symbols(&["BTC", "ETH"]))
            .await
            .unwrap();

        assert_eq!(map["BTC"], "90");
        assert_eq!(map["ETH"], "80");
    }

    #[tokio::test]
    async fn test_mapping_fails_on_listing_error() {
        let mut server = Server::new_async().await;
        let _pages = server
            .mock("GET", "/tickers/")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let result = local_client(&server, 2, 5).map_symbols_to_ids(&symbols(&["BTC"])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_get_tickers_cleans_rows() {
        let mut server = Server::new_async().await;
        let body = json!([
            { "id": "90", "symbol": "btc", "name": "Bitcoin", "price_usd": "64250.12",
              "percent_change_24h": "-1.5", "percent_change_7d": 3.2 },
            { "id": "80", "symbol": "ETH", "name": "Ethereum", "price_usd": "" }
        ]);
        let quotes = server
            .mock("GET", "/ticker/")
            .match_query(Matcher::UrlEncoded("id".into(), "90,80".into()))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let tickers = local_client(&server, 100, 1)
            .get_tickers(&symbols(&["90", "80"]))
            .await
            .unwrap();

        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "BTC");
        assert_eq!(tickers[0].price_usd, dec!(64250.12));
        assert_eq!(tickers[0].change_percent_24h, dec!(-1.5));
        assert_eq!(tickers[0].change_percent_7d, dec!(3.2));
        quotes.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_tickers_non_list_reply_is_empty() {
        let mut server = Server::new_async().await;
        let _quotes = server
            .mock("GET", "/ticker/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":"no coins"}"#)
            .create_async()
            .await;

        let tickers = local_client(&server, 100, 1)
            .get_tickers(&symbols(&["123456"]))
            .await
            .unwrap();
        assert!(tickers.is_empty());
    }

    #[tokio::test]
    async fn test_get_tickers_server_error() {
        let mut server = Server::new_async().await;
        let _quotes = server
            .mock("GET", "/ticker/")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let result = local_client(&server, 100, 1).get_tickers(&symbols(&["90"])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_coin_insight_without_forecast_page() {
        let mut server = Server::new_async().await;
        let page = r#"<html><body>
            <div class="coin_page_about"><p>Bitcoin trades sideways.</p></div>
            <table id="monthly-historical-stats"><tr><td>2025</td><td>9.5%</td></tr></table>
          </body></html>"#;
        let _coin = server.mock("GET", "/coin/bitcoin").with_status(200).with_body(page).create_async().await;
        let _forecast = server
            .mock("GET", "/coin/bitcoin/forecast/price-prediction")
            .with_status(404)
            .create_async()
            .await;

        let insight = local_client(&server, 100, 1).fetch_coin_insight("Bitcoin").await.unwrap();

        assert_eq!(insight.today_analysis, "Bitcoin trades sideways.");
        assert_eq!(insight.monthly_returns, ["2025", "9.5%"]);
        assert_eq!(insight.prediction, NO_PREDICTION);
    }
}
