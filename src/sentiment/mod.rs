//! Coin sentiment via an OpenAI-compatible chat completions endpoint.
//!
//! The model gets a fixed analysis framework as system prompt and the scraped
//! coin data as user prompt, and must answer with a single word. Anything
//! other than `positive`, `negative` or `neutral` is read as neutral.

use crate::config::SentimentConfig;
use crate::models::Sentiment;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SentimentError {
    #[error("no API key configured (set COINFOLIO_SENTIMENT__API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("API key contains characters not allowed in a header")]
    InvalidApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from model {0}")]
    EmptyResponse(String),
}

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(
        &self,
        coin: &str,
        daily_analysis: &str,
        monthly_returns: &str,
        prediction: &str,
    ) -> Result<Sentiment, SentimentError>;
}

// ── Prompts ───────────────────────────────────────────────────────────────────

const SYSTEM_PROMPT: &str = "\
You are an expert cryptocurrency sentiment analysis system. Evaluate the asset across \
the data you are given: the daily analysis (short-term price action, volume and momentum), \
the monthly returns (medium-term trend and volatility) and the price prediction \
(forecast direction and how credible it looks).

Weighting: technical indicators 35%, market sentiment and volume 25%, \
fundamentals and news 25%, prediction confidence 15%. Weight recent data more heavily \
than older data.

POSITIVE: bullish signals across timeframes, sustained upward momentum, credible bullish forecast.
NEGATIVE: bearish patterns, negative momentum, credible bearish forecast, high downside risk.
NEUTRAL: mixed signals, sideways consolidation, uncertain forecast, market indecision.

Respond with exactly one word: positive, negative or neutral.";

pub fn user_prompt(coin: &str, daily_analysis: &str, monthly_returns: &str, prediction: &str) -> String {
    format!(
        "Analyze the following cryptocurrency and provide sentiment classification:\n\n\
         Coin: {coin}\n\n\
         Daily Analysis:\n{daily_analysis}\n\n\
         Monthly Returns:\n{monthly_returns}\n\n\
         Predictions:\n{prediction}\n\n\
         Provide your sentiment analysis as a single word: positive, negative, or neutral."
    )
}

/// Map a model reply onto a [`Sentiment`]; unrecognised replies become neutral.
pub fn parse_sentiment(reply: &str) -> Sentiment {
    let word = reply
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    match word.as_str() {
        "positive" => Sentiment::Positive,
        "negative" => Sentiment::Negative,
        "neutral" => Sentiment::Neutral,
        _ => {
            warn!("Invalid sentiment returned: {:?}, defaulting to neutral", reply);
            Sentiment::Neutral
        }
    }
}

// ── OpenAI-compatible client ──────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiClassifier {
    client: reqwest::Client,
    endpoint: String,
    config: SentimentConfig,
}

impl OpenAiClassifier {
    pub fn new(config: &SentimentConfig) -> Result<Self, SentimentError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SentimentError::MissingApiKey)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .map_err(|_| SentimentError::InvalidApiKey)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base_url.trim_end_matches('/')),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl SentimentClassifier for OpenAiClassifier {
    async fn classify(
        &self,
        coin: &str,
        daily_analysis: &str,
        monthly_returns: &str,
        prediction: &str,
    ) -> Result<Sentiment, SentimentError> {
        let user = user_prompt(coin, daily_analysis, monthly_returns, prediction);
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &user },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
        };

        debug!("POST {} (model {})", self.endpoint, self.config.model);
        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SentimentError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let data: ChatCompletionResponse = response.json().await?;
        let reply = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SentimentError::EmptyResponse(self.config.model.clone()))?;

        let sentiment = parse_sentiment(&reply);
        info!("Sentiment for {}: {}", coin, sentiment);
        Ok(sentiment)
    }
}
