//! Environmental-impact recommendation text for a scanned product, fetched
//! from an OpenRouter-hosted chat model. Strictly best-effort: every
//! failure path degrades to canned guidance, never to an error.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const MODEL_ID: &str = "deepseek/deepseek-r1-0528:free";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const FALLBACK_TIMEOUT: &str = "Environmental analysis is taking longer than expected. This product should be disposed of according to local recycling guidelines. Consider choosing products with minimal packaging and recyclable materials.";
const FALLBACK_NETWORK: &str = "Unable to connect to analysis service. Please check your internet connection. In general, reduce waste by choosing reusable products and recycling when possible.";
const FALLBACK_BUSY: &str = "Analysis service is busy. This item can likely be recycled - check your local recycling guidelines. Choose products made from sustainable materials when possible.";
const FALLBACK_GENERIC: &str = "Detailed environmental analysis is temporarily unavailable. Follow the 3 R's: Reduce consumption, Reuse items when possible, and Recycle according to local guidelines.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

pub struct RecommendationClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl RecommendationClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Produces one short disposal-and-alternatives paragraph for the given
    /// product data. Infallible by contract: a timeout, connection failure,
    /// rate limit, or malformed reply each map to their own canned text.
    pub async fn recommend(&self, product: &serde_json::Value) -> String {
        let product_json = serde_json::to_string_pretty(product).unwrap_or_default();
        let prompt = format!(
            "You are an expert Environmental Impact Analyst. \
             Given the following structured product data: {product_json}, \
             generate one short, clean, and factual paragraph (max 50 words, \
             no titles, no bullet points, no line breaks, no styling, no \
             numbering of points). Include accurate disposal tips \
             (recyclable, compostable, etc.) and suggest 2 real-world \
             eco-friendly alternatives with justifications."
        );

        let request = ChatRequest {
            model: MODEL_ID.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let response = match self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("recommendation request failed: {err}");
                return if err.is_timeout() {
                    FALLBACK_TIMEOUT.to_string()
                } else if err.is_connect() {
                    FALLBACK_NETWORK.to_string()
                } else {
                    FALLBACK_GENERIC.to_string()
                };
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("recommendation service rate limited");
            return FALLBACK_BUSY.to_string();
        }
        if !status.is_success() {
            warn!(%status, "recommendation service rejected the request");
            return FALLBACK_GENERIC.to_string();
        }

        match response.json::<ChatResponse>().await {
            Ok(reply) => match reply.choices.into_iter().next() {
                Some(choice) if !choice.message.content.is_empty() => choice.message.content,
                _ => {
                    warn!("recommendation reply carried no content");
                    FALLBACK_GENERIC.to_string()
                }
            },
            Err(err) => {
                warn!("recommendation reply was malformed: {err}");
                FALLBACK_GENERIC.to_string()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
