//! Shared REST transport for venue clients.
//!
//! Signing needs the body string byte-identical to the wire bytes, so the
//! body travels as a pre-serialized `String` end to end; this layer never
//! re-serializes it.

use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

use crate::error::{QuantdeskError, Result};

#[derive(Debug)]
pub(crate) struct RestTransport {
    http: Client,
    base_url: String,
    venue: &'static str,
}

impl RestTransport {
    pub fn new(venue: &'static str, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("quantdesk-{}-adapter/0.1", venue))
            .build()
            .map_err(|e| {
                QuantdeskError::Internal(format!("failed to build {} HTTP client: {}", venue, e))
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            venue,
        })
    }

    pub fn venue(&self) -> &'static str {
        self.venue
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request; non-2xx becomes a venue HTTP error with the body
    /// trimmed. The caller still checks venue business envelopes.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(String, String)]>,
        body: Option<String>,
        headers: HeaderMap,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).headers(headers);
        if let Some(q) = query {
            request = request.query(q);
        }
        if let Some(b) = body {
            request = request.body(b);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(QuantdeskError::venue_http(
                self.venue,
                status.as_u16(),
                &text,
            ));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|_| QuantdeskError::venue_business(self.venue, &text))
    }
}

/// Encode a query as the exact string that gets signed: keys sorted,
/// urlencoded, `k=v` joined by `&`.
pub(crate) fn sorted_query_string(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k),
                urlencoding::encode(v)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode a query preserving insertion order (Binance signs what it sends).
pub(crate) fn query_string(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k),
                urlencoding::encode(v)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn sorted_query_orders_keys() {
        let qs = sorted_query_string(&[p("symbol", "BTCUSDT"), p("category", "linear")]);
        assert_eq!(qs, "category=linear&symbol=BTCUSDT");
    }

    #[test]
    fn insertion_query_preserves_order() {
        let qs = query_string(&[p("b", "2"), p("a", "1")]);
        assert_eq!(qs, "b=2&a=1");
    }

    #[test]
    fn query_values_are_urlencoded() {
        let qs = query_string(&[p("note", "a b/c")]);
        assert_eq!(qs, "note=a%20b%2Fc");
    }
}
