use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{QuantdeskError, Result};

/// Exchange API credentials as stored in `qd_exchange_credentials`.
/// Secret material is wiped on drop.
#[derive(Debug, Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ExchangeCredentials {
    #[zeroize(skip)]
    pub exchange_id: String,
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub passphrase: String,
    #[zeroize(skip)]
    #[serde(default)]
    pub base_url: Option<String>,
    #[zeroize(skip)]
    #[serde(default)]
    pub enable_demo_trading: bool,
}

impl ExchangeCredentials {
    pub fn from_config_json(raw: &serde_json::Value) -> Result<Self> {
        let parsed: ExchangeCredentials = serde_json::from_value(raw.clone())
            .map_err(|e| QuantdeskError::MissingCredential(format!("bad credential config: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.exchange_id.trim().is_empty() {
            return Err(QuantdeskError::MissingCredential(
                "exchange_id missing".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() || self.secret_key.trim().is_empty() {
            return Err(QuantdeskError::MissingCredential(format!(
                "api_key/secret_key missing for {}",
                self.exchange_id
            )));
        }
        Ok(())
    }

    pub fn requires_passphrase(&self) -> bool {
        matches!(self.exchange_id.to_ascii_lowercase().as_str(), "okx" | "bitget")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_config() {
        let creds = ExchangeCredentials::from_config_json(&json!({
            "exchange_id": "bybit",
            "api_key": "k",
            "secret_key": "s",
        }))
        .unwrap();
        assert_eq!(creds.exchange_id, "bybit");
        assert!(creds.passphrase.is_empty());
    }

    #[test]
    fn rejects_missing_keys() {
        let err = ExchangeCredentials::from_config_json(&json!({
            "exchange_id": "bybit",
            "api_key": "",
            "secret_key": "s",
        }))
        .unwrap_err();
        assert!(matches!(err, QuantdeskError::MissingCredential(_)));
    }

    #[test]
    fn passphrase_requirement_by_venue() {
        let mk = |id: &str| ExchangeCredentials {
            exchange_id: id.to_string(),
            api_key: "k".into(),
            secret_key: "s".into(),
            passphrase: String::new(),
            base_url: None,
            enable_demo_trading: false,
        };
        assert!(mk("okx").requires_passphrase());
        assert!(mk("bitget").requires_passphrase());
        assert!(!mk("binance").requires_passphrase());
    }
}
