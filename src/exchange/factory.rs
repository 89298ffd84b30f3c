//! Credential config to live client resolution.

use std::sync::Arc;

use super::binance_futures::BinanceFuturesClient;
use super::binance_spot::BinanceSpotClient;
use super::bitget_mix::BitgetMixClient;
use super::bitget_spot::BitgetSpotClient;
use super::bybit::{BybitCategory, BybitClient};
use super::credentials::ExchangeCredentials;
use super::gate::GateFuturesClient;
use super::okx::OkxClient;
use super::traits::LiveExchangeClient;
use crate::domain::MarketType;
use crate::error::{QuantdeskError, Result};

/// Build the venue client matching `(exchange_id, market_type)`.
pub fn create_client(
    credentials: &ExchangeCredentials,
    market_type: MarketType,
) -> Result<Arc<dyn LiveExchangeClient>> {
    credentials.validate()?;
    if credentials.requires_passphrase() && credentials.passphrase.trim().is_empty() {
        return Err(QuantdeskError::MissingCredential(format!(
            "{} requires a passphrase",
            credentials.exchange_id
        )));
    }

    let base_url = credentials.base_url.as_deref();
    let client: Arc<dyn LiveExchangeClient> =
        match credentials.exchange_id.to_ascii_lowercase().as_str() {
            "binance" => match market_type {
                MarketType::Spot => Arc::new(BinanceSpotClient::new(
                    &credentials.api_key,
                    &credentials.secret_key,
                    base_url,
                    credentials.enable_demo_trading,
                )?),
                MarketType::Swap => Arc::new(BinanceFuturesClient::new(
                    &credentials.api_key,
                    &credentials.secret_key,
                    base_url,
                    credentials.enable_demo_trading,
                )?),
            },
            "bybit" => {
                let category = match market_type {
                    MarketType::Spot => BybitCategory::Spot,
                    MarketType::Swap => BybitCategory::Linear,
                };
                Arc::new(BybitClient::new(
                    &credentials.api_key,
                    &credentials.secret_key,
                    base_url,
                    category,
                )?)
            }
            "bitget" => match market_type {
                MarketType::Spot => Arc::new(BitgetSpotClient::new(
                    &credentials.api_key,
                    &credentials.secret_key,
                    &credentials.passphrase,
                    base_url,
                )?),
                MarketType::Swap => Arc::new(BitgetMixClient::new(
                    &credentials.api_key,
                    &credentials.secret_key,
                    &credentials.passphrase,
                    base_url,
                )?),
            },
            "okx" => Arc::new(OkxClient::new(
                &credentials.api_key,
                &credentials.secret_key,
                &credentials.passphrase,
                base_url,
                market_type,
            )?),
            "gate" | "gateio" => {
                if market_type == MarketType::Spot {
                    return Err(QuantdeskError::UnsupportedOperation(
                        "Gate spot trading is not wired; use market_type=swap".to_string(),
                    ));
                }
                Arc::new(GateFuturesClient::new(
                    &credentials.api_key,
                    &credentials.secret_key,
                    base_url,
                )?)
            }
            other => {
                return Err(QuantdeskError::Validation(format!(
                    "unsupported exchange: {}",
                    other
                )))
            }
        };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(exchange_id: &str, passphrase: &str) -> ExchangeCredentials {
        ExchangeCredentials {
            exchange_id: exchange_id.to_string(),
            api_key: "k".to_string(),
            secret_key: "s".to_string(),
            passphrase: passphrase.to_string(),
            base_url: None,
            enable_demo_trading: false,
        }
    }

    #[test]
    fn builds_clients_per_exchange() {
        for (id, pass, market_type, expected) in [
            ("binance", "", MarketType::Spot, "binance"),
            ("binance", "", MarketType::Swap, "binance_futures"),
            ("bybit", "", MarketType::Swap, "bybit"),
            ("bitget", "p", MarketType::Spot, "bitget"),
            ("bitget", "p", MarketType::Swap, "bitget_mix"),
            ("okx", "p", MarketType::Swap, "okx"),
            ("gate", "", MarketType::Swap, "gate"),
        ] {
            let client = create_client(&creds(id, pass), market_type).unwrap();
            assert_eq!(client.exchange_id(), expected, "wrong client for {}", id);
        }
    }

    #[test]
    fn passphrase_venues_reject_empty_passphrase() {
        let err = create_client(&creds("okx", ""), MarketType::Swap).unwrap_err();
        assert!(matches!(err, QuantdeskError::MissingCredential(_)));
        let err = create_client(&creds("bitget", ""), MarketType::Spot).unwrap_err();
        assert!(matches!(err, QuantdeskError::MissingCredential(_)));
    }

    #[test]
    fn unknown_exchange_is_rejected() {
        assert!(create_client(&creds("kraken", ""), MarketType::Spot).is_err());
    }

    #[test]
    fn gate_spot_is_unsupported() {
        let err = create_client(&creds("gate", ""), MarketType::Spot).unwrap_err();
        assert!(matches!(err, QuantdeskError::UnsupportedOperation(_)));
    }
}
