use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{QuantdeskError, Result};

/// Market segment a symbol trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Crypto,
    #[serde(rename = "USStock", alias = "UsStock")]
    UsStock,
    Forex,
    Futures,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crypto => "Crypto",
            Self::UsStock => "USStock",
            Self::Forex => "Forex",
            Self::Futures => "Futures",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Market {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "crypto" | "cryptocurrency" => Ok(Self::Crypto),
            "usstock" | "us_stock" | "stock" | "stocks" => Ok(Self::UsStock),
            "forex" | "fx" => Ok(Self::Forex),
            "futures" | "commodities" => Ok(Self::Futures),
            _ => Err("invalid market; expected Crypto|USStock|Forex|Futures"),
        }
    }
}

pub fn parse_market(raw: &str) -> Result<Market> {
    Market::from_str(raw).map_err(|e| QuantdeskError::Validation(e.to_string()))
}

/// Spot vs perpetual-swap execution venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Swap,
}

impl Default for MarketType {
    fn default() -> Self {
        Self::Swap
    }
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Swap => "swap",
        }
    }

    pub fn is_spot(&self) -> bool {
        matches!(self, Self::Spot)
    }
}

impl FromStr for MarketType {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "swap" | "futures" | "future" | "perp" | "perpetual" | "linear" => Ok(Self::Swap),
            "" => Ok(Self::Swap),
            _ => Err("invalid market_type; expected spot|swap"),
        }
    }
}

/// Output languages supported by the analysis prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    ZhCn,
    ZhTw,
    EnUs,
    JaJp,
}

impl Default for Language {
    fn default() -> Self {
        Self::EnUs
    }
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZhCn => "zh-CN",
            Self::ZhTw => "zh-TW",
            Self::EnUs => "en-US",
            Self::JaJp => "ja-JP",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "zh-cn" | "zh_cn" | "zh" => Ok(Self::ZhCn),
            "zh-tw" | "zh_tw" => Ok(Self::ZhTw),
            "en-us" | "en_us" | "en" => Ok(Self::EnUs),
            "ja-jp" | "ja_jp" | "ja" => Ok(Self::JaJp),
            other => Err(QuantdeskError::InvalidLanguage(other.to_string())),
        }
    }
}

/// Candle timeframe. Wire form matches the upstream K-line APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1H", alias = "1h")]
    H1,
    #[serde(rename = "4H", alias = "4h")]
    H4,
    #[serde(rename = "1D", alias = "1d")]
    D1,
    #[serde(rename = "1W", alias = "1w")]
    W1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::D1
    }
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1H",
            Self::H4 => "4H",
            Self::D1 => "1D",
            Self::W1 => "1W",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::H4 => 14400,
            Self::D1 => 86400,
            Self::W1 => 604800,
        }
    }

    /// Annualization factor for Sharpe (periods per trading year).
    pub fn annualization_factor(&self) -> f64 {
        match self {
            Self::M1 => 252.0 * 24.0 * 60.0,
            Self::M5 => 252.0 * 24.0 * 12.0,
            Self::M15 => 252.0 * 24.0 * 4.0,
            Self::M30 => 252.0 * 24.0 * 2.0,
            Self::H1 => 252.0 * 24.0,
            Self::H4 => 252.0 * 6.0,
            Self::D1 => 252.0,
            Self::W1 => 52.0,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" | "60m" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" | "d" | "day" => Ok(Self::D1),
            "1w" | "w" | "week" => Ok(Self::W1),
            _ => Err("invalid timeframe"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_parses_aliases() {
        assert_eq!(parse_market("crypto").unwrap(), Market::Crypto);
        assert_eq!(parse_market("USStock").unwrap(), Market::UsStock);
        assert!(parse_market("bonds").is_err());
    }

    #[test]
    fn market_type_aliases_fold_to_swap() {
        for alias in ["swap", "futures", "perp", "perpetual", ""] {
            assert_eq!(alias.parse::<MarketType>().unwrap(), MarketType::Swap);
        }
        assert_eq!("spot".parse::<MarketType>().unwrap(), MarketType::Spot);
    }

    #[test]
    fn language_rejects_unknown() {
        assert!(Language::parse("fr-FR").is_err());
        assert_eq!(Language::parse("zh-CN").unwrap(), Language::ZhCn);
    }

    #[test]
    fn timeframe_roundtrip() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::H1,
            Timeframe::D1,
            Timeframe::W1,
        ] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!(Timeframe::D1.seconds(), 86400);
    }
}
