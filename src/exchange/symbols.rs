//! Venue wire-symbol projections and their inverses.

use crate::domain::{normalize, CanonicalSymbol, MarketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Binance,
    Bybit,
    Okx,
    Bitget,
    Gate,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
            Self::Bitget => "bitget",
            Self::Gate => "gate",
        }
    }
}

/// Project a raw symbol onto a venue wire symbol. Total: unresolvable input
/// yields an empty string.
pub fn project(raw: &str, venue: Venue, market_type: MarketType) -> String {
    let Some(sym) = CanonicalSymbol::parse(raw) else {
        return String::new();
    };
    match venue {
        Venue::Binance | Venue::Bybit => format!("{}{}", sym.base, sym.quote),
        Venue::Okx => match market_type {
            MarketType::Spot => format!("{}-{}", sym.base, sym.quote),
            MarketType::Swap => format!("{}-{}-SWAP", sym.base, sym.quote),
        },
        Venue::Bitget => match market_type {
            MarketType::Spot => format!("{}{}_SPBL", sym.base, sym.quote),
            MarketType::Swap => format!("{}{}_UMCBL", sym.base, sym.quote),
        },
        Venue::Gate => format!("{}_{}", sym.base, sym.quote),
    }
}

/// Parse a venue wire symbol back into the canonical pair. Total: returns
/// `("", "")` for unresolvable input.
pub fn parse_wire(wire: &str, venue: Venue) -> (String, String) {
    let wire = wire.trim().to_uppercase();
    if wire.is_empty() {
        return (String::new(), String::new());
    }
    match venue {
        Venue::Binance | Venue::Bybit => normalize(&wire),
        Venue::Okx => {
            let stripped = wire.strip_suffix("-SWAP").unwrap_or(&wire);
            match stripped.split_once('-') {
                Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                    (format!("{}/{}", base, quote), base.to_string())
                }
                _ => (String::new(), String::new()),
            }
        }
        Venue::Bitget => {
            let stripped = wire
                .strip_suffix("_SPBL")
                .or_else(|| wire.strip_suffix("_UMCBL"))
                .or_else(|| wire.strip_suffix("_DMCBL"))
                .unwrap_or(&wire);
            normalize(stripped)
        }
        Venue::Gate => match wire.split_once('_') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                (format!("{}/{}", base, quote), base.to_string())
            }
            _ => (String::new(), String::new()),
        },
    }
}

pub fn to_binance_symbol(raw: &str) -> String {
    project(raw, Venue::Binance, MarketType::Spot)
}

pub fn to_bybit_symbol(raw: &str) -> String {
    project(raw, Venue::Bybit, MarketType::Spot)
}

pub fn to_okx_spot_inst_id(raw: &str) -> String {
    project(raw, Venue::Okx, MarketType::Spot)
}

pub fn to_okx_swap_inst_id(raw: &str) -> String {
    project(raw, Venue::Okx, MarketType::Swap)
}

pub fn to_bitget_spot_symbol(raw: &str) -> String {
    project(raw, Venue::Bitget, MarketType::Spot)
}

pub fn to_bitget_mix_symbol(raw: &str) -> String {
    project(raw, Venue::Bitget, MarketType::Swap)
}

pub fn to_gate_currency_pair(raw: &str) -> String {
    project(raw, Venue::Gate, MarketType::Swap)
}

/// Bitget v2 endpoints use the plain glued symbol without the market suffix.
pub fn to_bitget_v2_symbol(raw: &str) -> String {
    project(raw, Venue::Binance, MarketType::Spot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projections_per_venue() {
        assert_eq!(to_binance_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(to_bybit_symbol("btcusdt"), "BTCUSDT");
        assert_eq!(to_okx_spot_inst_id("BTC/USDT"), "BTC-USDT");
        assert_eq!(to_okx_swap_inst_id("BTC/USDT"), "BTC-USDT-SWAP");
        assert_eq!(to_bitget_spot_symbol("BTC/USDT"), "BTCUSDT_SPBL");
        assert_eq!(to_bitget_mix_symbol("BTC/USDT"), "BTCUSDT_UMCBL");
        assert_eq!(to_gate_currency_pair("BTC/USDT"), "BTC_USDT");
    }

    #[test]
    fn unresolvable_input_is_empty() {
        assert_eq!(project("", Venue::Okx, MarketType::Spot), "");
        assert_eq!(parse_wire("", Venue::Gate), (String::new(), String::new()));
    }

    #[test]
    fn wire_roundtrip_for_every_venue() {
        let cases = [
            ("BTC/USDT", Venue::Binance, MarketType::Spot),
            ("ETH/USDT", Venue::Bybit, MarketType::Swap),
            ("SOL/USDT", Venue::Okx, MarketType::Spot),
            ("SOL/USDT", Venue::Okx, MarketType::Swap),
            ("DOGE/USDT", Venue::Bitget, MarketType::Spot),
            ("DOGE/USDT", Venue::Bitget, MarketType::Swap),
            ("AVAX/USDT", Venue::Gate, MarketType::Swap),
        ];
        for (canonical, venue, market_type) in cases {
            let wire = project(canonical, venue, market_type);
            let (parsed, base) = parse_wire(&wire, venue);
            assert_eq!(parsed, canonical, "roundtrip failed for {:?}", venue);
            assert_eq!(base, canonical.split('/').next().unwrap());
        }
    }

    #[test]
    fn parse_wire_handles_settlement_suffixes() {
        assert_eq!(parse_wire("BTC-USDT-SWAP", Venue::Okx).0, "BTC/USDT");
        assert_eq!(parse_wire("ETHUSDT_UMCBL", Venue::Bitget).0, "ETH/USDT");
    }
}
