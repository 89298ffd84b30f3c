use serde::{Deserialize, Serialize};

/// Quote currencies tried when splitting a glued pair, in priority order.
pub const COMMON_QUOTES: [&str; 9] = [
    "USDT", "USD", "BTC", "ETH", "BUSD", "USDC", "BNB", "EUR", "GBP",
];

/// A normalized `BASE/QUOTE` pair, uppercase, no settlement suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalSymbol {
    pub base: String,
    pub quote: String,
}

impl CanonicalSymbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    pub fn pair(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Parse any accepted raw form. Returns `None` for unresolvable input.
    pub fn parse(raw: &str) -> Option<Self> {
        let (pair, base) = normalize(raw);
        if pair.is_empty() || base.is_empty() {
            return None;
        }
        let quote = pair.split('/').nth(1)?.to_string();
        Some(Self { base, quote })
    }
}

impl std::fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Normalize a raw symbol into `(canonical_pair, base)`.
///
/// Accepted inputs: `BTC/USDT`, `BTCUSDT`, `BTC/USDT:USDT`, bare `BTC`.
/// A bare base defaults to `BASE/USDT`. Total: unresolvable input yields
/// `("", "")`, never an error.
pub fn normalize(raw: &str) -> (String, String) {
    let sym = raw.trim();
    if sym.is_empty() {
        return (String::new(), String::new());
    }

    // Drop swap/futures settlement suffix (e.g. BTC/USDT:USDT)
    let sym = match sym.split_once(':') {
        Some((head, _)) => head,
        None => sym,
    };
    let sym = sym.trim().to_uppercase();
    if sym.is_empty() {
        return (String::new(), String::new());
    }

    if let Some((base, quote)) = sym.split_once('/') {
        let base = base.trim();
        let quote = quote.trim();
        if !base.is_empty() && !quote.is_empty() {
            return (format!("{}/{}", base, quote), base.to_string());
        }
        return (String::new(), String::new());
    }

    // Glued pair: bisect on the longest known quote suffix by priority
    for quote in COMMON_QUOTES {
        if sym.len() > quote.len() && sym.ends_with(quote) {
            let base = &sym[..sym.len() - quote.len()];
            if !base.is_empty() {
                return (format!("{}/{}", base, quote), base.to_string());
            }
        }
    }

    // Bare base defaults to USDT quote
    (format!("{}/USDT", sym), sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_all_accepted_forms() {
        assert_eq!(
            normalize("BTC/USDT"),
            ("BTC/USDT".to_string(), "BTC".to_string())
        );
        assert_eq!(
            normalize("BTCUSDT"),
            ("BTC/USDT".to_string(), "BTC".to_string())
        );
        assert_eq!(
            normalize("BTC/USDT:USDT"),
            ("BTC/USDT".to_string(), "BTC".to_string())
        );
        assert_eq!(normalize("btc"), ("BTC/USDT".to_string(), "BTC".to_string()));
        assert_eq!(normalize("PI"), ("PI/USDT".to_string(), "PI".to_string()));
    }

    #[test]
    fn normalize_prefers_priority_quotes() {
        assert_eq!(
            normalize("ETHBTC"),
            ("ETH/BTC".to_string(), "ETH".to_string())
        );
        assert_eq!(
            normalize("EURUSD"),
            ("EUR/USD".to_string(), "EUR".to_string())
        );
    }

    #[test]
    fn normalize_is_total_on_junk() {
        assert_eq!(normalize(""), (String::new(), String::new()));
        assert_eq!(normalize("   "), (String::new(), String::new()));
        assert_eq!(normalize("/USDT"), (String::new(), String::new()));
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["BTC/USDT", "BTCUSDT", "SOL", "ETH/USDT:USDT", "DOGEUSD"] {
            let (first, _) = normalize(raw);
            let (second, _) = normalize(&first);
            assert_eq!(first, second, "not idempotent for {raw}");
        }
    }

    #[test]
    fn canonical_symbol_parse() {
        let sym = CanonicalSymbol::parse("solusdt").expect("should parse");
        assert_eq!(sym.base, "SOL");
        assert_eq!(sym.quote, "USDT");
        assert_eq!(sym.pair(), "SOL/USDT");
        assert!(CanonicalSymbol::parse("").is_none());
    }
}
