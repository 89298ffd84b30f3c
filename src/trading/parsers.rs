//! Defensive parsers for venue balance and position payloads. Every venue
//! returns a different shape, so fields are probed in priority order and the
//! output is a uniform structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedBalance {
    pub available: f64,
    pub total: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ParsedBalance {
    fn default() -> Self {
        Self {
            available: 0.0,
            total: 0.0,
            currency: "USDT".to_string(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPosition {
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub mark_price: f64,
}

fn num(v: &Value) -> f64 {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

fn first_num(item: &Value, keys: &[&str]) -> f64 {
    for key in keys {
        let x = num(&item[*key]);
        if x != 0.0 {
            return x;
        }
    }
    0.0
}

/// Best-effort USDT balance extraction across venue payload shapes.
pub fn parse_balance(raw: &Value) -> ParsedBalance {
    let mut result = ParsedBalance::default();
    if raw.is_null() {
        return result;
    }

    // Binance futures account
    if !raw["availableBalance"].is_null() {
        result.available = num(&raw["availableBalance"]);
        result.total = first_num(raw, &["totalWalletBalance", "totalMarginBalance"]);
        return result;
    }

    // Binance spot account
    if let Some(balances) = raw["balances"].as_array() {
        for b in balances {
            if b["asset"].as_str().map(|a| a.eq_ignore_ascii_case("USDT")) == Some(true) {
                let free = num(&b["free"]);
                result.available = free;
                result.total = free + num(&b["locked"]);
                return result;
            }
        }
        return result;
    }

    // OKX account balance: data[0].details[].{availBal, eq}
    if let Some(data) = raw["data"].as_array() {
        if let Some(first) = data.first() {
            if let Some(details) = first["details"].as_array() {
                for d in details {
                    if d["ccy"].as_str().map(|c| c.eq_ignore_ascii_case("USDT")) == Some(true) {
                        result.available = first_num(d, &["availBal", "availEq"]);
                        result.total = first_num(d, &["eq", "cashBal"]);
                        return result;
                    }
                }
            }
            // Bitget mix accounts land here too: data[].{available, ...}
            if !first["available"].is_null() || !first["availBal"].is_null() {
                result.available = first_num(first, &["available", "availBal", "totalEq"]);
                result.total = first_num(
                    first,
                    &["accountEquity", "usdtEquity", "totalEq", "available"],
                );
                return result;
            }
            // Bitget spot assets: data[] per coin
            for item in data {
                if item["coin"].as_str().map(|c| c.eq_ignore_ascii_case("USDT")) == Some(true) {
                    result.available = first_num(item, &["available", "free"]);
                    result.total = result.available + num(&item["frozen"]);
                    return result;
                }
            }
        }
    }

    // Bybit unified wallet: result.list[].coin[].{availableToWithdraw, walletBalance}
    if let Some(list) = raw["result"]["list"].as_array() {
        for account in list {
            if let Some(coins) = account["coin"].as_array() {
                for c in coins {
                    if c["coin"].as_str().map(|x| x.eq_ignore_ascii_case("USDT")) == Some(true) {
                        result.available = first_num(c, &["availableToWithdraw", "walletBalance"]);
                        result.total = num(&c["walletBalance"]);
                        return result;
                    }
                }
            }
        }
    }

    // Gate futures account is a flat object
    if !raw["available"].is_null() && raw["currency"].as_str() == Some("USDT") {
        result.available = num(&raw["available"]);
        result.total = num(&raw["total"]);
        return result;
    }

    // Last resort: scan for avail/total-looking keys
    if let Some(obj) = raw.as_object() {
        for (k, v) in obj {
            let key = k.to_lowercase();
            if key.contains("avail") {
                let x = num(v);
                if x != 0.0 {
                    result.available = x;
                }
            }
            if key.contains("total") {
                let x = num(v);
                if x != 0.0 {
                    result.total = x;
                }
            }
        }
    }
    result
}

/// Best-effort position list extraction across venue payload shapes.
pub fn parse_positions(raw: &Value) -> Vec<ParsedPosition> {
    let items: Vec<Value> = if let Some(list) = raw.as_array() {
        list.clone()
    } else {
        let data = &raw["data"];
        let result = &raw["result"];
        if let Some(list) = data.as_array() {
            list.clone()
        } else if let Some(list) = result["list"].as_array() {
            list.clone()
        } else if let Some(list) = result.as_array() {
            list.clone()
        } else if data.is_object() {
            vec![data.clone()]
        } else {
            Vec::new()
        }
    };

    let mut out = Vec::new();
    for item in &items {
        if !item.is_object() {
            continue;
        }
        let size = first_num(
            item,
            &["posAmt", "pos", "positionAmt", "size", "contracts", "total", "bal", "availBal"],
        );
        if size.abs() < 1e-10 {
            continue;
        }

        let mut side = if size < 0.0 { "short" } else { "long" };
        if let Some(pos_side) = item["posSide"]
            .as_str()
            .or_else(|| item["holdSide"].as_str())
            .or_else(|| item["side"].as_str())
        {
            let normalized = pos_side.trim().to_lowercase();
            if normalized == "long" || normalized == "short" {
                side = if normalized == "long" { "long" } else { "short" };
            } else if normalized == "sell" {
                side = "short";
            }
        }

        out.push(ParsedPosition {
            symbol: item["symbol"]
                .as_str()
                .or_else(|| item["instId"].as_str())
                .or_else(|| item["contract"].as_str())
                .unwrap_or_default()
                .to_string(),
            side: side.to_string(),
            size: size.abs(),
            entry_price: first_num(
                item,
                &["entryPrice", "avgCost", "avgPx", "avgOpenPrice", "entry_price", "openPriceAvg"],
            ),
            unrealized_pnl: first_num(
                item,
                &["unRealizedProfit", "upl", "unrealisedPnl", "unrealizedPL", "unrealised_pnl", "pnl"],
            ),
            leverage: {
                let lv = first_num(item, &["leverage", "lever"]);
                if lv > 0.0 {
                    lv
                } else {
                    1.0
                }
            },
            mark_price: first_num(item, &["markPrice", "markPx", "mark_price", "last"]),
        });
    }
    out
}

/// Match a ledger symbol ("ETH/USDT") against a venue position symbol
/// ("ETHUSDT", "ETH-USDT-SWAP", "ETH_USDT").
pub fn symbol_matches(requested: &str, position_symbol: &str) -> bool {
    let strip = |s: &str| {
        s.to_uppercase()
            .replace(['/', '-', '_'], "")
            .replace("SWAP", "")
            .replace("UMCBL", "")
            .replace("SPBL", "")
    };
    let requested = strip(requested);
    let position = strip(position_symbol);
    !requested.is_empty() && position.contains(&requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binance_futures_balance() {
        let raw = json!({"availableBalance": "150.5", "totalWalletBalance": "200.0"});
        let b = parse_balance(&raw);
        assert_eq!(b.available, 150.5);
        assert_eq!(b.total, 200.0);
    }

    #[test]
    fn binance_spot_balance_finds_usdt() {
        let raw = json!({"balances": [
            {"asset": "BTC", "free": "1", "locked": "0"},
            {"asset": "USDT", "free": "100", "locked": "25"}
        ]});
        let b = parse_balance(&raw);
        assert_eq!(b.available, 100.0);
        assert_eq!(b.total, 125.0);
    }

    #[test]
    fn okx_balance_reads_details() {
        let raw = json!({"data": [{"details": [
            {"ccy": "USDT", "availBal": "75.5", "eq": "80"}
        ]}]});
        let b = parse_balance(&raw);
        assert_eq!(b.available, 75.5);
        assert_eq!(b.total, 80.0);
    }

    #[test]
    fn bybit_balance_walks_coin_list() {
        let raw = json!({"result": {"list": [{"coin": [
            {"coin": "USDT", "availableToWithdraw": "42", "walletBalance": "50"}
        ]}]}});
        let b = parse_balance(&raw);
        assert_eq!(b.available, 42.0);
        assert_eq!(b.total, 50.0);
    }

    #[test]
    fn unknown_shape_yields_zeroes() {
        let b = parse_balance(&json!({"weird": true}));
        assert_eq!(b.available, 0.0);
        assert_eq!(b.currency, "USDT");
    }

    #[test]
    fn positions_from_binance_shape() {
        let raw = json!([{
            "symbol": "ETHUSDT",
            "positionAmt": "-2.5",
            "entryPrice": "2400",
            "unRealizedProfit": "12.5",
            "leverage": "10",
            "markPrice": "2395"
        }]);
        let positions = parse_positions(&raw);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, "short");
        assert_eq!(positions[0].size, 2.5);
        assert_eq!(positions[0].leverage, 10.0);
    }

    #[test]
    fn positions_respect_pos_side_field() {
        let raw = json!({"data": [{
            "instId": "BTC-USDT-SWAP",
            "pos": "0.5",
            "posSide": "short",
            "avgPx": "60000"
        }]});
        let positions = parse_positions(&raw);
        assert_eq!(positions[0].side, "short");
        assert_eq!(positions[0].entry_price, 60000.0);
    }

    #[test]
    fn dust_positions_are_skipped() {
        let raw = json!([{"symbol": "BTCUSDT", "positionAmt": "0.0000000001"}]);
        assert!(parse_positions(&raw).is_empty());
    }

    #[test]
    fn symbol_matching_across_wire_forms() {
        assert!(symbol_matches("ETH/USDT", "ETHUSDT"));
        assert!(symbol_matches("ETH/USDT", "ETH-USDT-SWAP"));
        assert!(symbol_matches("ETH/USDT", "ETHUSDT_UMCBL"));
        assert!(!symbol_matches("BTC/USDT", "ETHUSDT"));
    }
}
