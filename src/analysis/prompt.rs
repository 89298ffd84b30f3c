//! Prompt construction for the single-call analysis.
//!
//! The system prompt carries the pre-computed technical levels and hard price
//! corridors so the model cannot wander; the user prompt carries the concrete
//! readings. Output schema is pinned to JSON.

use crate::collector::{format_macro_summary, format_news_summary, CollectedMarketData};
use crate::domain::{Language, Market};

/// Pre-computed level block shared between prompt and validation.
#[derive(Debug, Clone, Copy)]
pub struct PromptLevels {
    pub current_price: f64,
    pub support: f64,
    pub resistance: f64,
    pub pivot: f64,
    pub atr: f64,
    pub volatility_pct: f64,
    pub suggested_stop_loss: f64,
    pub suggested_take_profit: f64,
    pub risk_reward_ratio: f64,
    pub price_lower_bound: f64,
    pub price_upper_bound: f64,
    pub entry_range_low: f64,
    pub entry_range_high: f64,
}

impl PromptLevels {
    pub fn derive(data: &CollectedMarketData, current_price: f64) -> Self {
        let ind = data.indicators.as_ref();
        let support = ind
            .map(|i| i.levels.support)
            .unwrap_or(current_price * 0.95);
        let resistance = ind
            .map(|i| i.levels.resistance)
            .unwrap_or(current_price * 1.05);
        let pivot = ind.map(|i| i.levels.pivot).unwrap_or(current_price);
        let atr = ind
            .map(|i| i.volatility.atr)
            .filter(|a| *a > 0.0)
            .unwrap_or(current_price * 0.02);
        let volatility_pct = ind.map(|i| i.volatility.pct).unwrap_or(0.0);
        let suggested_stop_loss = ind
            .map(|i| i.trading_levels.suggested_stop_loss)
            .unwrap_or(current_price - 2.0 * atr);
        let suggested_take_profit = ind
            .map(|i| i.trading_levels.suggested_take_profit)
            .unwrap_or(current_price + 3.0 * atr);
        let risk_reward_ratio = ind
            .map(|i| i.trading_levels.risk_reward_ratio)
            .unwrap_or(1.5);

        Self {
            current_price,
            support,
            resistance,
            pivot,
            atr,
            volatility_pct,
            suggested_stop_loss,
            suggested_take_profit,
            risk_reward_ratio,
            price_lower_bound: suggested_stop_loss.max(current_price * 0.90),
            price_upper_bound: suggested_take_profit.min(current_price * 1.10),
            entry_range_low: current_price * 0.98,
            entry_range_high: current_price * 1.02,
        }
    }
}

fn language_instruction(language: Language) -> &'static str {
    match language {
        Language::ZhCn => {
            "IMPORTANT: You MUST answer ALL content in Simplified Chinese, including summary, key_reasons, risks and every text field. Do NOT use English."
        }
        Language::ZhTw => {
            "IMPORTANT: You MUST answer ALL content in Traditional Chinese, including summary, key_reasons, risks and every text field. Do NOT use English."
        }
        Language::EnUs => {
            "IMPORTANT: You MUST answer ALL content in English, including summary, key_reasons, risks and every text field."
        }
        Language::JaJp => {
            "IMPORTANT: You MUST answer ALL content in Japanese, including summary, key_reasons, risks and every text field."
        }
    }
}

/// Build `(system_prompt, user_prompt)` for one analysis run.
pub fn build_analysis_prompt(
    data: &CollectedMarketData,
    language: Language,
    market: Market,
    current_price: f64,
) -> (String, String) {
    let levels = PromptLevels::derive(data, current_price);
    let lang_instruction = language_instruction(language);

    let system_prompt = format!(
        r#"You are a senior financial analyst with 20+ years of experience.
Provide professional, detailed analysis like an institutional research report.

{lang_instruction}

TECHNICAL LEVELS (pre-calculated from chart data):
- Support: ${support:.4} | Resistance: ${resistance:.4} | Pivot: ${pivot:.4}
- ATR (14): ${atr:.4} ({vol_pct:.2}% volatility)
- Suggested Stop Loss: ${sl:.4} (2x ATR, floored near support)
- Suggested Take Profit: ${tp:.4} (3x ATR, capped near resistance)
- Risk/Reward Ratio: {rr:.2}

CRITICAL PRICE RULES:
1. Current price: ${current:.4}
2. Your stop_loss MUST be near ${sl:.4} (range: ${lower:.4} ~ ${current:.4})
3. Your take_profit MUST be near ${tp:.4} (range: ${current:.4} ~ ${upper:.4})
4. Entry price: ${entry_low:.4} ~ ${entry_high:.4}
5. All prices must stay within 10% of the current price.

YOUR ANALYSIS MUST INCLUDE:
1. Technical analysis: interpret the indicators and why the levels matter
2. Fundamental analysis: valuation and growth where data is available
3. Sentiment analysis: market mood, news impact, macro factors
4. Risk assessment: why the stop-loss level is appropriate
5. A clear BUY/SELL/HOLD recommendation with entry, stop loss and take profit

Output ONLY valid JSON:
{{
  "decision": "BUY" | "SELL" | "HOLD",
  "confidence": 0-100,
  "summary": "Executive summary in 2-3 sentences",
  "analysis": {{
    "technical": "Detailed technical analysis",
    "fundamental": "Fundamental assessment",
    "sentiment": "Market sentiment analysis"
  }},
  "entry_price": number,
  "stop_loss": number,
  "take_profit": number,
  "position_size_pct": 1-100,
  "timeframe": "short" | "medium" | "long",
  "key_reasons": ["reason 1", "reason 2", "reason 3"],
  "risks": ["primary risk", "secondary risk"],
  "technical_score": 0-100,
  "fundamental_score": 0-100,
  "sentiment_score": 0-100
}}"#,
        lang_instruction = lang_instruction,
        support = levels.support,
        resistance = levels.resistance,
        pivot = levels.pivot,
        atr = levels.atr,
        vol_pct = levels.volatility_pct,
        sl = levels.suggested_stop_loss,
        tp = levels.suggested_take_profit,
        rr = levels.risk_reward_ratio,
        current = levels.current_price,
        lower = levels.price_lower_bound,
        upper = levels.price_upper_bound,
        entry_low = levels.entry_range_low,
        entry_high = levels.entry_range_high,
    );

    let change_24h = data.price.as_ref().map(|p| p.change_percent).unwrap_or(0.0);
    let ind = data.indicators.as_ref();
    let rsi_line = ind
        .and_then(|i| i.rsi.as_ref())
        .map(|r| format!("{:.2} ({})", r.value, r.signal))
        .unwrap_or_else(|| "N/A".to_string());
    let macd_line = ind
        .and_then(|i| i.macd.as_ref())
        .map(|m| format!("{} ({})", m.signal, m.trend))
        .unwrap_or_else(|| "N/A".to_string());
    let ma_trend = ind
        .map(|i| i.moving_averages.trend.clone())
        .unwrap_or_else(|| "N/A".to_string());
    let vol_line = ind
        .map(|i| format!("{} ({:.2}%)", i.volatility.level, i.volatility.pct))
        .unwrap_or_else(|| "N/A".to_string());
    let trend = ind
        .map(|i| i.trend.clone())
        .unwrap_or_else(|| "N/A".to_string());
    let price_position = ind
        .and_then(|i| i.price_position)
        .map(|p| format!("{:.1}%", p))
        .unwrap_or_else(|| "N/A".to_string());

    let macro_summary = format_macro_summary(&data.macro_data, market);
    let news_summary = format_news_summary(&data.news, 5);

    let company_name = data.company["name"]
        .as_str()
        .unwrap_or(&data.symbol)
        .to_string();
    let fmt_field = |key: &str| -> String {
        match &data.fundamental[key] {
            serde_json::Value::Null => "N/A".to_string(),
            v => v.to_string().trim_matches('"').to_string(),
        }
    };

    let user_prompt = format!(
        r#"Analyze {symbol} in the {market} market.

REAL-TIME DATA:
- Current Price: ${current:.4}
- 24h Change: {change:.2}%
- Support: ${support:.4}
- Resistance: ${resistance:.4}

TECHNICAL INDICATORS:
- RSI(14): {rsi}
- MACD: {macd}
- MA Trend: {ma_trend}
- Volatility: {vol}
- Trend: {trend}
- Price Position (20 bars): {price_position}

MACRO ENVIRONMENT:
{macro_summary}

MARKET NEWS ({news_count} items):
{news_summary}

FUNDAMENTALS:
- Company: {company}
- Industry: {industry}
- P/E Ratio: {pe}
- P/B Ratio: {pb}
- Market Cap: {mcap}
- 52W High/Low: {high_52w} / {low_52w}
- ROE: {roe}

IMPORTANT: weigh the macro environment (especially DXY, VIX and rates) in
your recommendation. All prices must be within 10% of ${current:.4}."#,
        symbol = data.symbol,
        market = data.market,
        current = levels.current_price,
        change = change_24h,
        support = levels.support,
        resistance = levels.resistance,
        rsi = rsi_line,
        macd = macd_line,
        ma_trend = ma_trend,
        vol = vol_line,
        trend = trend,
        price_position = price_position,
        macro_summary = macro_summary,
        news_count = data.news.len(),
        news_summary = news_summary,
        company = company_name,
        industry = data.company["industry"].as_str().unwrap_or("N/A"),
        pe = fmt_field("pe_ratio"),
        pb = fmt_field("pb_ratio"),
        mcap = fmt_field("market_cap"),
        high_52w = fmt_field("52w_high"),
        low_52w = fmt_field("52w_low"),
        roe = fmt_field("roe"),
    );

    (system_prompt, user_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Timeframe};

    fn sample_data() -> CollectedMarketData {
        let bars: Vec<Bar> = (0..40)
            .map(|i| {
                let c = 90000.0 + i as f64 * 150.0;
                Bar::new(i as i64 * 86400, c - 100.0, c + 200.0, c - 300.0, c, 1000.0)
            })
            .collect();
        let indicators = crate::indicators::compute(&bars);
        CollectedMarketData {
            market: "Crypto".to_string(),
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::D1.as_str().to_string(),
            collected_at: "2026-01-01 00:00:00".to_string(),
            price: None,
            kline: bars,
            indicators,
            fundamental: serde_json::Value::Null,
            company: serde_json::Value::Null,
            macro_data: Default::default(),
            news: Vec::new(),
            sentiment: serde_json::Value::Null,
            polymarket: Vec::new(),
            meta: Default::default(),
        }
    }

    #[test]
    fn corridors_are_ten_and_two_percent() {
        let data = sample_data();
        let current = data.effective_price().unwrap();
        let levels = PromptLevels::derive(&data, current);
        assert!(levels.price_lower_bound >= current * 0.90 - 1e-6);
        assert!(levels.price_upper_bound <= current * 1.10 + 1e-6);
        assert!((levels.entry_range_low - current * 0.98).abs() < 1e-6);
        assert!((levels.entry_range_high - current * 1.02).abs() < 1e-6);
    }

    #[test]
    fn prompt_contains_schema_and_rules() {
        let data = sample_data();
        let current = data.effective_price().unwrap();
        let (system, user) = build_analysis_prompt(&data, Language::EnUs, Market::Crypto, current);
        assert!(system.contains("\"decision\": \"BUY\" | \"SELL\" | \"HOLD\""));
        assert!(system.contains("within 10% of the current price"));
        assert!(user.contains("BTC/USDT"));
        assert!(user.contains("RSI(14):"));
    }

    #[test]
    fn prompt_respects_language_selection() {
        let data = sample_data();
        let current = data.effective_price().unwrap();
        let (system, _) = build_analysis_prompt(&data, Language::JaJp, Market::Crypto, current);
        assert!(system.contains("Japanese"));
    }

    #[test]
    fn missing_indicators_fall_back_to_percent_levels() {
        let mut data = sample_data();
        data.indicators = None;
        let levels = PromptLevels::derive(&data, 100.0);
        assert!((levels.support - 95.0).abs() < 1e-9);
        assert!((levels.resistance - 105.0).abs() < 1e-9);
        assert!((levels.atr - 2.0).abs() < 1e-9);
    }
}
