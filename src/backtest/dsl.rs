//! Indicator script DSL.
//!
//! A small expression language over candle series replacing arbitrary code
//! execution: assignments of vector expressions to named columns, with the
//! usual indicator helpers. The behavioral contract is the produced column
//! set (`buy`/`sell` or the 4-way booleans) and a bounded wall clock.
//!
//! ```text
//! fast = SMA(close, 5)
//! slow = SMA(close, 20)
//! buy = CROSSOVER(fast, slow)
//! sell = CROSSUNDER(fast, slow)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::Bar;
use crate::error::{QuantdeskError, Result};

#[derive(Debug, Clone)]
pub enum ScriptSignals {
    FourWay {
        open_long: Vec<bool>,
        close_long: Vec<bool>,
        open_short: Vec<bool>,
        close_short: Vec<bool>,
    },
    BuySell {
        buy: Vec<bool>,
        sell: Vec<bool>,
    },
}

#[derive(Debug, Clone)]
enum Value {
    Num(Vec<f64>),
    Bool(Vec<bool>),
    Scalar(f64),
}

impl Value {
    fn as_num(&self, len: usize) -> Result<Vec<f64>> {
        match self {
            Value::Num(v) => Ok(v.clone()),
            Value::Scalar(x) => Ok(vec![*x; len]),
            Value::Bool(_) => Err(script_err("expected a numeric series, found boolean")),
        }
    }

    fn as_bool(&self, len: usize) -> Result<Vec<bool>> {
        match self {
            Value::Bool(v) => Ok(v.clone()),
            Value::Num(v) => Ok(v.iter().map(|x| *x != 0.0 && !x.is_nan()).collect()),
            Value::Scalar(x) => Ok(vec![*x != 0.0; len]),
        }
    }
}

fn script_err(msg: impl Into<String>) -> QuantdeskError {
    QuantdeskError::StrategyScript(msg.into())
}

/// Evaluate an indicator script against candles. `budget` bounds wall-clock.
pub fn run_script(code: &str, bars: &[Bar], budget: Duration) -> Result<ScriptSignals> {
    if bars.is_empty() {
        return Err(script_err("no candle data"));
    }
    let deadline = Instant::now() + budget;
    let len = bars.len();

    let mut env: HashMap<String, Value> = HashMap::new();
    env.insert(
        "open".to_string(),
        Value::Num(bars.iter().map(|b| b.open).collect()),
    );
    env.insert(
        "high".to_string(),
        Value::Num(bars.iter().map(|b| b.high).collect()),
    );
    env.insert(
        "low".to_string(),
        Value::Num(bars.iter().map(|b| b.low).collect()),
    );
    env.insert(
        "close".to_string(),
        Value::Num(bars.iter().map(|b| b.close).collect()),
    );
    env.insert(
        "volume".to_string(),
        Value::Num(bars.iter().map(|b| b.volume).collect()),
    );

    for (line_no, raw_line) in code.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("");
        for statement in line.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            if Instant::now() > deadline {
                return Err(QuantdeskError::Timeout(
                    "indicator evaluation exceeded budget".to_string(),
                ));
            }
            let (name, expr) = statement.split_once('=').ok_or_else(|| {
                script_err(format!(
                    "line {}: expected `name = expression`",
                    line_no + 1
                ))
            })?;
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(script_err(format!("line {}: bad identifier", line_no + 1)));
            }
            let mut parser = Parser::new(expr, len, &env);
            let value = parser.parse_expression(0)?;
            parser.expect_end()?;
            env.insert(name.to_string(), value);
        }
    }

    extract_signals(&env, len)
}

fn extract_signals(env: &HashMap<String, Value>, len: usize) -> Result<ScriptSignals> {
    let get_bool = |name: &str| -> Result<Option<Vec<bool>>> {
        match env.get(name) {
            Some(v) => Ok(Some(v.as_bool(len)?)),
            None => Ok(None),
        }
    };

    let open_long = get_bool("open_long")?;
    let close_long = get_bool("close_long")?;
    let open_short = get_bool("open_short")?;
    let close_short = get_bool("close_short")?;
    if open_long.is_some() || close_long.is_some() || open_short.is_some() || close_short.is_some()
    {
        return Ok(ScriptSignals::FourWay {
            open_long: open_long.unwrap_or_else(|| vec![false; len]),
            close_long: close_long.unwrap_or_else(|| vec![false; len]),
            open_short: open_short.unwrap_or_else(|| vec![false; len]),
            close_short: close_short.unwrap_or_else(|| vec![false; len]),
        });
    }

    let buy = get_bool("buy")?;
    let sell = get_bool("sell")?;
    if buy.is_some() || sell.is_some() {
        return Ok(ScriptSignals::BuySell {
            buy: buy.unwrap_or_else(|| vec![false; len]),
            sell: sell.unwrap_or_else(|| vec![false; len]),
        });
    }

    Err(script_err(
        "script must assign `buy`/`sell` or `open_long`/`close_long`/`open_short`/`close_short`",
    ))
}

// ---------------------------------------------------------------------------
// Expression parser (precedence climbing)
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    len: usize,
    env: &'a HashMap<String, Value>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, len: usize, env: &'a HashMap<String, Value>) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            len,
            env,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn starts_with(&mut self, s: &str) -> bool {
        self.skip_ws();
        self.input[self.pos..].starts_with(s.as_bytes())
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        self.skip_ws();
        if self.pos < self.input.len() {
            return Err(script_err(format!(
                "unexpected trailing input: {}",
                String::from_utf8_lossy(&self.input[self.pos..])
            )));
        }
        Ok(())
    }

    /// Binding powers: | = 1, & = 2, comparisons = 3, +- = 4, */ = 5
    fn parse_expression(&mut self, min_bp: u8) -> Result<Value> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, bp): (&str, u8) = {
                if self.starts_with("||") || self.starts_with("|") {
                    ("|", 1)
                } else if self.starts_with("&&") || self.starts_with("&") {
                    ("&", 2)
                } else if self.starts_with(">=") {
                    (">=", 3)
                } else if self.starts_with("<=") {
                    ("<=", 3)
                } else if self.starts_with("==") {
                    ("==", 3)
                } else if self.starts_with("!=") {
                    ("!=", 3)
                } else if self.starts_with(">") {
                    (">", 3)
                } else if self.starts_with("<") {
                    ("<", 3)
                } else if self.starts_with("+") {
                    ("+", 4)
                } else if self.starts_with("-") {
                    ("-", 4)
                } else if self.starts_with("*") {
                    ("*", 5)
                } else if self.starts_with("/") {
                    ("/", 5)
                } else {
                    break;
                }
            };
            if bp < min_bp {
                break;
            }
            // Consume the operator (|| and && consume both chars)
            if op == "|" {
                let _ = self.eat("||") || self.eat("|");
            } else if op == "&" {
                let _ = self.eat("&&") || self.eat("&");
            } else {
                self.eat(op);
            }
            let rhs = self.parse_expression(bp + 1)?;
            lhs = self.apply_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Value> {
        if self.eat("!") {
            let inner = self.parse_unary()?;
            let b = inner.as_bool(self.len)?;
            return Ok(Value::Bool(b.into_iter().map(|x| !x).collect()));
        }
        if self.eat("-") {
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Value::Scalar(x) => Value::Scalar(-x),
                other => Value::Num(other.as_num(self.len)?.into_iter().map(|x| -x).collect()),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Value> {
        match self.peek() {
            Some(b'(') => {
                self.eat("(");
                let inner = self.parse_expression(0)?;
                if !self.eat(")") {
                    return Err(script_err("missing closing parenthesis"));
                }
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.parse_ident_or_call(),
            other => Err(script_err(format!("unexpected token: {:?}", other.map(char::from)))),
        }
    }

    fn parse_number(&mut self) -> Result<Value> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_digit() || self.input[self.pos] == b'.')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("");
        text.parse::<f64>()
            .map(Value::Scalar)
            .map_err(|_| script_err(format!("bad number: {}", text)))
    }

    fn parse_ident_or_call(&mut self) -> Result<Value> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.input[start..self.pos])
            .unwrap_or("")
            .to_string();

        if self.peek() == Some(b'(') {
            self.eat("(");
            let mut args = Vec::new();
            if self.peek() != Some(b')') {
                loop {
                    args.push(self.parse_expression(0)?);
                    if !self.eat(",") {
                        break;
                    }
                }
            }
            if !self.eat(")") {
                return Err(script_err(format!("missing `)` after {}", name)));
            }
            return self.call_function(&name.to_uppercase(), args);
        }

        match name.to_ascii_lowercase().as_str() {
            "true" => return Ok(Value::Bool(vec![true; self.len])),
            "false" => return Ok(Value::Bool(vec![false; self.len])),
            _ => {}
        }
        self.env
            .get(&name)
            .cloned()
            .ok_or_else(|| script_err(format!("unknown identifier: {}", name)))
    }

    fn apply_binary(&self, op: &str, lhs: Value, rhs: Value) -> Result<Value> {
        match op {
            "&" | "|" => {
                let a = lhs.as_bool(self.len)?;
                let b = rhs.as_bool(self.len)?;
                let out = a
                    .iter()
                    .zip(&b)
                    .map(|(x, y)| if op == "&" { *x && *y } else { *x || *y })
                    .collect();
                Ok(Value::Bool(out))
            }
            ">" | "<" | ">=" | "<=" | "==" | "!=" => {
                let a = lhs.as_num(self.len)?;
                let b = rhs.as_num(self.len)?;
                let out = a
                    .iter()
                    .zip(&b)
                    .map(|(x, y)| {
                        if x.is_nan() || y.is_nan() {
                            return false;
                        }
                        match op {
                            ">" => x > y,
                            "<" => x < y,
                            ">=" => x >= y,
                            "<=" => x <= y,
                            "==" => (x - y).abs() < f64::EPSILON,
                            _ => (x - y).abs() >= f64::EPSILON,
                        }
                    })
                    .collect();
                Ok(Value::Bool(out))
            }
            "+" | "-" | "*" | "/" => {
                if let (Value::Scalar(a), Value::Scalar(b)) = (&lhs, &rhs) {
                    return Ok(Value::Scalar(scalar_op(op, *a, *b)));
                }
                let a = lhs.as_num(self.len)?;
                let b = rhs.as_num(self.len)?;
                let out = a
                    .iter()
                    .zip(&b)
                    .map(|(x, y)| scalar_op(op, *x, *y))
                    .collect();
                Ok(Value::Num(out))
            }
            _ => Err(script_err(format!("unknown operator: {}", op))),
        }
    }

    fn call_function(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let num = |v: &Value| v.as_num(self.len);
        let period = |v: &Value| -> Result<usize> {
            match v {
                Value::Scalar(x) if *x >= 1.0 => Ok(*x as usize),
                _ => Err(script_err(format!("{}: period must be a positive number", name))),
            }
        };

        match (name, args.len()) {
            ("SMA", 2) => Ok(Value::Num(sma(&num(&args[0])?, period(&args[1])?))),
            ("EMA", 2) => Ok(Value::Num(ema(&num(&args[0])?, period(&args[1])?))),
            ("RSI", 2) => Ok(Value::Num(rsi(&num(&args[0])?, period(&args[1])?))),
            ("MACD", 4) | ("MACD_SIGNAL", 4) | ("MACD_HIST", 4) => {
                let series = num(&args[0])?;
                let fast = period(&args[1])?;
                let slow = period(&args[2])?;
                let signal = period(&args[3])?;
                let fast_ema = ema(&series, fast);
                let slow_ema = ema(&series, slow);
                let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(a, b)| a - b).collect();
                match name {
                    "MACD" => Ok(Value::Num(line)),
                    "MACD_SIGNAL" => Ok(Value::Num(ema(&line, signal))),
                    _ => {
                        let sig = ema(&line, signal);
                        Ok(Value::Num(
                            line.iter().zip(&sig).map(|(a, b)| a - b).collect(),
                        ))
                    }
                }
            }
            ("BOLL_UPPER", 3) | ("BOLL_MIDDLE", 3) | ("BOLL_LOWER", 3) => {
                let series = num(&args[0])?;
                let n = period(&args[1])?;
                let k = match &args[2] {
                    Value::Scalar(x) => *x,
                    _ => return Err(script_err("BOLL: k must be a number")),
                };
                let (upper, middle, lower) = bollinger(&series, n, k);
                Ok(Value::Num(match name {
                    "BOLL_UPPER" => upper,
                    "BOLL_MIDDLE" => middle,
                    _ => lower,
                }))
            }
            ("ATR", 4) => Ok(Value::Num(atr(
                &num(&args[0])?,
                &num(&args[1])?,
                &num(&args[2])?,
                period(&args[3])?,
            ))),
            ("CROSSOVER", 2) => Ok(Value::Bool(crossover(&num(&args[0])?, &num(&args[1])?))),
            ("CROSSUNDER", 2) => Ok(Value::Bool(crossover(&num(&args[1])?, &num(&args[0])?))),
            ("SHIFT", 2) => {
                let series = num(&args[0])?;
                let n = period(&args[1])?;
                let mut out = vec![f64::NAN; series.len()];
                for i in n..series.len() {
                    out[i] = series[i - n];
                }
                Ok(Value::Num(out))
            }
            ("ABS", 1) => Ok(Value::Num(
                num(&args[0])?.into_iter().map(f64::abs).collect(),
            )),
            _ => Err(script_err(format!(
                "unknown function or wrong arity: {}/{}",
                name,
                args.len()
            ))),
        }
    }
}

fn scalar_op(op: &str, x: f64, y: f64) -> f64 {
    match op {
        "+" => x + y,
        "-" => x - y,
        "*" => x * y,
        _ => {
            if y == 0.0 {
                f64::NAN
            } else {
                x / y
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rolling helpers (NaN during warmup, like dataframe rolling windows)
// ---------------------------------------------------------------------------

fn sma(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if n == 0 || series.len() < n {
        return out;
    }
    let mut sum: f64 = series[..n].iter().sum();
    out[n - 1] = sum / n as f64;
    for i in n..series.len() {
        sum += series[i] - series[i - n];
        out[i] = sum / n as f64;
    }
    out
}

fn ema(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    if series.is_empty() {
        return out;
    }
    let multiplier = 2.0 / (n as f64 + 1.0);
    out.push(series[0]);
    for &x in &series[1..] {
        let prev = *out.last().unwrap();
        if prev.is_nan() {
            out.push(x);
        } else {
            out.push((x - prev) * multiplier + prev);
        }
    }
    out
}

fn rsi(series: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if series.len() <= n {
        return out;
    }
    for i in n..series.len() {
        let window = &series[i - n..=i];
        let mut gains = 0.0;
        let mut losses = 0.0;
        for pair in window.windows(2) {
            let d = pair[1] - pair[0];
            if d > 0.0 {
                gains += d;
            } else {
                losses -= d;
            }
        }
        let avg_gain = gains / n as f64;
        let avg_loss = losses / n as f64;
        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
    }
    out
}

fn bollinger(series: &[f64], n: usize, k: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = sma(series, n);
    let mut upper = vec![f64::NAN; series.len()];
    let mut lower = vec![f64::NAN; series.len()];
    for i in 0..series.len() {
        if middle[i].is_nan() || i + 1 < n {
            continue;
        }
        let window = &series[i + 1 - n..=i];
        let mean = middle[i];
        let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let std = variance.sqrt();
        upper[i] = mean + k * std;
        lower[i] = mean - k * std;
    }
    (upper, middle, lower)
}

fn atr(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Vec<f64> {
    let len = high.len().min(low.len()).min(close.len());
    let mut tr = vec![f64::NAN; len];
    for i in 0..len {
        tr[i] = if i == 0 {
            high[i] - low[i]
        } else {
            (high[i] - low[i])
                .max((high[i] - close[i - 1]).abs())
                .max((low[i] - close[i - 1]).abs())
        };
    }
    sma(&tr, n)
}

fn crossover(a: &[f64], b: &[f64]) -> Vec<bool> {
    let len = a.len().min(b.len());
    let mut out = vec![false; len];
    for i in 1..len {
        if a[i].is_nan() || b[i].is_nan() || a[i - 1].is_nan() || b[i - 1].is_nan() {
            continue;
        }
        out[i] = a[i] > b[i] && a[i - 1] <= b[i - 1];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(i as i64 * 60, c, c + 1.0, c - 1.0, c, 100.0))
            .collect()
    }

    const BUDGET: Duration = Duration::from_secs(15);

    #[test]
    fn sma_crossover_strategy_produces_buy_sell() {
        // Rise then fall so the fast average crosses the slow both ways
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..30).map(|i| 130.0 - i as f64));
        let bars = bars_from_closes(&closes);
        let code = r#"
            fast = SMA(close, 3)
            slow = SMA(close, 10)
            buy = CROSSOVER(fast, slow)
            sell = CROSSUNDER(fast, slow)
        "#;
        let signals = run_script(code, &bars, BUDGET).unwrap();
        match signals {
            ScriptSignals::BuySell { buy, sell } => {
                assert!(sell.iter().any(|x| *x), "expected at least one sell");
                assert_eq!(buy.len(), bars.len());
            }
            _ => panic!("expected buy/sell signals"),
        }
    }

    #[test]
    fn four_way_columns_win_over_buy_sell() {
        let bars = bars_from_closes(&[1.0; 10]);
        let code = "open_long = close > 0\nclose_long = close < 0\nbuy = close > 0";
        match run_script(code, &bars, BUDGET).unwrap() {
            ScriptSignals::FourWay { open_long, open_short, .. } => {
                assert!(open_long.iter().all(|x| *x));
                assert!(open_short.iter().all(|x| !x));
            }
            _ => panic!("expected 4-way signals"),
        }
    }

    #[test]
    fn rsi_thresholds_with_boolean_ops() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 7) as f64 - 3.0).collect();
        let bars = bars_from_closes(&closes);
        let code = "r = RSI(close, 14)\nbuy = r < 30\nsell = r > 70 & close > 100";
        assert!(run_script(code, &bars, BUDGET).is_ok());
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let bars = bars_from_closes(&[1.0; 5]);
        let err = run_script("buy = closee > 0", &bars, BUDGET).unwrap_err();
        assert!(err.to_string().contains("closee"));
    }

    #[test]
    fn missing_output_columns_is_an_error() {
        let bars = bars_from_closes(&[1.0; 5]);
        let err = run_script("x = SMA(close, 2)", &bars, BUDGET).unwrap_err();
        assert!(err.to_string().contains("buy"));
    }

    #[test]
    fn comments_and_semicolons_are_accepted() {
        let bars = bars_from_closes(&[1.0; 10]);
        let code = "# comment line\nbuy = close > 0; sell = close < 0 # tail comment";
        assert!(run_script(code, &bars, BUDGET).is_ok());
    }

    #[test]
    fn arithmetic_and_precedence() {
        let bars = bars_from_closes(&[10.0; 5]);
        // close * 2 + 5 = 25 > 24
        match run_script("buy = close * 2 + 5 > 24\nsell = close < 0", &bars, BUDGET).unwrap() {
            ScriptSignals::BuySell { buy, .. } => assert!(buy.iter().all(|x| *x)),
            _ => panic!(),
        }
    }

    #[test]
    fn nan_warmup_comparisons_are_false() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        match run_script("buy = SMA(close, 3) > 0\nsell = close < 0", &bars, BUDGET).unwrap() {
            ScriptSignals::BuySell { buy, .. } => {
                assert!(!buy[0]);
                assert!(!buy[1]);
                assert!(buy[2]);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn zero_budget_times_out() {
        let bars = bars_from_closes(&[1.0; 5]);
        let err = run_script("buy = close > 0", &bars, Duration::ZERO).unwrap_err();
        assert!(matches!(err, QuantdeskError::Timeout(_)));
    }

    #[test]
    fn macd_family_functions_evaluate() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).sin() * 5.0).collect();
        let bars = bars_from_closes(&closes);
        let code = r#"
            line = MACD(close, 12, 26, 9)
            sig = MACD_SIGNAL(close, 12, 26, 9)
            hist = MACD_HIST(close, 12, 26, 9)
            buy = CROSSOVER(line, sig)
            sell = hist < 0
        "#;
        assert!(run_script(code, &bars, BUDGET).is_ok());
    }
}
