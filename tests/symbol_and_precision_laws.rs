//! Cross-module invariants: symbol round-trips and serialization precision.

use quantdesk::domain::{normalize, MarketType};
use quantdesk::exchange::precision::{
    floor_to_step, format_amount, normalize_and_format, scale_of_step, to_dec,
};
use quantdesk::exchange::{parse_wire, project, Venue};
use rust_decimal_macros::dec;

const PAIRS: [&str; 8] = [
    "BTC/USDT",
    "ETH/USDT",
    "SOL/USDT",
    "DOGE/USDT",
    "AVAX/USDT",
    "XRP/USDT",
    "PEPE/USDT",
    "ETH/BTC",
];

const VENUES: [Venue; 5] = [
    Venue::Binance,
    Venue::Bybit,
    Venue::Okx,
    Venue::Bitget,
    Venue::Gate,
];

#[test]
fn wire_roundtrip_holds_for_every_canonical_and_venue() {
    for canonical in PAIRS {
        for venue in VENUES {
            for market_type in [MarketType::Spot, MarketType::Swap] {
                let wire = project(canonical, venue, market_type);
                assert!(!wire.is_empty(), "{canonical} failed to project on {venue:?}");
                let (parsed, base) = parse_wire(&wire, venue);
                assert_eq!(
                    parsed, canonical,
                    "roundtrip broke: {canonical} -> {wire} -> {parsed} ({venue:?})"
                );
                assert_eq!(base, canonical.split('/').next().unwrap());
            }
        }
    }
}

#[test]
fn normalization_is_idempotent_over_many_forms() {
    let inputs = [
        "BTC/USDT",
        "BTCUSDT",
        "btc/usdt:USDT",
        "SOL",
        "dogeusd",
        "ETHBTC",
        "PEPE",
        "EUR/GBP",
    ];
    for raw in inputs {
        let (once, base_once) = normalize(raw);
        let (twice, base_twice) = normalize(&once);
        assert_eq!(once, twice, "normalize not idempotent for {raw}");
        assert_eq!(base_once, base_twice);
    }
}

#[test]
fn bare_base_defaults_to_usdt_quote() {
    for base in ["BTC", "pi", "Trx"] {
        let (pair, parsed_base) = normalize(base);
        assert_eq!(pair, format!("{}/USDT", base.to_uppercase()));
        assert_eq!(parsed_base, base.to_uppercase());
    }
}

#[test]
fn serialized_quantity_scale_never_exceeds_step_scale() {
    let cases = [
        (1.23456_f64, "0.001", "1.234"),
        (1.23456, "0.01", "1.23"),
        (1.23456, "1", "1"),
        (0.00987654, "0.0001", "0.0098"),
        (250.0, "0.5", "250"),
        (250.7, "0.5", "250.5"),
    ];
    for (qty, step, expected) in cases {
        let step = step.parse().unwrap();
        let out = normalize_and_format(to_dec(qty), step);
        assert_eq!(out, expected, "qty={qty} step={step}");
        // Scale bound: fractional digits never exceed the step's scale
        let frac_digits = out.split('.').nth(1).map(|f| f.len() as u32).unwrap_or(0);
        assert!(frac_digits <= scale_of_step(step).unwrap());
        // No trailing zeros
        if out.contains('.') {
            assert!(!out.ends_with('0'));
        }
    }
}

#[test]
fn floor_never_rounds_up() {
    let steps = [dec!(0.001), dec!(0.01), dec!(0.5), dec!(1), dec!(5)];
    let values = [dec!(0.0015), dec!(1.999), dec!(7.49), dec!(10.0001)];
    for step in steps {
        for value in values {
            let floored = floor_to_step(value, step);
            assert!(floored <= value, "floor inflated {value} at step {step}");
            // Floored value is an exact multiple of the step
            assert_eq!(floored % step, dec!(0));
        }
    }
}

#[test]
fn below_step_quantities_floor_to_zero_string() {
    // A 0.0001 BTC order against a 0.001 step must never inflate
    assert_eq!(normalize_and_format(to_dec(0.0001), dec!(0.001)), "0");
}

#[test]
fn format_amount_without_scale_keeps_value() {
    assert_eq!(format_amount(dec!(1.5), None), "1.5");
    assert_eq!(format_amount(dec!(0), None), "0");
}
