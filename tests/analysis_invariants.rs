//! Analysis-result invariants: every constrained output satisfies the
//! price-corridor and score bounds regardless of what the model said.

use quantdesk::analysis::{decision_was_correct, overall_score, validate_and_constrain};
use quantdesk::domain::Decision;
use serde_json::json;

#[test]
fn corridor_invariant_holds_for_adversarial_outputs() {
    let current = 95_000.0;
    let adversarial = [
        json!({"decision": "BUY", "entry_price": 75000.0, "stop_loss": 50000.0, "take_profit": 200000.0}),
        json!({"decision": "SELL", "entry_price": -5.0, "stop_loss": 0.0, "take_profit": 1.0}),
        json!({"decision": "HOLD"}),
        json!({"decision": "BUY", "entry_price": "not a number"}),
        json!({}),
        json!({"decision": "BUY", "stop_loss": 96000.0, "take_profit": 94000.0}),
    ];
    for raw in adversarial {
        let c = validate_and_constrain(raw.clone(), current);
        let plan = &c.trading_plan;
        assert!(
            plan.stop_loss <= current,
            "stop above current for {raw}"
        );
        assert!(
            plan.take_profit >= current,
            "take below current for {raw}"
        );
        assert!(plan.entry_price >= current * 0.90 && plan.entry_price <= current * 1.10);
        assert!(plan.stop_loss >= current * 0.90);
        assert!(plan.take_profit <= current * 1.10);
        assert!((0..=100).contains(&c.confidence));
        assert!((0..=100).contains(&c.technical_score));
        assert!((0..=100).contains(&c.fundamental_score));
        assert!((0..=100).contains(&c.sentiment_score));
        assert!((1..=100).contains(&c.trading_plan.position_size_pct));
    }
}

#[test]
fn clamped_entry_recenters_to_current_price() {
    // Model proposes entry 75000 while the market trades at 95000
    let c = validate_and_constrain(
        json!({"decision": "BUY", "entry_price": 75000.0}),
        95_000.0,
    );
    assert_eq!(c.trading_plan.entry_price, 95_000.0);
    assert_eq!(c.trading_plan.stop_loss, 95_000.0 * 0.95);
    assert_eq!(c.trading_plan.take_profit, 95_000.0 * 1.05);
}

#[test]
fn decision_domain_is_closed() {
    for raw in ["BUY", "SELL", "HOLD", "buy", "Accumulate", "", "42"] {
        let c = validate_and_constrain(json!({ "decision": raw }), 100.0);
        assert!(matches!(
            c.decision,
            Decision::Buy | Decision::Sell | Decision::Hold
        ));
    }
}

#[test]
fn overall_score_is_bounded_and_monotone_in_confidence() {
    for confidence in [0, 25, 50, 75, 100] {
        let buy = overall_score(60, 55, 50, Decision::Buy, confidence);
        let sell = overall_score(60, 55, 50, Decision::Sell, confidence);
        assert!((0..=100).contains(&buy));
        assert!((0..=100).contains(&sell));
    }
    // Higher confidence pushes BUY scores up and SELL scores down
    assert!(
        overall_score(60, 60, 60, Decision::Buy, 90) > overall_score(60, 60, 60, Decision::Buy, 10)
    );
    assert!(
        overall_score(60, 60, 60, Decision::Sell, 90)
            < overall_score(60, 60, 60, Decision::Sell, 10)
    );
}

#[test]
fn validation_scenario_from_realized_returns() {
    // BUY at 100 -> 104 (+4%): correct. SELL at 200 -> 210 (+5%): wrong.
    // HOLD at 50 -> 52 (+4%): correct. Two of three right.
    let outcomes = [
        (Decision::Buy, 4.0),
        (Decision::Sell, 5.0),
        (Decision::Hold, 4.0),
    ];
    let correct = outcomes
        .iter()
        .filter(|(d, r)| decision_was_correct(*d, *r))
        .count();
    assert_eq!(correct, 2);
}
