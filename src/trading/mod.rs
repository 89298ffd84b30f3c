mod orchestrator;
mod parsers;

pub use orchestrator::{
    generate_client_order_id, resolved_market_type, CloseOutcome, ClosePositionRequest,
    OrderOutcome, PlaceOrderRequest, QuickTradeService, TradeRow,
};
pub use parsers::{parse_balance, parse_positions, symbol_matches, ParsedBalance, ParsedPosition};
