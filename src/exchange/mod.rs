//! Live trading execution core: per-venue REST clients behind a uniform
//! trait, with symbol projection, precision enforcement and signed request
//! construction.

mod binance_futures;
mod binance_spot;
mod bitget_mix;
mod bitget_spot;
mod bybit;
mod credentials;
mod factory;
mod gate;
mod okx;
pub mod precision;
pub mod symbols;
mod traits;
mod transport;

pub use binance_futures::BinanceFuturesClient;
pub use binance_spot::BinanceSpotClient;
pub use bitget_mix::BitgetMixClient;
pub use bitget_spot::BitgetSpotClient;
pub use bybit::{BybitCategory, BybitClient};
pub use credentials::ExchangeCredentials;
pub use factory::create_client;
pub use gate::GateFuturesClient;
pub use okx::OkxClient;
pub use symbols::{parse_wire, project, Venue};
pub use traits::{
    parse_order_side, FillReport, LiveExchangeClient, LiveOrderResult, OrderSide,
};
