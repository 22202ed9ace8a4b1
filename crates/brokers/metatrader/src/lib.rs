//! MetaTrader 5 terminal client.
//!
//! Talks to a bridge process (an MQL5 EA or a small script next to the
//! terminal) over TCP using length-prefixed JSON frames. Every `Terminal`
//! call maps to one request/response pair.

pub mod client;
pub mod protocol;

pub use client::{MetaTraderConfig, MetaTraderTerminal};
