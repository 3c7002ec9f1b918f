pub mod candle_buffer;
pub mod kline_adapter;
pub mod kline_stream;

pub use candle_buffer::{AppendResult, Candle, CandleBuffer, CandleUpdate, SharedBuffer};
pub use kline_adapter::{BinanceKlineAdapter, RawMessage, StreamAdapter};
pub use kline_stream::{BinanceKlineTransport, RawMessageCallback, SubscriptionHandle, Transport};
