pub mod candle_buffer;
pub mod klines;

pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use klines::KlinePoller;
